/*++

Licensed under the Apache-2.0 license.

File Name:

    sha256.rs

Abstract:

    File contains implementation of the streaming Secure Hash 256 Algorithm
    (SHA-256) and HMAC-SHA256 used by the hash unit of the emulated engine.

--*/

use sha2::digest::block_buffer::Block;
use sha2::digest::consts::U64;

/// SHA-256
#[derive(Clone)]
pub struct Sha256 {
    /// Hash
    hash: [u32; 8],

    /// Bytes not yet compressed
    pending: [u8; Self::BLOCK_SIZE],
    pending_len: usize,

    /// Total message length in bytes
    total_len: u64,
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha256 {
    /// SHA-256 Block Size
    pub const BLOCK_SIZE: usize = 64;

    /// SHA-256 Hash Size
    pub const HASH_SIZE: usize = 32;

    /// SHA-256 Initial Hash Vectors
    #[cfg_attr(rustfmt, rustfmt_skip)]
    const HASH_IV: [u32; 8] = [
        0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a,
        0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
    ];

    pub fn new() -> Self {
        Self {
            hash: Self::HASH_IV,
            pending: [0; Self::BLOCK_SIZE],
            pending_len: 0,
            total_len: 0,
        }
    }

    /// Absorb `data` into the hash
    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len = self.total_len.wrapping_add(data.len() as u64);
        while !data.is_empty() {
            let take = (Self::BLOCK_SIZE - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len == Self::BLOCK_SIZE {
                self.compress();
            }
        }
    }

    fn compress(&mut self) {
        let block = *Block::<U64>::from_slice(&self.pending);
        sha2::compress256(&mut self.hash, &[block]);
        self.pending_len = 0;
    }

    /// Pad the message and retrieve the hash
    pub fn finalize(mut self) -> [u8; Self::HASH_SIZE] {
        let bit_len = self.total_len.wrapping_mul(8);
        self.pending[self.pending_len] = 0x80;
        self.pending[self.pending_len + 1..].fill(0);
        if self.pending_len + 1 > Self::BLOCK_SIZE - 8 {
            self.compress();
            self.pending.fill(0);
        }
        self.pending[Self::BLOCK_SIZE - 8..].copy_from_slice(&bit_len.to_be_bytes());
        self.compress();

        let mut hash = [0u8; Self::HASH_SIZE];
        self.hash
            .iter()
            .flat_map(|i| i.to_be_bytes())
            .zip(hash.iter_mut())
            .for_each(|(src, dest)| *dest = src);
        hash
    }
}

/// HMAC-SHA256
#[derive(Clone)]
pub struct HmacSha256 {
    inner: Sha256,
    outer_key: [u8; Sha256::BLOCK_SIZE],
}

impl HmacSha256 {
    pub fn new(key: &[u8]) -> Self {
        let mut block_key = [0u8; Sha256::BLOCK_SIZE];
        if key.len() > Sha256::BLOCK_SIZE {
            let mut sha = Sha256::new();
            sha.update(key);
            block_key[..Sha256::HASH_SIZE].copy_from_slice(&sha.finalize());
        } else {
            block_key[..key.len()].copy_from_slice(key);
        }

        let mut inner_key = block_key;
        inner_key.iter_mut().for_each(|b| *b ^= 0x36);
        let mut outer_key = block_key;
        outer_key.iter_mut().for_each(|b| *b ^= 0x5c);

        let mut inner = Sha256::new();
        inner.update(&inner_key);
        Self { inner, outer_key }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; Sha256::HASH_SIZE] {
        let inner_hash = self.inner.finalize();
        let mut outer = Sha256::new();
        outer.update(&self.outer_key);
        outer.update(&inner_hash);
        outer.finalize()
    }
}
