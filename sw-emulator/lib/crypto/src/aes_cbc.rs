/*++

Licensed under the Apache-2.0 license.

File Name:

    aes_cbc.rs

Abstract:

    File contains implementation of AES-128/192/256 in ECB and CBC modes,
    with access to the chaining value so that a cipher stream can be
    suspended and resumed.

--*/

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};

pub const AES_BLOCK_SIZE: usize = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AesMode {
    Ecb,
    Cbc,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AesDirection {
    Encrypt,
    Decrypt,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AesError {
    /// Key is not 16, 24 or 32 bytes
    InvalidKeyLen,

    /// Data is not a whole number of blocks
    PartialBlock,
}

enum KeySchedule {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl KeySchedule {
    fn new(key: &[u8]) -> Result<Self, AesError> {
        let schedule = match key.len() {
            16 => KeySchedule::Aes128(Aes128::new(GenericArray::from_slice(key))),
            24 => KeySchedule::Aes192(Aes192::new(GenericArray::from_slice(key))),
            32 => KeySchedule::Aes256(Aes256::new(GenericArray::from_slice(key))),
            _ => Err(AesError::InvalidKeyLen)?,
        };
        Ok(schedule)
    }

    fn encrypt(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            KeySchedule::Aes128(c) => c.encrypt_block(block),
            KeySchedule::Aes192(c) => c.encrypt_block(block),
            KeySchedule::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            KeySchedule::Aes128(c) => c.decrypt_block(block),
            KeySchedule::Aes192(c) => c.decrypt_block(block),
            KeySchedule::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// An AES cipher stream. Successive calls to [`Aes::process`] continue the
/// same stream.
pub struct Aes {
    key: KeySchedule,
    mode: AesMode,
    dir: AesDirection,

    /// Previous ciphertext block (the IV before the first block). Unused in
    /// ECB mode.
    chain: [u8; AES_BLOCK_SIZE],
}

impl Aes {
    /// Create a new cipher stream
    ///
    /// # Arguments
    ///
    /// * `key` - 16, 24 or 32 byte key
    /// * `iv` - Initialization vector; ignored in ECB mode
    /// * `mode` - Block chaining mode
    /// * `dir` - Encrypt or decrypt
    pub fn new(
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        mode: AesMode,
        dir: AesDirection,
    ) -> Result<Self, AesError> {
        Ok(Self {
            key: KeySchedule::new(key)?,
            mode,
            dir,
            chain: *iv,
        })
    }

    /// Encrypts or decrypts `data` in place.
    pub fn process(&mut self, data: &mut [u8]) -> Result<(), AesError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            Err(AesError::PartialBlock)?
        }
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut block = [0u8; AES_BLOCK_SIZE];
            block.copy_from_slice(chunk);
            match (self.mode, self.dir) {
                (AesMode::Ecb, AesDirection::Encrypt) => self.key.encrypt(&mut block),
                (AesMode::Ecb, AesDirection::Decrypt) => self.key.decrypt(&mut block),
                (AesMode::Cbc, AesDirection::Encrypt) => {
                    xor(&mut block, &self.chain);
                    self.key.encrypt(&mut block);
                    self.chain = block;
                }
                (AesMode::Cbc, AesDirection::Decrypt) => {
                    let cipher_text = block;
                    self.key.decrypt(&mut block);
                    xor(&mut block, &self.chain);
                    self.chain = cipher_text;
                }
            }
            chunk.copy_from_slice(&block);
        }
        Ok(())
    }

    /// The value the next CBC block will be chained with.
    pub fn chain_value(&self) -> [u8; AES_BLOCK_SIZE] {
        self.chain
    }

    pub fn set_chain_value(&mut self, chain: &[u8; AES_BLOCK_SIZE]) {
        self.chain = *chain;
    }
}

fn xor(block: &mut [u8; AES_BLOCK_SIZE], other: &[u8; AES_BLOCK_SIZE]) {
    block.iter_mut().zip(other).for_each(|(a, b)| *a ^= b);
}
