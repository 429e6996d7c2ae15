/*++

Licensed under the Apache-2.0 license.

File Name:

    workload.rs

Abstract:

    File contains the requests the emulator issues and the reference
    results they are checked against.

--*/

use anyhow::{bail, Context};
use c3_api::InstrCode;
use c3_drivers::{Request, RequestParam, UserBuffer};
use c3_emu_crypto::{Aes, AesDirection, AesMode, HmacSha256, Sha256, AES_BLOCK_SIZE};
use rand::{rngs::StdRng, Rng};

use crate::cli::ArgsWorkload;

enum Check {
    Output { buf: UserBuffer, expected: Vec<u8> },
    Filled(UserBuffer),
}

/// A request and the output it must produce.
pub struct Job {
    pub request: Request,
    check: Check,
}

impl Job {
    pub fn build(kind: ArgsWorkload, payload: usize, rng: &mut StdRng) -> anyhow::Result<Self> {
        let kind = match kind {
            ArgsWorkload::Mixed => match rng.gen_range(0..4) {
                0 => ArgsWorkload::Aes,
                1 => ArgsWorkload::Sha256,
                2 => ArgsWorkload::Hmac,
                _ => ArgsWorkload::Rng,
            },
            kind => kind,
        };
        let payload = payload.max(1);
        match kind {
            ArgsWorkload::Aes => aes_cbc(payload, rng),
            ArgsWorkload::Sha256 => Ok(sha256(payload, rng)),
            ArgsWorkload::Hmac => Ok(hmac(payload, rng)),
            _ => Ok(random(payload)),
        }
    }

    /// Compares the caller-visible output with the reference result.
    pub fn verify(&self) -> anyhow::Result<()> {
        match &self.check {
            Check::Output { buf, expected } => {
                if buf.to_vec() != *expected {
                    bail!("{:#x}: output differs from reference", self.request.instr_code);
                }
            }
            // Output is random; an all-zero buffer means nothing was written.
            Check::Filled(buf) => {
                if buf.len() >= 8 && buf.to_vec().iter().all(|b| *b == 0) {
                    bail!("{:#x}: output never written", self.request.instr_code);
                }
            }
        }
        Ok(())
    }
}

fn random_bytes(len: usize, rng: &mut StdRng) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Splits `data` in two fragments so the gather path is exercised.
fn user_buffer(data: Vec<u8>, rng: &mut StdRng) -> UserBuffer {
    if data.len() > 1 && rng.gen_bool(0.25) {
        let mut head = data;
        let tail = head.split_off(rng.gen_range(1..head.len()));
        UserBuffer::scattered(vec![head, tail])
    } else {
        UserBuffer::new(data)
    }
}

fn aes_cbc(payload: usize, rng: &mut StdRng) -> anyhow::Result<Job> {
    let len = payload.next_multiple_of(AES_BLOCK_SIZE);
    let plain = random_bytes(len, rng);
    let key = random_bytes(32, rng);
    let mut iv = [0u8; AES_BLOCK_SIZE];
    rng.fill(&mut iv[..]);

    let mut expected = plain.clone();
    Aes::new(&key, &iv, AesMode::Cbc, AesDirection::Encrypt)
        .and_then(|mut aes| aes.process(&mut expected))
        .map_err(|err| anyhow::anyhow!("reference AES: {err:?}"))?;

    // Encrypted in place.
    let data = user_buffer(plain, rng);
    let request = Request::new(
        InstrCode::AesCbcEncrypt,
        vec![
            RequestParam::buffer(&data),
            RequestParam::buffer(&data),
            RequestParam::Buffer(Some(UserBuffer::new(key))),
            RequestParam::Buffer(Some(UserBuffer::new(iv.to_vec()))),
            RequestParam::Word(u32::try_from(len).context("payload too large")?),
            RequestParam::Word(32),
        ],
    );
    Ok(Job {
        request,
        check: Check::Output {
            buf: data,
            expected,
        },
    })
}

fn sha256(payload: usize, rng: &mut StdRng) -> Job {
    let msg = random_bytes(payload, rng);
    let mut hash = Sha256::new();
    hash.update(&msg);
    let digest = UserBuffer::zeroed(Sha256::HASH_SIZE);
    let request = Request::new(
        InstrCode::Sha256,
        vec![
            RequestParam::Buffer(Some(user_buffer(msg, rng))),
            RequestParam::buffer(&digest),
            RequestParam::Word(payload as u32),
        ],
    );
    Job {
        request,
        check: Check::Output {
            buf: digest,
            expected: hash.finalize().to_vec(),
        },
    }
}

fn hmac(payload: usize, rng: &mut StdRng) -> Job {
    let key_len = rng.gen_range(1..=64);
    let key = random_bytes(key_len, rng);
    let msg = random_bytes(payload, rng);
    let mut mac = HmacSha256::new(&key);
    mac.update(&msg);
    let digest = UserBuffer::zeroed(Sha256::HASH_SIZE);
    let request = Request::new(
        InstrCode::HmacSha256,
        vec![
            RequestParam::Buffer(Some(user_buffer(msg, rng))),
            RequestParam::buffer(&digest),
            RequestParam::Buffer(Some(UserBuffer::new(key))),
            RequestParam::Word(payload as u32),
            RequestParam::Word(key_len as u32),
        ],
    );
    Job {
        request,
        check: Check::Output {
            buf: digest,
            expected: mac.finalize().to_vec(),
        },
    }
}

fn random(payload: usize) -> Job {
    let dst = UserBuffer::zeroed(payload);
    let request = Request::new(
        InstrCode::Rng,
        vec![RequestParam::buffer(&dst), RequestParam::Word(payload as u32)],
    );
    Job {
        request,
        check: Check::Filled(dst),
    }
}
