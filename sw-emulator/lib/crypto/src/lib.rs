/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the C3 Emulator Crypto library.

--*/

mod aes_cbc;
mod sha256;

pub use aes_cbc::{Aes, AesDirection, AesError, AesMode, AES_BLOCK_SIZE};
pub use sha256::{HmacSha256, Sha256};

#[cfg(test)]
pub(crate) fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}
