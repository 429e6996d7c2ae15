/*++

Licensed under the Apache-2.0 license.

File Name:

    instr_params.rs

Abstract:

    File contains the table describing the parameters of every request
    instruction code.

--*/

use c3_api::InstrCode;
use c3_error::{C3Error, C3Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferDir {
    In,
    Out,
}

/// Number of bytes a buffer parameter covers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferSize {
    Fixed(u32),
    /// Given by the word parameter at this index
    Param(usize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ParamKind {
    Word,
    Buffer { dir: BufferDir, size: BufferSize },
}

/// Parameter layout of one instruction code.
#[derive(Debug)]
pub struct InstrParams {
    pub code: InstrCode,
    pub params: &'static [ParamKind],
}

impl InstrParams {
    /// Looks up the layout of the raw instruction code `code`.
    pub fn lookup(code: u32) -> C3Result<&'static InstrParams> {
        C3_INSTR_PARAMS
            .iter()
            .find(|entry| entry.code as u32 == code)
            .ok_or(C3Error::DRIVER_UNSUPPORTED_INSTRUCTION)
    }

    pub fn buffer_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, ParamKind::Buffer { .. }))
            .count()
    }
}

const fn input(size: BufferSize) -> ParamKind {
    ParamKind::Buffer {
        dir: BufferDir::In,
        size,
    }
}

const fn output(size: BufferSize) -> ParamKind {
    ParamKind::Buffer {
        dir: BufferDir::Out,
        size,
    }
}

use BufferSize::{Fixed, Param};
use ParamKind::Word;

/// src, dst, key, data length, key length
const CIPHER_ECB: &[ParamKind] = &[input(Param(3)), output(Param(3)), input(Param(4)), Word, Word];

/// src, dst, key, iv, data length, key length
const AES_CBC: &[ParamKind] = &[
    input(Param(4)),
    output(Param(4)),
    input(Param(5)),
    input(Fixed(16)),
    Word,
    Word,
];

/// src, dst, key, iv, data length, key length
const DES_CBC: &[ParamKind] = &[
    input(Param(4)),
    output(Param(4)),
    input(Param(5)),
    input(Fixed(8)),
    Word,
    Word,
];

/// src, digest, data length
const SHA1: &[ParamKind] = &[input(Param(2)), output(Fixed(20)), Word];

/// src, digest, data length
const SHA256: &[ParamKind] = &[input(Param(2)), output(Fixed(32)), Word];

/// src, digest, key, data length, key length
const HMAC_SHA256: &[ParamKind] = &[input(Param(3)), output(Fixed(32)), input(Param(4)), Word, Word];

/// base, exponent, modulus, result, operand length
const PKA: &[ParamKind] = &[
    input(Param(4)),
    input(Param(4)),
    input(Param(4)),
    output(Param(4)),
    Word,
];

/// dst, length
const RNG: &[ParamKind] = &[output(Param(1)), Word];

pub static C3_INSTR_PARAMS: &[InstrParams] = &[
    InstrParams {
        code: InstrCode::AesEcbEncrypt,
        params: CIPHER_ECB,
    },
    InstrParams {
        code: InstrCode::AesEcbDecrypt,
        params: CIPHER_ECB,
    },
    InstrParams {
        code: InstrCode::AesCbcEncrypt,
        params: AES_CBC,
    },
    InstrParams {
        code: InstrCode::AesCbcDecrypt,
        params: AES_CBC,
    },
    InstrParams {
        code: InstrCode::DesCbcEncrypt,
        params: DES_CBC,
    },
    InstrParams {
        code: InstrCode::DesCbcDecrypt,
        params: DES_CBC,
    },
    InstrParams {
        code: InstrCode::TdesCbcEncrypt,
        params: DES_CBC,
    },
    InstrParams {
        code: InstrCode::TdesCbcDecrypt,
        params: DES_CBC,
    },
    InstrParams {
        code: InstrCode::Sha1,
        params: SHA1,
    },
    InstrParams {
        code: InstrCode::Sha256,
        params: SHA256,
    },
    InstrParams {
        code: InstrCode::HmacSha256,
        params: HMAC_SHA256,
    },
    InstrParams {
        code: InstrCode::PkaModExp,
        params: PKA,
    },
    InstrParams {
        code: InstrCode::Rng,
        params: RNG,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_described_once() {
        for code in InstrCode::ALL {
            let matches = C3_INSTR_PARAMS.iter().filter(|e| e.code == code).count();
            assert_eq!(matches, 1, "{code:?}");
        }
        assert_eq!(C3_INSTR_PARAMS.len(), InstrCode::ALL.len());
    }

    #[test]
    fn test_size_params_are_words() {
        for entry in C3_INSTR_PARAMS {
            assert!(entry.params.len() <= c3_api::MAX_REQUEST_PARAMS);
            for param in entry.params {
                if let ParamKind::Buffer {
                    size: BufferSize::Param(index),
                    ..
                } = param
                {
                    assert_eq!(entry.params[*index], ParamKind::Word, "{:?}", entry.code);
                }
            }
        }
    }

    #[test]
    fn test_lookup() {
        let entry = InstrParams::lookup(InstrCode::AesCbcEncrypt.into()).unwrap();
        assert_eq!(entry.buffer_count(), 4);
        assert_eq!(entry.params.len(), 6);
        assert_eq!(
            InstrParams::lookup(0xdead).err().map(|e| e.kind()),
            Some(c3_error::ErrorKind::InvalidArgument)
        );
    }
}
