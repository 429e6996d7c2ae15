/*++

Licensed under the Apache-2.0 license.

File Name:

    instr.rs

Abstract:

    File contains the typed C3 instruction set and its word encoding.

    Every instruction starts with a header word:
        [31:24] opcode
        [23:16] modifier
        [15:0]  instruction length in words, header included
    followed by its operand words.

--*/

use c3_error::{C3Error, C3Result};

/// Device (DMA) address as seen by the accelerator.
pub type DevAddr = u32;

/// Largest length any data field can encode.
pub const MAX_DATA_LEN: u32 = 0x00FF_FFFF;

/// Size of the cipher context written by `ContextSave`.
pub const CIPHER_CONTEXT_SIZE: usize = 16;

/// Largest HMAC key accepted by `HashInit`.
pub const MAX_HMAC_KEY_LEN: u32 = 64;

/// Largest PKA operand.
pub const MAX_PKA_OPERAND_LEN: u32 = 512;

mod opcode {
    pub const CIPHER_START: u8 = 0x01;
    pub const CIPHER_APPEND: u8 = 0x02;
    pub const HASH_INIT: u8 = 0x10;
    pub const HASH_APPEND: u8 = 0x11;
    pub const HASH_END: u8 = 0x12;
    pub const PKA_OP: u8 = 0x20;
    pub const RNG: u8 = 0x30;
    pub const CONTEXT_SAVE: u8 = 0x40;
    pub const CONTEXT_RESTORE: u8 = 0x41;
    pub const STOP: u8 = 0xFF;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CipherAlgorithm {
    Aes,
    Des,
    TripleDes,
}

impl CipherAlgorithm {
    pub fn block_size(&self) -> u32 {
        match self {
            CipherAlgorithm::Aes => 16,
            CipherAlgorithm::Des | CipherAlgorithm::TripleDes => 8,
        }
    }

    pub fn is_valid_key_len(&self, key_len: u32) -> bool {
        match self {
            CipherAlgorithm::Aes => matches!(key_len, 16 | 24 | 32),
            CipherAlgorithm::Des => key_len == 8,
            CipherAlgorithm::TripleDes => matches!(key_len, 16 | 24),
        }
    }

    fn bits(&self) -> u8 {
        match self {
            CipherAlgorithm::Aes => 0,
            CipherAlgorithm::Des => 1,
            CipherAlgorithm::TripleDes => 2,
        }
    }

    fn from_bits(bits: u8) -> C3Result<Self> {
        match bits {
            0 => Ok(CipherAlgorithm::Aes),
            1 => Ok(CipherAlgorithm::Des),
            2 => Ok(CipherAlgorithm::TripleDes),
            _ => Err(C3Error::API_INSTR_INVALID_MODIFIER),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CipherMode {
    Ecb,
    Cbc,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CipherDirection {
    Encrypt,
    Decrypt,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    HmacSha256,
}

impl HashAlgorithm {
    pub fn digest_size(&self) -> u32 {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 | HashAlgorithm::HmacSha256 => 32,
        }
    }

    fn bits(&self) -> u8 {
        match self {
            HashAlgorithm::Sha1 => 0,
            HashAlgorithm::Sha256 => 1,
            HashAlgorithm::HmacSha256 => 2,
        }
    }

    fn from_bits(bits: u8) -> C3Result<Self> {
        match bits {
            0 => Ok(HashAlgorithm::Sha1),
            1 => Ok(HashAlgorithm::Sha256),
            2 => Ok(HashAlgorithm::HmacSha256),
            _ => Err(C3Error::API_INSTR_INVALID_MODIFIER),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PkaOperation {
    ModExp,
    ModMul,
    ModAdd,
}

impl PkaOperation {
    fn bits(&self) -> u8 {
        match self {
            PkaOperation::ModExp => 0,
            PkaOperation::ModMul => 1,
            PkaOperation::ModAdd => 2,
        }
    }

    fn from_bits(bits: u8) -> C3Result<Self> {
        match bits {
            0 => Ok(PkaOperation::ModExp),
            1 => Ok(PkaOperation::ModMul),
            2 => Ok(PkaOperation::ModAdd),
            _ => Err(C3Error::API_INSTR_INVALID_MODIFIER),
        }
    }
}

/// One C3 instruction.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Instr {
    CipherStart {
        alg: CipherAlgorithm,
        mode: CipherMode,
        dir: CipherDirection,
        key: DevAddr,
        key_len: u32,
        /// Ignored (encoded as 0) in ECB mode
        iv: DevAddr,
        src: DevAddr,
        dst: DevAddr,
        len: u32,
    },
    CipherAppend {
        src: DevAddr,
        dst: DevAddr,
        len: u32,
    },
    HashInit {
        alg: HashAlgorithm,
        /// Only meaningful for HMAC
        key: DevAddr,
        key_len: u32,
    },
    HashAppend {
        src: DevAddr,
        len: u32,
    },
    HashEnd {
        digest: DevAddr,
    },
    PkaOp {
        op: PkaOperation,
        a: DevAddr,
        b: DevAddr,
        modulus: DevAddr,
        result: DevAddr,
        len: u32,
    },
    Rng {
        dst: DevAddr,
        len: u32,
    },
    ContextSave {
        addr: DevAddr,
    },
    ContextRestore {
        addr: DevAddr,
    },
    Stop,
}

fn check_len(len: u32) -> C3Result<()> {
    if len > MAX_DATA_LEN {
        Err(C3Error::API_INSTR_FIELD_OVERFLOW)
    } else {
        Ok(())
    }
}

fn header(opcode: u8, modifier: u8, words: usize) -> u32 {
    (opcode as u32) << 24 | (modifier as u32) << 16 | words as u32
}

impl Instr {
    /// Checks that every field fits its encoding and is meaningful for the
    /// opcode.
    pub fn validate(&self) -> C3Result<()> {
        match self {
            Instr::CipherStart {
                alg, key_len, len, ..
            } => {
                if !alg.is_valid_key_len(*key_len) {
                    Err(C3Error::API_INSTR_INVALID_KEY_LEN)?
                }
                check_len(*len)?;
                if *len % alg.block_size() != 0 {
                    Err(C3Error::API_INSTR_INVALID_DATA_LEN)?
                }
                Ok(())
            }
            Instr::CipherAppend { len, .. } => {
                check_len(*len)?;
                // The smallest block size; the engine re-checks against the
                // algorithm selected by the preceding CipherStart.
                if *len % 8 != 0 {
                    Err(C3Error::API_INSTR_INVALID_DATA_LEN)?
                }
                Ok(())
            }
            Instr::HashInit { alg, key_len, .. } => match alg {
                HashAlgorithm::HmacSha256 if *key_len > MAX_HMAC_KEY_LEN => {
                    Err(C3Error::API_INSTR_INVALID_KEY_LEN)
                }
                HashAlgorithm::Sha1 | HashAlgorithm::Sha256 if *key_len != 0 => {
                    Err(C3Error::API_INSTR_INVALID_KEY_LEN)
                }
                _ => Ok(()),
            },
            Instr::HashAppend { len, .. } | Instr::Rng { len, .. } => check_len(*len),
            Instr::PkaOp { len, .. } => {
                if *len == 0 || *len > MAX_PKA_OPERAND_LEN || *len % 4 != 0 {
                    Err(C3Error::API_INSTR_INVALID_DATA_LEN)?
                }
                Ok(())
            }
            Instr::HashEnd { .. }
            | Instr::ContextSave { .. }
            | Instr::ContextRestore { .. }
            | Instr::Stop => Ok(()),
        }
    }

    /// Number of words the instruction occupies, header included.
    pub fn word_len(&self) -> usize {
        match self {
            Instr::CipherStart { .. } => 7,
            Instr::CipherAppend { .. } => 4,
            Instr::HashInit { .. } => 3,
            Instr::HashAppend { .. } => 3,
            Instr::HashEnd { .. } => 2,
            Instr::PkaOp { .. } => 6,
            Instr::Rng { .. } => 3,
            Instr::ContextSave { .. } | Instr::ContextRestore { .. } => 2,
            Instr::Stop => 1,
        }
    }

    /// Validates the instruction and appends its encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u32>) -> C3Result<()> {
        self.validate()?;
        let words = self.word_len();
        match self {
            Instr::CipherStart {
                alg,
                mode,
                dir,
                key,
                key_len,
                iv,
                src,
                dst,
                len,
            } => {
                let mut modifier = alg.bits();
                if *mode == CipherMode::Cbc {
                    modifier |= 1 << 2;
                }
                if *dir == CipherDirection::Decrypt {
                    modifier |= 1 << 3;
                }
                let iv = if *mode == CipherMode::Cbc { *iv } else { 0 };
                out.extend_from_slice(&[
                    header(opcode::CIPHER_START, modifier, words),
                    *key,
                    *key_len,
                    iv,
                    *src,
                    *dst,
                    *len,
                ]);
            }
            Instr::CipherAppend { src, dst, len } => {
                out.extend_from_slice(&[header(opcode::CIPHER_APPEND, 0, words), *src, *dst, *len]);
            }
            Instr::HashInit { alg, key, key_len } => {
                out.extend_from_slice(&[
                    header(opcode::HASH_INIT, alg.bits(), words),
                    *key,
                    *key_len,
                ]);
            }
            Instr::HashAppend { src, len } => {
                out.extend_from_slice(&[header(opcode::HASH_APPEND, 0, words), *src, *len]);
            }
            Instr::HashEnd { digest } => {
                out.extend_from_slice(&[header(opcode::HASH_END, 0, words), *digest]);
            }
            Instr::PkaOp {
                op,
                a,
                b,
                modulus,
                result,
                len,
            } => {
                out.extend_from_slice(&[
                    header(opcode::PKA_OP, op.bits(), words),
                    *a,
                    *b,
                    *modulus,
                    *result,
                    *len,
                ]);
            }
            Instr::Rng { dst, len } => {
                out.extend_from_slice(&[header(opcode::RNG, 0, words), *dst, *len]);
            }
            Instr::ContextSave { addr } => {
                out.extend_from_slice(&[header(opcode::CONTEXT_SAVE, 0, words), *addr]);
            }
            Instr::ContextRestore { addr } => {
                out.extend_from_slice(&[header(opcode::CONTEXT_RESTORE, 0, words), *addr]);
            }
            Instr::Stop => out.push(header(opcode::STOP, 0, words)),
        }
        Ok(())
    }

    /// Returns the opcode byte of an encoded header word.
    pub fn opcode_of(header: u32) -> u8 {
        (header >> 24) as u8
    }

    /// Decodes the instruction at the start of `words`, returning it along
    /// with the number of words consumed.
    pub fn decode(words: &[u32]) -> C3Result<(Instr, usize)> {
        let head = *words.first().ok_or(C3Error::API_INSTR_TRUNCATED)?;
        let opcode = Self::opcode_of(head);
        let modifier = (head >> 16) as u8;
        let len = (head & 0xffff) as usize;
        let expected = match opcode {
            opcode::CIPHER_START => 7,
            opcode::CIPHER_APPEND => 4,
            opcode::HASH_INIT | opcode::HASH_APPEND | opcode::RNG => 3,
            opcode::HASH_END | opcode::CONTEXT_SAVE | opcode::CONTEXT_RESTORE => 2,
            opcode::PKA_OP => 6,
            opcode::STOP => 1,
            _ => Err(C3Error::API_INSTR_INVALID_OPCODE)?,
        };
        if len != expected {
            Err(C3Error::API_INSTR_FIELD_OVERFLOW)?
        }
        let w = words.get(..len).ok_or(C3Error::API_INSTR_TRUNCATED)?;
        let instr = match opcode {
            opcode::CIPHER_START => Instr::CipherStart {
                alg: CipherAlgorithm::from_bits(modifier & 0x3)?,
                mode: if modifier & (1 << 2) != 0 {
                    CipherMode::Cbc
                } else {
                    CipherMode::Ecb
                },
                dir: if modifier & (1 << 3) != 0 {
                    CipherDirection::Decrypt
                } else {
                    CipherDirection::Encrypt
                },
                key: w[1],
                key_len: w[2],
                iv: w[3],
                src: w[4],
                dst: w[5],
                len: w[6],
            },
            opcode::CIPHER_APPEND => Instr::CipherAppend {
                src: w[1],
                dst: w[2],
                len: w[3],
            },
            opcode::HASH_INIT => Instr::HashInit {
                alg: HashAlgorithm::from_bits(modifier)?,
                key: w[1],
                key_len: w[2],
            },
            opcode::HASH_APPEND => Instr::HashAppend {
                src: w[1],
                len: w[2],
            },
            opcode::HASH_END => Instr::HashEnd { digest: w[1] },
            opcode::PKA_OP => Instr::PkaOp {
                op: PkaOperation::from_bits(modifier)?,
                a: w[1],
                b: w[2],
                modulus: w[3],
                result: w[4],
                len: w[5],
            },
            opcode::RNG => Instr::Rng {
                dst: w[1],
                len: w[2],
            },
            opcode::CONTEXT_SAVE => Instr::ContextSave { addr: w[1] },
            opcode::CONTEXT_RESTORE => Instr::ContextRestore { addr: w[1] },
            _ => Instr::Stop,
        };
        instr.validate()?;
        Ok((instr, len))
    }
}
