/*++

Licensed under the Apache-2.0 license.

File Name:

    encoders.rs

Abstract:

    File contains the per-primitive program encoders used by the request
    façade. Each encoder takes the resolved parameter words of a request
    (device addresses in place of buffers) and appends the instructions
    that implement it.

--*/

use crate::program::Program;
use c3_api::{CipherAlgorithm, CipherDirection, CipherMode, HashAlgorithm, Instr, InstrCode, PkaOperation};
use c3_error::{C3Error, C3Result};

/// Appends the program for `code` to `program`.
///
/// # Arguments
///
/// * `code` - Request instruction code
/// * `params` - Parameter words, buffer parameters replaced by device addresses
/// * `program` - Program to append to
pub(crate) fn encode(code: InstrCode, params: &[u32], program: &mut Program) -> C3Result<()> {
    use CipherAlgorithm::{Aes, Des, TripleDes};
    use CipherDirection::{Decrypt, Encrypt};

    match code {
        InstrCode::AesEcbEncrypt => cipher_ecb(Aes, Encrypt, params, program),
        InstrCode::AesEcbDecrypt => cipher_ecb(Aes, Decrypt, params, program),
        InstrCode::AesCbcEncrypt => cipher_cbc(Aes, Encrypt, params, program),
        InstrCode::AesCbcDecrypt => cipher_cbc(Aes, Decrypt, params, program),
        InstrCode::DesCbcEncrypt => cipher_cbc(Des, Encrypt, params, program),
        InstrCode::DesCbcDecrypt => cipher_cbc(Des, Decrypt, params, program),
        InstrCode::TdesCbcEncrypt => cipher_cbc(TripleDes, Encrypt, params, program),
        InstrCode::TdesCbcDecrypt => cipher_cbc(TripleDes, Decrypt, params, program),
        InstrCode::Sha1 => hash(HashAlgorithm::Sha1, params, program),
        InstrCode::Sha256 => hash(HashAlgorithm::Sha256, params, program),
        InstrCode::HmacSha256 => hmac(params, program),
        InstrCode::PkaModExp => pka(PkaOperation::ModExp, params, program),
        InstrCode::Rng => rng(params, program),
    }
}

fn take<const N: usize>(params: &[u32]) -> C3Result<[u32; N]> {
    params
        .try_into()
        .map_err(|_| C3Error::DRIVER_PARAM_COUNT_MISMATCH)
}

fn cipher_ecb(
    alg: CipherAlgorithm,
    dir: CipherDirection,
    params: &[u32],
    program: &mut Program,
) -> C3Result<()> {
    let [src, dst, key, len, key_len] = take(params)?;
    program.push(Instr::CipherStart {
        alg,
        mode: CipherMode::Ecb,
        dir,
        key,
        key_len,
        iv: 0,
        src,
        dst,
        len,
    })
}

fn cipher_cbc(
    alg: CipherAlgorithm,
    dir: CipherDirection,
    params: &[u32],
    program: &mut Program,
) -> C3Result<()> {
    let [src, dst, key, iv, len, key_len] = take(params)?;
    program.push(Instr::CipherStart {
        alg,
        mode: CipherMode::Cbc,
        dir,
        key,
        key_len,
        iv,
        src,
        dst,
        len,
    })
}

fn hash(alg: HashAlgorithm, params: &[u32], program: &mut Program) -> C3Result<()> {
    let [src, digest, len] = take(params)?;
    program.push(Instr::HashInit {
        alg,
        key: 0,
        key_len: 0,
    })?;
    program.push(Instr::HashAppend { src, len })?;
    program.push(Instr::HashEnd { digest })
}

fn hmac(params: &[u32], program: &mut Program) -> C3Result<()> {
    let [src, digest, key, len, key_len] = take(params)?;
    program.push(Instr::HashInit {
        alg: HashAlgorithm::HmacSha256,
        key,
        key_len,
    })?;
    program.push(Instr::HashAppend { src, len })?;
    program.push(Instr::HashEnd { digest })
}

fn pka(op: PkaOperation, params: &[u32], program: &mut Program) -> C3Result<()> {
    let [base, exp, modulus, result, len] = take(params)?;
    program.push(Instr::PkaOp {
        op,
        a: base,
        b: exp,
        modulus,
        result,
        len,
    })
}

fn rng(params: &[u32], program: &mut Program) -> C3Result<()> {
    let [dst, len] = take(params)?;
    program.push(Instr::Rng { dst, len })
}
