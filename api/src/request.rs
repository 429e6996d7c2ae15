// Licensed under the Apache-2.0 license

use crate::checksum::{calc_checksum, verify_checksum};
use c3_error::{C3Error, C3Result};
use core::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum number of parameter words a request may carry.
pub const MAX_REQUEST_PARAMS: usize = 32;

/// Request instruction codes accepted by the façade.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum InstrCode {
    AesEcbEncrypt = 0x0101,
    AesEcbDecrypt = 0x0102,
    AesCbcEncrypt = 0x0103,
    AesCbcDecrypt = 0x0104,
    DesCbcEncrypt = 0x0201,
    DesCbcDecrypt = 0x0202,
    TdesCbcEncrypt = 0x0301,
    TdesCbcDecrypt = 0x0302,
    Sha1 = 0x0401,
    Sha256 = 0x0402,
    HmacSha256 = 0x0403,
    PkaModExp = 0x0501,
    Rng = 0x0601,
}

impl InstrCode {
    pub const ALL: [InstrCode; 13] = [
        InstrCode::AesEcbEncrypt,
        InstrCode::AesEcbDecrypt,
        InstrCode::AesCbcEncrypt,
        InstrCode::AesCbcDecrypt,
        InstrCode::DesCbcEncrypt,
        InstrCode::DesCbcDecrypt,
        InstrCode::TdesCbcEncrypt,
        InstrCode::TdesCbcDecrypt,
        InstrCode::Sha1,
        InstrCode::Sha256,
        InstrCode::HmacSha256,
        InstrCode::PkaModExp,
        InstrCode::Rng,
    ];
}

impl From<InstrCode> for u32 {
    fn from(code: InstrCode) -> u32 {
        code as u32
    }
}

impl TryFrom<u32> for InstrCode {
    type Error = C3Error;

    fn try_from(val: u32) -> C3Result<Self> {
        InstrCode::ALL
            .iter()
            .copied()
            .find(|code| *code as u32 == val)
            .ok_or(C3Error::DRIVER_UNSUPPORTED_INSTRUCTION)
    }
}

// HEADER
#[repr(C)]
#[derive(Default, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq, Clone)]
pub struct C3RequestHeader {
    pub chksum: u32,
    pub instr_code: u32,
    pub param_count: u32,
}

/// A request in its byte form: header followed by `param_count`
/// little-endian parameter words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub instr_code: u32,
    pub params: Vec<u32>,
}

impl WireRequest {
    pub fn new(instr_code: InstrCode, params: &[u32]) -> Self {
        Self {
            instr_code: instr_code.into(),
            params: params.to_vec(),
        }
    }

    /// Serializes the request, computing its checksum.
    pub fn to_bytes(&self) -> C3Result<Vec<u8>> {
        if self.params.len() > MAX_REQUEST_PARAMS {
            Err(C3Error::API_REQUEST_TOO_MANY_PARAMS)?
        }
        let hdr = C3RequestHeader {
            chksum: calc_checksum(self.instr_code, &self.params),
            instr_code: self.instr_code,
            param_count: self.params.len() as u32,
        };
        let mut bytes = Vec::with_capacity(size_of::<C3RequestHeader>() + self.params.len() * 4);
        bytes.extend_from_slice(hdr.as_bytes());
        for param in self.params.iter() {
            bytes.extend_from_slice(&param.to_le_bytes());
        }
        Ok(bytes)
    }

    /// Parses and checksum-verifies a request.
    pub fn parse(bytes: &[u8]) -> C3Result<Self> {
        let (hdr, rest) =
            C3RequestHeader::read_from_prefix(bytes).map_err(|_| C3Error::API_REQUEST_TOO_SHORT)?;
        let count = hdr.param_count as usize;
        if count > MAX_REQUEST_PARAMS {
            Err(C3Error::API_REQUEST_TOO_MANY_PARAMS)?
        }
        let body = rest
            .get(..count * 4)
            .ok_or(C3Error::API_REQUEST_TOO_SHORT)?;
        let params: Vec<u32> = body
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if !verify_checksum(hdr.chksum, hdr.instr_code, &params) {
            Err(C3Error::API_REQUEST_BAD_CHECKSUM)?
        }
        Ok(Self {
            instr_code: hdr.instr_code,
            params,
        })
    }
}
