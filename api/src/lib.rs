// Licensed under the Apache-2.0 license

mod checksum;

pub mod instr;
pub mod request;

pub use c3_error as error;

pub use checksum::{calc_checksum, verify_checksum};

pub use instr::{
    CipherAlgorithm, CipherDirection, CipherMode, DevAddr, HashAlgorithm, Instr, PkaOperation,
};
pub use request::{C3RequestHeader, InstrCode, WireRequest, MAX_REQUEST_PARAMS};
