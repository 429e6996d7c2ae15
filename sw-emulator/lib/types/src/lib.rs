/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the C3 Emulator Types library.

--*/

mod bus;

pub use crate::bus::{Bus, BusError};

/// Bus data width
pub type RvData = u32;

/// Bus address width
pub type RvAddr = u32;

/// Bus IO Operation size
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum RvSize {
    Byte = 1,
    HalfWord = 2,
    Word = 4,
    Invalid,
}

impl From<RvSize> for usize {
    /// Width of the access in bytes.
    ///
    /// # Panics
    ///
    /// Panics for `RvSize::Invalid`, which has no width.
    fn from(val: RvSize) -> usize {
        match val {
            RvSize::Byte => 1,
            RvSize::HalfWord => 2,
            RvSize::Word => 4,
            RvSize::Invalid => panic!("RvSize::Invalid has no width"),
        }
    }
}

impl From<usize> for RvSize {
    fn from(val: usize) -> RvSize {
        match val {
            1 => RvSize::Byte,
            2 => RvSize::HalfWord,
            4 => RvSize::Word,
            _ => RvSize::Invalid,
        }
    }
}
