/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the C3 stack for error handling

--*/
use core::convert::From;
use core::fmt;
use core::num::{NonZeroU32, TryFromIntError};

/// C3 Error Type
/// Derives debug, copy, clone, eq, and partial eq
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct C3Error(pub NonZeroU32);

/// Error classes surfaced to the callers of the request façade.
///
/// The class of an error code is carried in its upper 16 bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Bad instruction code, null buffer, oversized buffer or program.
    InvalidArgument,
    /// Engine backpressure; transient, retry at the transport layer.
    QueueFull,
    /// Completion status reported a device fault.
    HardwareError,
    /// DMA or bookkeeping allocation failed.
    OutOfMemory,
    /// The wait was interrupted; cleanup has been handed to the completion path.
    Signalled,
    /// Internal invariant violation.
    Internal,
}

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: C3Error = C3Error::new_const($value);
        )*

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }

        /// Returns the doc string of a known error code.
        pub fn description(&self) -> &'static str {
            $(
                if self.0.get() == $value {
                    return $doc;
                }
            )*
            "Unknown error"
        }
    };
}

impl C3Error {
    const CLASS_INVALID_ARGUMENT: u32 = 0x0001;
    const CLASS_QUEUE_FULL: u32 = 0x0002;
    const CLASS_HARDWARE: u32 = 0x0003;
    const CLASS_OUT_OF_MEMORY: u32 = 0x0004;
    const CLASS_SIGNALLED: u32 = 0x0005;

    /// Create a C3 error; intended to only be used from const contexts, as we don't want
    /// runtime panics if val is zero. The preferred way to get a C3Error from a u32 is to
    /// use `C3Error::try_from()` from the `TryFrom` trait impl.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("C3Error cannot be 0"),
        }
    }

    /// Returns the error class this code belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self.0.get() >> 16 {
            Self::CLASS_INVALID_ARGUMENT => ErrorKind::InvalidArgument,
            Self::CLASS_QUEUE_FULL => ErrorKind::QueueFull,
            Self::CLASS_HARDWARE => ErrorKind::HardwareError,
            Self::CLASS_OUT_OF_MEMORY => ErrorKind::OutOfMemory,
            Self::CLASS_SIGNALLED => ErrorKind::Signalled,
            _ => ErrorKind::Internal,
        }
    }

    /// Transient errors may succeed when retried by the caller's transport.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::QueueFull | ErrorKind::Signalled)
    }

    // Use the macro to define all error constants
    define_error_constants![
        (
            DRIVER_INVALID_ENGINE,
            0x0001_0001,
            "Driver Error: engine index out of range"
        ),
        (
            DRIVER_NULL_BUFFER,
            0x0001_0002,
            "Driver Error: null buffer parameter"
        ),
        (
            DRIVER_BUFFER_TOO_LARGE,
            0x0001_0003,
            "Driver Error: buffer exceeds the maximum DMA transfer size"
        ),
        (
            DRIVER_ZERO_LENGTH_BUFFER,
            0x0001_0004,
            "Driver Error: zero length buffer"
        ),
        (
            DRIVER_PROGRAM_TOO_LARGE,
            0x0001_0005,
            "Driver Error: program exceeds the slot capacity"
        ),
        (
            DRIVER_UNSUPPORTED_INSTRUCTION,
            0x0001_0006,
            "Driver Error: unsupported instruction code"
        ),
        (
            DRIVER_PARAM_COUNT_MISMATCH,
            0x0001_0007,
            "Driver Error: parameter count does not match the instruction"
        ),
        (
            DRIVER_PARAM_NOT_A_BUFFER,
            0x0001_0008,
            "Driver Error: a buffer parameter was expected"
        ),
        (
            DRIVER_PARAM_NOT_A_WORD,
            0x0001_0009,
            "Driver Error: a word parameter was expected"
        ),
        (
            DRIVER_BUFFER_SIZE_MISMATCH,
            0x0001_000A,
            "Driver Error: buffer is smaller than the declared size"
        ),
        (
            DRIVER_INVALID_SIZE_PARAM,
            0x0001_000B,
            "Driver Error: size parameter out of range"
        ),
        (
            API_INSTR_INVALID_KEY_LEN,
            0x0001_1001,
            "API Error: invalid key length for the algorithm"
        ),
        (
            API_INSTR_INVALID_DATA_LEN,
            0x0001_1002,
            "API Error: data length is not a multiple of the block size"
        ),
        (
            API_INSTR_FIELD_OVERFLOW,
            0x0001_1003,
            "API Error: instruction field does not fit its encoding"
        ),
        (
            API_INSTR_INVALID_OPCODE,
            0x0001_1004,
            "API Error: unknown instruction opcode"
        ),
        (
            API_INSTR_TRUNCATED,
            0x0001_1005,
            "API Error: instruction stream truncated"
        ),
        (
            API_INSTR_INVALID_MODIFIER,
            0x0001_1006,
            "API Error: invalid instruction modifier"
        ),
        (
            API_REQUEST_BAD_CHECKSUM,
            0x0001_2001,
            "API Error: request checksum mismatch"
        ),
        (
            API_REQUEST_TOO_SHORT,
            0x0001_2002,
            "API Error: request shorter than its header"
        ),
        (
            API_REQUEST_TOO_MANY_PARAMS,
            0x0001_2003,
            "API Error: request carries more than 32 parameters"
        ),
        (
            DRIVER_QUEUE_FULL,
            0x0002_0001,
            "Driver Error: engine program queue is full"
        ),
        (
            DRIVER_HW_ERROR,
            0x0003_0001,
            "Hardware Error: engine reported an execution error"
        ),
        (
            DRIVER_HW_BUS_ERROR,
            0x0003_0002,
            "Hardware Error: engine reported a bus error"
        ),
        (
            DRIVER_HW_CHANNEL_ERROR,
            0x0003_0003,
            "Hardware Error: engine reported a channel error"
        ),
        (
            DRIVER_DMA_ALLOC_FAILED,
            0x0004_0001,
            "Driver Error: DMA memory allocation failed"
        ),
        (
            DRIVER_DMA_MAP_FAILED,
            0x0004_0002,
            "Driver Error: DMA address translation failed"
        ),
        (
            DRIVER_SLOT_ALLOC_FAILED,
            0x0004_0003,
            "Driver Error: program slot pool allocation failed"
        ),
        (
            DRIVER_CALL_SIGNALLED,
            0x0005_0001,
            "Driver Error: wait interrupted by a signal, call restarted"
        ),
        (
            DRIVER_INTERNAL,
            0x000F_0001,
            "Driver Error: internal error"
        ),
        (
            DRIVER_QUEUE_CORRUPTED,
            0x000F_0002,
            "Driver Error: program queue invariant violated"
        ),
        (
            DRIVER_DEVICE_NOT_FOUND,
            0x000F_0003,
            "Driver Error: device identity register mismatch"
        ),
        (
            DRIVER_CALL_STATE,
            0x000F_0004,
            "Driver Error: pending call in an unexpected state"
        ),
    ];
}

impl fmt::Display for C3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}: {}", self.0.get(), self.description())
    }
}

impl std::error::Error for C3Error {}

impl From<core::num::NonZeroU32> for crate::C3Error {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::C3Error(val)
    }
}

impl From<C3Error> for core::num::NonZeroU32 {
    fn from(val: C3Error) -> Self {
        val.0
    }
}

impl From<C3Error> for u32 {
    fn from(val: C3Error) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for C3Error {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(C3Error(val)),
            Err(err) => Err(err),
        }
    }
}

pub type C3Result<T> = Result<T, C3Error>;
