/*++

Licensed under the Apache-2.0 license.

File Name:

    program.rs

Abstract:

    File contains the instruction program held by a queue slot, and the
    status and delivery records attached to it.

--*/

use crate::call::PendingCall;
use c3_api::Instr;
use c3_error::{C3Error, C3Result};
use c3_registers::{IdsStatus, IDS_STATUS_FAIL_MASK};
use core::fmt;
use std::sync::Arc;
use tock_registers::LocalRegisterCopy;

/// Lifecycle of a program slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotState {
    Free,
    /// Held by a [`crate::SlotGuard`] while the program is built
    Filled,
    /// Submitted; waiting for the engine
    Queued,
    /// Executing on the engine
    Running,
    /// Completed; waiting for the deferred drain
    Done,
}

/// Completion status of a program, as reported by the engine status
/// register.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct CompletionStatus(u32);

impl CompletionStatus {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    fn reg(&self) -> LocalRegisterCopy<u32, IdsStatus::Register> {
        LocalRegisterCopy::new(self.0)
    }

    /// True unless one of the error, bus error or channel error bits is set.
    pub fn is_ok(&self) -> bool {
        self.raw() & IDS_STATUS_FAIL_MASK == 0
    }

    /// Opcode of the instruction that faulted.
    pub fn fault_opcode(&self) -> u8 {
        self.reg().read(IdsStatus::FAULT_OPCODE) as u8
    }

    /// Maps the status onto the driver error space.
    pub fn result(&self) -> C3Result<()> {
        let status = self.reg();
        if status.is_set(IdsStatus::BUS_ERROR) {
            Err(C3Error::DRIVER_HW_BUS_ERROR)
        } else if status.is_set(IdsStatus::CHANNEL_ERROR) {
            Err(C3Error::DRIVER_HW_CHANNEL_ERROR)
        } else if status.is_set(IdsStatus::ERROR) {
            Err(C3Error::DRIVER_HW_ERROR)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionStatus")
            .field("raw", &format_args!("{:#010x}", self.raw()))
            .field("ok", &self.is_ok())
            .finish()
    }
}

/// Completion callback; receives the opaque parameter registered with it.
pub type CallbackFn = Arc<dyn Fn(usize, CompletionStatus) + Send + Sync>;

/// How the result of a program reaches its submitter.
#[derive(Clone)]
pub enum Delivery {
    Callback(CallbackFn, usize),
    Waiter(Arc<PendingCall>),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Callback(_, param) => f.debug_tuple("Callback").field(param).finish(),
            Delivery::Waiter(_) => f.write_str("Waiter"),
        }
    }
}

/// An encoded instruction stream.
#[derive(Debug, Default, Clone)]
pub struct Program {
    words: Vec<u32>,
    instructions: usize,
}

impl Program {
    /// Validates and appends `instr`.
    pub fn push(&mut self, instr: Instr) -> C3Result<()> {
        instr.encode(&mut self.words)?;
        self.instructions += 1;
        Ok(())
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    /// Number of instructions, including the terminating Stop once sealed.
    pub fn instructions(&self) -> usize {
        self.instructions
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Terminates the program and checks it fits in `capacity` bytes.
    pub(crate) fn seal(&mut self, capacity: usize) -> C3Result<()> {
        self.push(Instr::Stop)?;
        if self.byte_len() > capacity {
            Err(C3Error::DRIVER_PROGRAM_TOO_LARGE)?
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.words.clear();
        self.instructions = 0;
    }
}
