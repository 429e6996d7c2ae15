/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the C3 crypto-offload driver.

--*/

mod call;
mod config;
mod dma;
mod driver;
mod encoders;
mod facade;
mod instr_params;
mod irq;
mod program;
mod queue;
mod regs;

#[cfg(test)]
mod testing;

pub use c3_error::{C3Error, C3Result, ErrorKind};

pub use call::{PendingCall, Signal, States as CallState};
pub use config::{DeferredMode, DriverConfig};
pub use dma::{DmaBuffer, DmaDirection, DmaMapping, DmaMappingList, DmaOps, DmaStrategy};
pub use driver::{BusDiscovery, C3Driver, DriverStats, StatsSnapshot};
pub use facade::{BlockingCall, Request, RequestParam, Response, UserBuffer};
pub use instr_params::{BufferDir, BufferSize, InstrParams, ParamKind, C3_INSTR_PARAMS};
pub use irq::IrqReturn;
pub use program::{CallbackFn, CompletionStatus, Delivery, Program, SlotState};
pub use queue::{Engine, SlotGuard};
pub use regs::{C3Regs, RegisterIo};
