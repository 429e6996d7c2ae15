/*++

Licensed under the Apache-2.0 license.

File Name:

    regs.rs

Abstract:

    File contains the register access layer of the C3 driver.

--*/

use c3_registers::{offsets, GlobalStatus, Id, IdsStatus};
use std::sync::Arc;
use tock_registers::LocalRegisterCopy;

/// 32-bit register access provided by the bus layer.
///
/// Addresses are absolute; [`C3Regs`] adds the device base.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, addr: u32) -> u32;
    fn write32(&self, addr: u32, val: u32);
}

/// Typed view of the C3 register window.
#[derive(Clone)]
pub struct C3Regs {
    io: Arc<dyn RegisterIo>,
    base: u32,
}

impl C3Regs {
    pub fn new(io: Arc<dyn RegisterIo>, base: u32) -> Self {
        Self { io, base }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Equivalent of `register_read(base, offset)`.
    pub fn read(&self, offset: u32) -> u32 {
        self.io.read32(self.base + offset)
    }

    /// Equivalent of `register_write(base, offset, val)`.
    pub fn write(&self, offset: u32, val: u32) {
        self.io.write32(self.base + offset, val)
    }

    pub fn id(&self) -> LocalRegisterCopy<u32, Id::Register> {
        LocalRegisterCopy::new(self.read(offsets::ID))
    }

    pub fn global_status(&self) -> LocalRegisterCopy<u32, GlobalStatus::Register> {
        LocalRegisterCopy::new(self.read(offsets::GLOBAL_STATUS))
    }

    pub fn ids_status(&self, engine: usize) -> LocalRegisterCopy<u32, IdsStatus::Register> {
        LocalRegisterCopy::new(self.read(offsets::ids(engine, offsets::IDS_STATUS)))
    }

    /// Writes `status` back to the engine status register. IRQ_PENDING is
    /// write-one-to-clear.
    pub fn ack_ids_status(&self, engine: usize, status: LocalRegisterCopy<u32, IdsStatus::Register>) {
        self.write(offsets::ids(engine, offsets::IDS_STATUS), status.get())
    }

    /// Starts execution of the program at `addr` on `engine`.
    pub fn write_ip(&self, engine: usize, addr: u32) {
        self.write(offsets::ids(engine, offsets::IDS_IP), addr)
    }

    pub fn current_ip(&self, engine: usize) -> u32 {
        self.read(offsets::ids(engine, offsets::IDS_CURRENT_IP))
    }

    pub fn fault_addr(&self, engine: usize) -> u32 {
        self.read(offsets::ids(engine, offsets::IDS_FAULT_ADDR))
    }
}
