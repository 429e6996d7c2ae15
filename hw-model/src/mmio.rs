// Licensed under the Apache-2.0 license

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use c3_drivers::RegisterIo;
use c3_emu_bus::Bus;
use c3_emu_types::RvSize;
use c3_registers::C3_MMIO_SIZE;

/// Value returned by reads that fault, as an unclaimed bus cycle would.
pub const BUS_FAULT_VALUE: u32 = 0xffff_ffff;

/// A register I/O implementation that reads and writes to a `c3_emu_bus::Bus`
/// mapped at `base`.
pub struct BusRegisterIo<TBus: Bus + Send> {
    bus: Arc<Mutex<TBus>>,
    base: u32,
}

impl<TBus: Bus + Send> BusRegisterIo<TBus> {
    pub fn new(bus: Arc<Mutex<TBus>>, base: u32) -> Self {
        Self { bus, base }
    }

    fn lock(&self) -> MutexGuard<'_, TBus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offset(&self, addr: u32) -> Option<u32> {
        addr.checked_sub(self.base)
            .filter(|offset| *offset < C3_MMIO_SIZE)
    }
}

impl<TBus: Bus + Send> RegisterIo for BusRegisterIo<TBus> {
    /// Loads the word at `addr` from the bus.
    ///
    /// Faulting reads are logged and return [`BUS_FAULT_VALUE`].
    fn read32(&self, addr: u32) -> u32 {
        let result = match self.offset(addr) {
            Some(offset) => self.lock().read(RvSize::Word, offset).ok(),
            None => None,
        };
        result.unwrap_or_else(|| {
            log::error!("c3-model: read of {addr:#010x} faulted");
            BUS_FAULT_VALUE
        })
    }

    /// Stores `val` to `addr` on the bus. Faulting writes are logged and
    /// dropped.
    fn write32(&self, addr: u32, val: u32) {
        let result = match self.offset(addr) {
            Some(offset) => self.lock().write(RvSize::Word, offset, val).ok(),
            None => None,
        };
        if result.is_none() {
            log::error!("c3-model: write of {val:#010x} to {addr:#010x} faulted");
        }
    }
}
