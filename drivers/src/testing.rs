/*++

Licensed under the Apache-2.0 license.

File Name:

    testing.rs

Abstract:

    File contains register and DMA fakes for the driver unit tests.

--*/

use crate::dma::{DmaDirection, DmaOps};
use crate::regs::RegisterIo;
use c3_error::{C3Error, C3Result};
use c3_registers::{offsets, IdsStatus, C3_HW_ID, C3_HW_REVISION, C3_MAX_ENGINES};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const STATUS_BUSY: u32 = 1 << 0;
const STATUS_DONE: u32 = 1 << 1;
const STATUS_IRQ: u32 = 1 << 8;

struct FakeRegistersState {
    hw_id: u32,
    status: [u32; C3_MAX_ENGINES],
    ip: [u32; C3_MAX_ENGINES],
    ip_writes: Vec<(usize, u32)>,
}

/// Register file that records instruction pointer writes and lets a test
/// play the engine.
pub struct FakeRegisters {
    state: Mutex<FakeRegistersState>,
}

impl FakeRegisters {
    pub fn new() -> Arc<Self> {
        Self::with_hw_id(C3_HW_ID)
    }

    pub fn with_hw_id(hw_id: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeRegistersState {
                hw_id,
                status: [0; C3_MAX_ENGINES],
                ip: [0; C3_MAX_ENGINES],
                ip_writes: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeRegistersState> {
        self.state.lock().unwrap()
    }

    pub fn set_hw_id(&self, hw_id: u32) {
        self.lock().hw_id = hw_id;
    }

    pub fn ip_writes(&self) -> Vec<(usize, u32)> {
        self.lock().ip_writes.clone()
    }

    /// Finishes the program running on `engine` with the extra status
    /// `bits` and raises its interrupt.
    pub fn finish(&self, engine: usize, bits: u32) {
        let mut state = self.lock();
        state.status[engine] = (state.status[engine] & !STATUS_BUSY) | STATUS_DONE | STATUS_IRQ | bits;
    }

    /// Raises the interrupt of `engine` without any program finishing.
    pub fn raise_irq(&self, engine: usize) {
        self.lock().status[engine] |= STATUS_IRQ;
    }

    pub fn status(&self, engine: usize) -> u32 {
        self.lock().status[engine]
    }
}

fn decode(addr: u32) -> Option<(usize, u32)> {
    let rel = addr.checked_sub(offsets::IDS_BASE)?;
    let engine = (rel / offsets::IDS_STRIDE) as usize;
    (engine < C3_MAX_ENGINES).then_some((engine, rel % offsets::IDS_STRIDE))
}

impl RegisterIo for FakeRegisters {
    fn read32(&self, addr: u32) -> u32 {
        let state = self.lock();
        match addr {
            offsets::ID => state.hw_id << 16 | C3_HW_REVISION,
            offsets::GLOBAL_STATUS => {
                let pending = state
                    .status
                    .iter()
                    .enumerate()
                    .filter(|(_, status)| *status & STATUS_IRQ != 0)
                    .fold(0, |acc, (i, _)| acc | 1 << i);
                state.hw_id << 16 | pending
            }
            _ => match decode(addr) {
                Some((engine, offsets::IDS_STATUS)) => state.status[engine],
                Some((engine, offsets::IDS_IP)) => state.ip[engine],
                _ => 0,
            },
        }
    }

    fn write32(&self, addr: u32, val: u32) {
        let mut state = self.lock();
        match decode(addr) {
            Some((engine, offsets::IDS_IP)) => {
                state.ip[engine] = val;
                state.status[engine] = STATUS_BUSY;
                state.ip_writes.push((engine, val));
            }
            Some((engine, offsets::IDS_STATUS)) => {
                if val & IdsStatus::IRQ_PENDING::SET.value != 0 {
                    state.status[engine] &= !STATUS_IRQ;
                }
            }
            _ => {}
        }
    }
}

#[derive(Default)]
struct FakeDmaState {
    next_addr: u32,
    maps: usize,
    fail_map_at: Option<usize>,
    fail_alloc: bool,
    unmaps: Vec<u32>,
    live: HashMap<u32, Vec<u8>>,
    coherent: HashMap<u32, Vec<u8>>,
}

/// Mapper that hands out fake device addresses and checks that every
/// mapping is torn down exactly once.
pub struct FakeDma {
    state: Mutex<FakeDmaState>,
}

impl FakeDma {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeDmaState {
                next_addr: 0x1000,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeDmaState> {
        self.state.lock().unwrap()
    }

    /// Makes the `k`-th map call (counting from 1) fail.
    pub fn fail_map_at(&self, k: usize) {
        self.lock().fail_map_at = Some(k);
    }

    pub fn fail_alloc(&self) {
        self.lock().fail_alloc = true;
    }

    pub fn map_count(&self) -> usize {
        self.lock().maps
    }

    pub fn unmap_count(&self) -> usize {
        self.lock().unmaps.len()
    }

    pub fn unmap_order(&self) -> Vec<u32> {
        self.lock().unmaps.clone()
    }

    pub fn live_mappings(&self) -> usize {
        self.lock().live.len()
    }

    /// Device addresses of the live mappings, oldest first.
    pub fn live_addrs(&self) -> Vec<u32> {
        let mut addrs: Vec<u32> = self.lock().live.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    /// Contents of a live mapping, as the device sees it.
    pub fn device_read(&self, addr: u32) -> Vec<u8> {
        self.lock().live[&addr].clone()
    }

    /// Writes into a live mapping as the device would.
    pub fn device_write(&self, addr: u32, bytes: &[u8]) {
        self.lock().live.get_mut(&addr).unwrap()[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn live_coherent(&self) -> usize {
        self.lock().coherent.len()
    }

    pub fn coherent_bytes(&self, addr: u32) -> Vec<u8> {
        self.lock().coherent[&addr].clone()
    }

    fn next_addr(state: &mut FakeDmaState, len: usize) -> u32 {
        let addr = state.next_addr;
        state.next_addr += (len as u32).next_multiple_of(16) + 16;
        addr
    }
}

impl DmaOps for FakeDma {
    fn map(&self, buf: &[u8], dir: DmaDirection) -> C3Result<u32> {
        let mut state = self.lock();
        state.maps += 1;
        if state.fail_map_at == Some(state.maps) {
            Err(C3Error::DRIVER_DMA_MAP_FAILED)?
        }
        let addr = Self::next_addr(&mut state, buf.len());
        let data = if dir.to_device() {
            buf.to_vec()
        } else {
            vec![0; buf.len()]
        };
        state.live.insert(addr, data);
        Ok(addr)
    }

    fn unmap(&self, dev_addr: u32, buf: &mut [u8], dir: DmaDirection) {
        let mut state = self.lock();
        let data = state
            .live
            .remove(&dev_addr)
            .unwrap_or_else(|| panic!("unmap of {dev_addr:#x} which is not mapped"));
        if dir.from_device() {
            buf.copy_from_slice(&data[..buf.len()]);
        }
        state.unmaps.push(dev_addr);
    }

    fn alloc_coherent(&self, len: u32) -> C3Result<u32> {
        let mut state = self.lock();
        if state.fail_alloc {
            Err(C3Error::DRIVER_DMA_ALLOC_FAILED)?
        }
        let addr = Self::next_addr(&mut state, len as usize);
        state.coherent.insert(addr, vec![0; len as usize]);
        Ok(addr)
    }

    fn free_coherent(&self, dev_addr: u32) {
        self.lock().coherent.remove(&dev_addr);
    }

    fn write_coherent(&self, dev_addr: u32, bytes: &[u8]) -> C3Result<()> {
        let mut state = self.lock();
        let region = state
            .coherent
            .get_mut(&dev_addr)
            .ok_or(C3Error::DRIVER_DMA_MAP_FAILED)?;
        region
            .get_mut(..bytes.len())
            .ok_or(C3Error::DRIVER_DMA_MAP_FAILED)?
            .copy_from_slice(bytes);
        Ok(())
    }
}
