/*++

Licensed under the Apache-2.0 license.

File Name:

    dma.rs

Abstract:

    File contains the DMA mapper of the hardware model. Mappings are bounce
    regions allocated from the emulated system memory.

--*/

use c3_drivers::{DmaDirection, DmaOps};
use c3_emu_periph::SharedSystemMemory;
use c3_error::{C3Error, C3Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MapperState {
    /// Live streaming mappings and their lengths
    live: HashMap<u32, usize>,

    /// Live coherent regions and their lengths
    coherent: HashMap<u32, usize>,

    maps: u64,
    unmaps: u64,

    /// Unmaps of addresses that were not mapped
    bad_unmaps: u64,

    /// Map call (counting from 1) that is made to fail
    fail_map_at: Option<u64>,
}

/// Counters of the mapper.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct DmaCounters {
    pub maps: u64,
    pub unmaps: u64,
    pub bad_unmaps: u64,
    pub live_mappings: usize,
    pub live_coherent: usize,
}

/// Maps host buffers by copying them into system memory the device can
/// reach.
pub struct SystemMemoryDma {
    memory: SharedSystemMemory,
    state: Mutex<MapperState>,
}

impl SystemMemoryDma {
    pub fn new(memory: SharedSystemMemory) -> Self {
        Self {
            memory,
            state: Mutex::new(MapperState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the `k`-th map call from now on (counting from 1) fail.
    pub fn inject_map_failure(&self, k: u64) {
        let mut state = self.lock();
        state.fail_map_at = Some(state.maps + k);
    }

    pub fn counters(&self) -> DmaCounters {
        let state = self.lock();
        DmaCounters {
            maps: state.maps,
            unmaps: state.unmaps,
            bad_unmaps: state.bad_unmaps,
            live_mappings: state.live.len(),
            live_coherent: state.coherent.len(),
        }
    }

    /// Reads `len` bytes of a region as the device sees it.
    pub fn device_read(&self, dev_addr: u32, len: usize) -> C3Result<Vec<u8>> {
        self.memory
            .lock()
            .read_vec(dev_addr, len)
            .map_err(|_| C3Error::DRIVER_DMA_MAP_FAILED)
    }
}

impl DmaOps for SystemMemoryDma {
    fn map(&self, buf: &[u8], dir: DmaDirection) -> C3Result<u32> {
        let mut state = self.lock();
        state.maps += 1;
        if state.fail_map_at == Some(state.maps) {
            log::debug!("c3-model: injected failure of map {}", state.maps);
            Err(C3Error::DRIVER_DMA_MAP_FAILED)?
        }

        let mut memory = self.memory.lock();
        let dev_addr = memory
            .alloc(buf.len() as u32)
            .ok_or(C3Error::DRIVER_DMA_MAP_FAILED)?;
        let written = if dir.to_device() {
            memory.write_bytes(dev_addr, buf)
        } else {
            memory.write_bytes(dev_addr, &vec![0; buf.len()])
        };
        if written.is_err() {
            memory.free(dev_addr);
            Err(C3Error::DRIVER_DMA_MAP_FAILED)?
        }
        state.live.insert(dev_addr, buf.len());
        Ok(dev_addr)
    }

    fn unmap(&self, dev_addr: u32, buf: &mut [u8], dir: DmaDirection) {
        let mut state = self.lock();
        let Some(len) = state.live.remove(&dev_addr) else {
            state.bad_unmaps += 1;
            log::error!("c3-model: unmap of {dev_addr:#010x} which is not mapped");
            return;
        };
        state.unmaps += 1;

        let mut memory = self.memory.lock();
        if dir.from_device() {
            let count = len.min(buf.len());
            if memory.read_bytes(dev_addr, &mut buf[..count]).is_err() {
                log::error!("c3-model: copy back from {dev_addr:#010x} faulted");
            }
        }
        memory.free(dev_addr);
    }

    fn alloc_coherent(&self, len: u32) -> C3Result<u32> {
        let dev_addr = self
            .memory
            .lock()
            .alloc(len)
            .ok_or(C3Error::DRIVER_DMA_ALLOC_FAILED)?;
        self.lock().coherent.insert(dev_addr, len as usize);
        Ok(dev_addr)
    }

    fn free_coherent(&self, dev_addr: u32) {
        if self.lock().coherent.remove(&dev_addr).is_some() {
            self.memory.lock().free(dev_addr);
        } else {
            log::error!("c3-model: free of unknown coherent region {dev_addr:#010x}");
        }
    }

    fn write_coherent(&self, dev_addr: u32, bytes: &[u8]) -> C3Result<()> {
        let len = self
            .lock()
            .coherent
            .get(&dev_addr)
            .copied()
            .ok_or(C3Error::DRIVER_DMA_MAP_FAILED)?;
        if bytes.len() > len {
            Err(C3Error::DRIVER_PROGRAM_TOO_LARGE)?
        }
        self.memory
            .lock()
            .write_bytes(dev_addr, bytes)
            .map_err(|_| C3Error::DRIVER_DMA_MAP_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_round_trip() {
        let memory = SharedSystemMemory::new(0x1000);
        let dma = SystemMemoryDma::new(memory.clone());

        let addr = dma.map(&[1, 2, 3, 4], DmaDirection::Bidirectional).unwrap();
        assert_eq!(dma.device_read(addr, 4).unwrap(), vec![1, 2, 3, 4]);
        memory.lock().write_bytes(addr, &[9, 9]).unwrap();

        let mut back = [0u8; 4];
        dma.unmap(addr, &mut back, DmaDirection::Bidirectional);
        assert_eq!(back, [9, 9, 3, 4]);
        assert_eq!(memory.lock().live_allocations(), 0);

        // A second unmap is counted, not applied.
        dma.unmap(addr, &mut back, DmaDirection::Bidirectional);
        let counters = dma.counters();
        assert_eq!(counters.maps, 1);
        assert_eq!(counters.unmaps, 1);
        assert_eq!(counters.bad_unmaps, 1);
    }

    #[test]
    fn test_to_device_does_not_copy_back() {
        let dma = SystemMemoryDma::new(SharedSystemMemory::new(0x1000));
        let addr = dma.map(&[5; 8], DmaDirection::FromDevice).unwrap();
        assert_eq!(dma.device_read(addr, 8).unwrap(), vec![0; 8]);
        let addr2 = dma.map(&[6; 8], DmaDirection::ToDevice).unwrap();
        let mut back = [0u8; 8];
        dma.unmap(addr2, &mut back, DmaDirection::ToDevice);
        assert_eq!(back, [0; 8]);
        dma.unmap(addr, &mut back, DmaDirection::FromDevice);
        assert_eq!(dma.counters().live_mappings, 0);
    }

    #[test]
    fn test_exhaustion_and_injection() {
        let dma = SystemMemoryDma::new(SharedSystemMemory::new(64));
        assert_eq!(
            dma.map(&[0; 128], DmaDirection::ToDevice),
            Err(C3Error::DRIVER_DMA_MAP_FAILED)
        );
        assert_eq!(dma.alloc_coherent(128), Err(C3Error::DRIVER_DMA_ALLOC_FAILED));

        dma.inject_map_failure(2);
        let first = dma.map(&[0; 4], DmaDirection::ToDevice).unwrap();
        assert_eq!(
            dma.map(&[0; 4], DmaDirection::ToDevice),
            Err(C3Error::DRIVER_DMA_MAP_FAILED)
        );
        dma.unmap(first, &mut [0; 4], DmaDirection::ToDevice);
        assert_eq!(dma.counters().live_mappings, 0);
    }

    #[test]
    fn test_coherent() {
        let dma = SystemMemoryDma::new(SharedSystemMemory::new(0x1000));
        let addr = dma.alloc_coherent(16).unwrap();
        dma.write_coherent(addr, &[7; 16]).unwrap();
        assert_eq!(dma.device_read(addr, 16).unwrap(), vec![7; 16]);
        assert_eq!(
            dma.write_coherent(addr, &[0; 32]),
            Err(C3Error::DRIVER_PROGRAM_TOO_LARGE)
        );
        dma.free_coherent(addr);
        assert_eq!(dma.counters().live_coherent, 0);
    }
}
