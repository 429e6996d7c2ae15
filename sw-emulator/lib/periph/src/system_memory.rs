/*++

Licensed under the Apache-2.0 license.

File Name:

    system_memory.rs

Abstract:

    File contains the system memory shared by the host and the C3
    accelerator, and the allocator that hands out device-visible regions.

--*/

use c3_emu_bus::{Bus, BusError, Ram};
use c3_emu_types::{RvAddr, RvData, RvSize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Device address of the first byte of system memory. Addresses below it
/// (including the null address) fault.
pub const SYSTEM_MEMORY_BASE: RvAddr = 0x1000_0000;

/// Alignment of every allocation.
pub const ALLOC_ALIGN: u32 = 16;

/// System memory with a first-fit allocator.
pub struct SystemMemory {
    ram: Ram,

    /// Free regions keyed by offset, coalesced
    free: BTreeMap<u32, u32>,

    /// Live allocations keyed by offset
    allocated: BTreeMap<u32, u32>,
}

impl SystemMemory {
    pub fn new(size: u32) -> Self {
        let size = size - size % ALLOC_ALIGN;
        let mut free = BTreeMap::new();
        if size > 0 {
            free.insert(0, size);
        }
        Self {
            ram: Ram::new(vec![0; size as usize]),
            free,
            allocated: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.ram.mmap_size()
    }

    /// Allocates `len` bytes and returns their device address, or None when
    /// no free region is large enough.
    pub fn alloc(&mut self, len: u32) -> Option<RvAddr> {
        let len = len.max(1).checked_next_multiple_of(ALLOC_ALIGN)?;
        let (&offset, &free_len) = self.free.iter().find(|(_, free_len)| **free_len >= len)?;
        self.free.remove(&offset);
        if free_len > len {
            self.free.insert(offset + len, free_len - len);
        }
        self.allocated.insert(offset, len);
        Some(SYSTEM_MEMORY_BASE + offset)
    }

    /// Returns the region starting at `addr` to the free list.
    ///
    /// Returns false if `addr` is not the start of a live allocation.
    pub fn free(&mut self, addr: RvAddr) -> bool {
        let Some(offset) = addr.checked_sub(SYSTEM_MEMORY_BASE) else {
            return false;
        };
        let Some(len) = self.allocated.remove(&offset) else {
            return false;
        };
        let end = offset + len;
        let mut start = offset;
        let mut total = len;
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                start = prev;
                total += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&end) {
            total += next_len;
        }
        self.free.insert(start, total);
        true
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.allocated.len()
    }

    /// Total bytes held by live allocations.
    pub fn allocated_bytes(&self) -> u32 {
        self.allocated.values().sum()
    }

    fn offset(addr: RvAddr) -> Option<RvAddr> {
        addr.checked_sub(SYSTEM_MEMORY_BASE)
    }

    /// Copies `buf.len()` bytes at device address `addr` into `buf`.
    pub fn read_bytes(&self, addr: RvAddr, buf: &mut [u8]) -> Result<(), BusError> {
        let offset = Self::offset(addr).ok_or(BusError::LoadAccessFault)?;
        self.ram.read_bytes(offset, buf)
    }

    /// Copies `buf` to device address `addr`.
    pub fn write_bytes(&mut self, addr: RvAddr, buf: &[u8]) -> Result<(), BusError> {
        let offset = Self::offset(addr).ok_or(BusError::StoreAccessFault)?;
        self.ram.write_bytes(offset, buf)
    }

    /// Reads `len` bytes at `addr` into a new vector.
    pub fn read_vec(&self, addr: RvAddr, len: usize) -> Result<Vec<u8>, BusError> {
        let mut buf = vec![0; len];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }
}

impl Bus for SystemMemory {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let offset = Self::offset(addr).ok_or(BusError::LoadAccessFault)?;
        self.ram.read(size, offset)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let offset = Self::offset(addr).ok_or(BusError::StoreAccessFault)?;
        self.ram.write(size, offset, val)
    }
}

/// Handle to system memory shared between the host side and the device.
#[derive(Clone)]
pub struct SharedSystemMemory(Arc<Mutex<SystemMemory>>);

impl SharedSystemMemory {
    pub fn new(size: u32) -> Self {
        Self(Arc::new(Mutex::new(SystemMemory::new(size))))
    }

    pub fn lock(&self) -> MutexGuard<'_, SystemMemory> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_first_fit() {
        let mut mem = SystemMemory::new(256);
        let a = mem.alloc(10).unwrap();
        let b = mem.alloc(16).unwrap();
        let c = mem.alloc(40).unwrap();
        assert_eq!(a, SYSTEM_MEMORY_BASE);
        assert_eq!(b, SYSTEM_MEMORY_BASE + 16);
        assert_eq!(c, SYSTEM_MEMORY_BASE + 32);
        assert_eq!(mem.allocated_bytes(), 16 + 16 + 48);

        assert!(mem.free(b));
        // Too big for the hole left by `b`.
        assert_eq!(mem.alloc(17), Some(SYSTEM_MEMORY_BASE + 80));
        // Fits the hole.
        assert_eq!(mem.alloc(3), Some(b));
        assert_eq!(mem.live_allocations(), 4);
    }

    #[test]
    fn test_free_coalesces() {
        let mut mem = SystemMemory::new(64);
        let regions: Vec<_> = (0..4).map(|_| mem.alloc(16).unwrap()).collect();
        assert_eq!(mem.alloc(1), None);

        assert!(mem.free(regions[0]));
        assert!(mem.free(regions[2]));
        assert!(mem.free(regions[1]));
        assert_eq!(mem.alloc(48), Some(SYSTEM_MEMORY_BASE));
        assert!(mem.free(SYSTEM_MEMORY_BASE));
        assert!(mem.free(regions[3]));
        assert_eq!(mem.live_allocations(), 0);
        assert_eq!(mem.alloc(64), Some(SYSTEM_MEMORY_BASE));
    }

    #[test]
    fn test_free_unknown() {
        let mut mem = SystemMemory::new(64);
        let a = mem.alloc(32).unwrap();
        assert!(!mem.free(a + 16));
        assert!(!mem.free(0));
        assert!(mem.free(a));
        assert!(!mem.free(a));
    }

    #[test]
    fn test_access() {
        let mem = SharedSystemMemory::new(64);
        let addr = mem.lock().alloc(8).unwrap();
        mem.lock().write_bytes(addr, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.lock().read(RvSize::Word, addr), Ok(0x0403_0201));
        assert_eq!(mem.lock().read_vec(addr, 2), Ok(vec![1, 2]));
        assert_eq!(
            mem.lock().read(RvSize::Word, 0),
            Err(BusError::LoadAccessFault)
        );
        assert_eq!(
            mem.lock().write_bytes(SYSTEM_MEMORY_BASE + 62, &[0; 4]),
            Err(BusError::StoreAccessFault)
        );
    }
}
