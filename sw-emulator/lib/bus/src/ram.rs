/*++

Licensed under the Apache-2.0 license.

File Name:

    ram.rs

Abstract:

    File contains implementation of RAM. Besides sized bus accesses, RAM
    supports bulk byte transfers, which device models use for DMA.

--*/

use crate::{Bus, BusError};
use c3_emu_types::{RvAddr, RvData, RvSize};

/// Random Access Memory Device
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    /// Create new RAM
    ///
    /// # Arguments
    ///
    /// * `data` - Data to be stored in the RAM
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn mmap_size(&self) -> RvAddr {
        self.data.len() as RvAddr
    }

    /// Immutable reference to data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, addr: RvAddr, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }

    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    ///
    /// # Error
    ///
    /// * `BusError::LoadAccessFault` - Any part of the range is out of bounds
    pub fn read_bytes(&self, addr: RvAddr, buf: &mut [u8]) -> Result<(), BusError> {
        let range = self
            .range(addr, buf.len())
            .ok_or(BusError::LoadAccessFault)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// Copies `buf` into memory starting at `addr`.
    ///
    /// # Error
    ///
    /// * `BusError::StoreAccessFault` - Any part of the range is out of bounds
    pub fn write_bytes(&mut self, addr: RvAddr, buf: &[u8]) -> Result<(), BusError> {
        let range = self
            .range(addr, buf.len())
            .ok_or(BusError::StoreAccessFault)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

impl Bus for Ram {
    /// Read data of specified size from given address
    ///
    /// # Error
    ///
    /// * `BusError::LoadAccessFault` - Out of bounds or invalid size
    /// * `BusError::LoadAddrMisaligned` - Address is not `size` aligned
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size == RvSize::Invalid {
            Err(BusError::LoadAccessFault)?
        }
        let len: usize = size.into();
        if addr as usize % len != 0 {
            Err(BusError::LoadAddrMisaligned)?
        }
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf[..len])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write data of specified size to given address
    ///
    /// # Error
    ///
    /// * `BusError::StoreAccessFault` - Out of bounds or invalid size
    /// * `BusError::StoreAddrMisaligned` - Address is not `size` aligned
    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size == RvSize::Invalid {
            Err(BusError::StoreAccessFault)?
        }
        let len: usize = size.into();
        if addr as usize % len != 0 {
            Err(BusError::StoreAddrMisaligned)?
        }
        self.write_bytes(addr, &val.to_le_bytes()[..len])
    }
}
