/*++

Licensed under the Apache-2.0 license.

File Name:

    dma.rs

Abstract:

    File contains the DMA buffer tracker: the mappings attached to a
    program slot and the collaborator that creates them.

--*/

use c3_api::instr::MAX_DATA_LEN;
use c3_error::{C3Error, C3Result};
use log::trace;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Alignment the device requires of a directly mapped buffer.
pub const DMA_ALIGN: usize = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DmaDirection {
    ToDevice,
    FromDevice,
    Bidirectional,
}

impl DmaDirection {
    pub fn to_device(&self) -> bool {
        matches!(self, DmaDirection::ToDevice | DmaDirection::Bidirectional)
    }

    pub fn from_device(&self) -> bool {
        matches!(self, DmaDirection::FromDevice | DmaDirection::Bidirectional)
    }

    /// Direction of a single mapping serving both `self` and `other`.
    pub fn merge(self, other: DmaDirection) -> DmaDirection {
        if self == other {
            self
        } else {
            DmaDirection::Bidirectional
        }
    }
}

/// CPU memory a mapping is made from. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct DmaBuffer(Arc<Mutex<Vec<u8>>>);

impl DmaBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(data)))
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// True when both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &DmaBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Mapping services of the platform.
pub trait DmaOps: Send + Sync {
    /// Makes `buf` visible to the device and returns its device address.
    /// Data is transferred to the device when `dir.to_device()`.
    fn map(&self, buf: &[u8], dir: DmaDirection) -> C3Result<u32>;

    /// Tears down a mapping created by [`DmaOps::map`]. Data is transferred
    /// back into `buf` when `dir.from_device()`.
    fn unmap(&self, dev_addr: u32, buf: &mut [u8], dir: DmaDirection);

    /// Allocates `len` bytes of memory visible to both CPU and device.
    fn alloc_coherent(&self, len: u32) -> C3Result<u32>;

    fn free_coherent(&self, dev_addr: u32);

    fn write_coherent(&self, dev_addr: u32, bytes: &[u8]) -> C3Result<()>;
}

/// One buffer attached to a program slot.
#[derive(Debug)]
pub struct DmaMapping {
    pub buffer: DmaBuffer,
    pub dev_addr: u32,
    pub len: u32,
    pub dir: DmaDirection,
}

/// The mappings attached to one program slot.
#[derive(Debug, Default)]
pub struct DmaMappingList {
    mappings: Vec<DmaMapping>,
}

impl DmaMappingList {
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DmaMapping> {
        self.mappings.iter()
    }

    /// Maps the first `len` bytes of `buf` and attaches the mapping.
    ///
    /// On any failure every mapping already attached is released, newest
    /// first, before the error is returned.
    ///
    /// # Arguments
    ///
    /// * `ops` - Platform mapping services
    /// * `buf` - Buffer to map; `None` is a null buffer
    /// * `len` - Number of bytes to map
    /// * `dir` - Transfer direction
    ///
    /// # Returns
    ///
    /// * `u32` - Device address of the mapping
    pub fn prepare_dma(
        &mut self,
        ops: &dyn DmaOps,
        buf: Option<&DmaBuffer>,
        len: u32,
        dir: DmaDirection,
    ) -> C3Result<u32> {
        match Self::map_one(ops, buf, len, dir) {
            Ok(mapping) => {
                let dev_addr = mapping.dev_addr;
                trace!(
                    "c3: mapped {len} bytes {dir:?} at {dev_addr:#010x} ({} attached)",
                    self.mappings.len() + 1
                );
                self.mappings.push(mapping);
                Ok(dev_addr)
            }
            Err(err) => {
                self.release_all(ops);
                Err(err)
            }
        }
    }

    fn map_one(
        ops: &dyn DmaOps,
        buf: Option<&DmaBuffer>,
        len: u32,
        dir: DmaDirection,
    ) -> C3Result<DmaMapping> {
        let buffer = buf.ok_or(C3Error::DRIVER_NULL_BUFFER)?;
        if len == 0 {
            Err(C3Error::DRIVER_ZERO_LENGTH_BUFFER)?
        }
        if len > MAX_DATA_LEN {
            Err(C3Error::DRIVER_BUFFER_TOO_LARGE)?
        }
        let dev_addr = {
            let data = buffer.lock();
            let bytes = data
                .get(..len as usize)
                .ok_or(C3Error::DRIVER_BUFFER_SIZE_MISMATCH)?;
            ops.map(bytes, dir)?
        };
        Ok(DmaMapping {
            buffer: buffer.clone(),
            dev_addr,
            len,
            dir,
        })
    }

    /// Unmaps every attached mapping, newest first, and empties the list.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of mappings released
    pub fn release_all(&mut self, ops: &dyn DmaOps) -> usize {
        let mut released = 0;
        while let Some(mapping) = self.mappings.pop() {
            let mut data = mapping.buffer.lock();
            let len = (mapping.len as usize).min(data.len());
            ops.unmap(mapping.dev_addr, &mut data[..len], mapping.dir);
            released += 1;
        }
        if released > 0 {
            trace!("c3: released {released} mappings");
        }
        released
    }
}

/// How a caller buffer reaches the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DmaStrategy {
    /// The caller's memory is mapped as is.
    DirectMap,

    /// The caller's memory is gathered into one aligned bounce buffer,
    /// mapped, and scattered back on completion.
    CopyThenMap,
}

impl DmaStrategy {
    /// Picks the strategy for memory made of fragments of the given lengths.
    pub fn select(fragment_lens: &[usize]) -> DmaStrategy {
        match fragment_lens {
            [len] if len % DMA_ALIGN == 0 => DmaStrategy::DirectMap,
            _ => DmaStrategy::CopyThenMap,
        }
    }
}
