//! DRAM model and region bookkeeping
//!
//! All buffers shared between the CPU and the DMA/compute engines live in
//! one flat DRAM addressed by absolute bus addresses. Regions are handed
//! out by the bump arena in [`arena`] following the plan in [`layout`].

pub mod arena;
pub mod layout;

pub use arena::{aligned_span, DramArena, BUFFER_ALIGNMENT};
pub use layout::{MemoryLayout, DESCRIPTOR_SIZE};

use serde::Serialize;

use crate::error::HardwareError;

/// Named window into DRAM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub name: String,
    pub address: usize,
    pub len: usize,
}

impl Region {
    pub fn new(name: impl Into<String>, address: usize, len: usize) -> Self {
        Self {
            name: name.into(),
            address,
            len,
        }
    }

    pub fn end(&self) -> usize {
        self.address + self.len
    }

    /// Sub-region `[offset, offset + len)` keeping the parent name
    pub fn slice(&self, offset: usize, len: usize) -> Region {
        Region {
            name: self.name.clone(),
            address: self.address + offset,
            len,
        }
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

/// Byte-addressable DRAM starting at `base`
#[derive(Debug, Clone)]
pub struct Dram {
    base: usize,
    bytes: Vec<u8>,
}

impl Dram {
    /// Zero-initialized DRAM of `size` bytes
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0u8; size],
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, address: usize, len: usize) -> Result<std::ops::Range<usize>, HardwareError> {
        let out_of_range = HardwareError::AddressOutOfRange { address, len };
        let start = address.checked_sub(self.base).ok_or(out_of_range.clone())?;
        let end = start.checked_add(len).ok_or(out_of_range.clone())?;
        if end > self.bytes.len() {
            return Err(out_of_range);
        }
        Ok(start..end)
    }

    pub fn read(&self, address: usize, len: usize) -> Result<&[u8], HardwareError> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn read_mut(&mut self, address: usize, len: usize) -> Result<&mut [u8], HardwareError> {
        let range = self.range(address, len)?;
        Ok(&mut self.bytes[range])
    }

    pub fn write(&mut self, address: usize, data: &[u8]) -> Result<(), HardwareError> {
        self.read_mut(address, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, address: usize, len: usize, value: u8) -> Result<(), HardwareError> {
        self.read_mut(address, len)?.fill(value);
        Ok(())
    }

    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) -> Result<(), HardwareError> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.copy_within(from, to.start);
        Ok(())
    }

    pub fn region(&self, region: &Region) -> Result<&[u8], HardwareError> {
        self.read(region.address, region.len)
    }

    pub fn region_mut(&mut self, region: &Region) -> Result<&mut [u8], HardwareError> {
        self.read_mut(region.address, region.len)
    }

    pub fn read_i16s(&self, address: usize, count: usize) -> Result<Vec<i16>, HardwareError> {
        let bytes = self.read(address, count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(bytemuck::pod_read_unaligned::<i16>)
            .collect())
    }

    pub fn write_i16s(&mut self, address: usize, values: &[i16]) -> Result<(), HardwareError> {
        self.write(address, bytemuck::cast_slice(values))
    }

    pub fn read_f32s(&self, address: usize, count: usize) -> Result<Vec<f32>, HardwareError> {
        let bytes = self.read(address, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    }

    pub fn write_f32s(&mut self, address: usize, values: &[f32]) -> Result<(), HardwareError> {
        self.write(address, bytemuck::cast_slice(values))
    }

    pub fn read_f64s(&self, address: usize, count: usize) -> Result<Vec<f64>, HardwareError> {
        let bytes = self.read(address, count * 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(bytemuck::pod_read_unaligned::<f64>)
            .collect())
    }

    pub fn write_f64s(&mut self, address: usize, values: &[f64]) -> Result<(), HardwareError> {
        self.write(address, bytemuck::cast_slice(values))
    }
}
