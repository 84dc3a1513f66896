//! Bump allocation of aligned DRAM regions

use crate::memory::Region;

/// Default region alignment (64 KiB, the DRAM offset register granularity)
pub const BUFFER_ALIGNMENT: usize = 0x10000;

/// Bytes the cursor advances for a region of `size` bytes
///
/// Always rounds past `size`, so an exact multiple still gets a spare block.
pub fn aligned_span(size: usize, alignment: usize) -> usize {
    (size / alignment + 1) * alignment
}

/// Bump allocator over a fixed DRAM base
#[derive(Debug, Clone)]
pub struct DramArena {
    base: usize,
    cursor: usize,
    alignment: usize,
    regions: Vec<Region>,
}

impl DramArena {
    pub fn new(base: usize, alignment: usize) -> Self {
        Self {
            base,
            cursor: base,
            alignment,
            regions: Vec::new(),
        }
    }

    pub fn allocate(&mut self, name: impl Into<String>, size: usize) -> Region {
        let region = Region::new(name, self.cursor, size);
        self.cursor += aligned_span(size, self.alignment);
        self.regions.push(region.clone());
        region
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Bytes consumed from the base so far
    pub fn used(&self) -> usize {
        self.cursor - self.base
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_span() {
        assert_eq!(aligned_span(0, BUFFER_ALIGNMENT), 0x10000);
        assert_eq!(aligned_span(0x40, BUFFER_ALIGNMENT), 0x10000);
        assert_eq!(aligned_span(0x10000, BUFFER_ALIGNMENT), 0x20000);
        assert_eq!(aligned_span(0x1ffff, BUFFER_ALIGNMENT), 0x20000);
    }

    #[test]
    fn test_bump_allocation() {
        let mut arena = DramArena::new(0x8000_0000, BUFFER_ALIGNMENT);
        let first = arena.allocate("a", 0x40);
        let second = arena.allocate("b", 0x10000);
        let third = arena.allocate("c", 8);

        assert_eq!(first.address, 0x8000_0000);
        assert_eq!(first.len, 0x40);
        assert_eq!(second.address, 0x8001_0000);
        assert_eq!(third.address, 0x8003_0000);
        assert_eq!(arena.used(), 0x40000);
        assert_eq!(arena.regions().len(), 3);
    }
}
