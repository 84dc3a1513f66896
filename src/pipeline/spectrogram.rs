//! Spectrogram ring buffer
//!
//! `frame_height` lines of `frame_width` fixed-point magnitudes. The
//! transform engine writes line `i` directly through its gather ring, the
//! window builder reads lines back when folding them into a model input.

use crate::config::PipelineGeometry;
use crate::error::HardwareError;
use crate::memory::{Dram, Region};

#[derive(Debug, Clone)]
pub struct SpectrogramRing {
    region: Region,
    width: usize,
    height: usize,
    line_size: usize,
}

impl SpectrogramRing {
    pub fn new(region: Region, geometry: &PipelineGeometry) -> Self {
        Self {
            region,
            width: geometry.frame_width,
            height: geometry.frame_height,
            line_size: geometry.frame_line_size,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Region of line `index`, wrapping modulo the height
    pub fn line_region(&self, index: usize) -> Region {
        self.region
            .slice((index % self.height) * self.line_size, self.line_size)
    }

    pub fn read(&self, dram: &Dram, index: usize) -> Result<Vec<i16>, HardwareError> {
        dram.read_i16s(self.line_region(index).address, self.width)
    }

    /// Overwrite one whole line; `values` must be exactly one line wide
    pub fn write(&self, dram: &mut Dram, index: usize, values: &[i16]) -> Result<(), HardwareError> {
        let line = self.line_region(index);
        if values.len() != self.width {
            return Err(HardwareError::AddressOutOfRange {
                address: line.address,
                len: values.len() * 2,
            });
        }
        dram.write_i16s(line.address, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::memory::MemoryLayout;

    fn ring() -> (SpectrogramRing, Dram) {
        let mut config = AppConfig::default();
        config.pipeline.acq_packet_length = 4;
        config.pipeline.frame_height = 4;
        config.pipeline.window_count = 2;
        let geometry = config.validate().unwrap();
        let layout = MemoryLayout::plan(&geometry);
        (
            SpectrogramRing::new(layout.spectrogram.clone(), &geometry),
            Dram::new(geometry.memory_base, layout.total_span),
        )
    }

    #[test]
    fn test_lines_are_contiguous_and_wrap() {
        let (ring, _) = ring();
        let first = ring.line_region(0);
        assert_eq!(first.len, 16);
        assert_eq!(ring.line_region(1).address, first.address + 16);
        assert_eq!(ring.line_region(4), first);
    }

    #[test]
    fn test_write_then_read_line() {
        let (ring, mut dram) = ring();
        ring.write(&mut dram, 2, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(ring.read(&dram, 2).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(ring.read(&dram, 3).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_write_rejects_wrong_width() {
        let (ring, mut dram) = ring();
        let line = ring.line_region(1);

        let long = ring.write(&mut dram, 1, &[1; 9]).unwrap_err();
        assert_eq!(
            long,
            HardwareError::AddressOutOfRange {
                address: line.address,
                len: 18
            }
        );
        assert!(ring.write(&mut dram, 1, &[1; 7]).is_err());
        // nothing was written
        assert_eq!(ring.read(&dram, 1).unwrap(), vec![0; 8]);
    }
}
