//! Model-input window builder
//!
//! The model sees `frame_height` consecutive spectrogram lines. Windows
//! overlap: a new one starts every `window_step` lines, so each new line
//! belongs to `window_count` windows at once, at a different row in each.
//! Rather than copying whole windows at the boundary, every line is
//! folded into its row of the preparing region as it arrives. After
//! `window_step` lines every row of that region has been rewritten once
//! and it is handed to the scheduler.
//!
//! Rows are stored as `model_input_width` vectors of `array_size` values,
//! with the spectrum in channel 0 of each vector and read back to front.

use serde::Serialize;

use crate::config::PipelineGeometry;
use crate::error::HardwareError;
use crate::memory::{Dram, Region};
use crate::pipeline::spectrogram::SpectrogramRing;

/// Model-input region indices for one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionRoles {
    /// Region receiving folded lines
    pub prepare: usize,
    /// Region read by the compute engine
    pub infer: usize,
}

impl RegionRoles {
    pub fn for_line(line: usize, step: usize, buffers: usize) -> Self {
        let prepare = (line / step) % buffers;
        Self {
            prepare,
            infer: (prepare + buffers - 1) % buffers,
        }
    }
}

/// Where one spectrogram line lands in the preparing region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPlacement {
    pub window: usize,
    pub source_line: usize,
    pub dest_row: usize,
}

#[derive(Debug, Clone)]
pub struct WindowBuilder {
    frame_width: usize,
    frame_height: usize,
    window_count: usize,
    window_step: usize,
    input_width: usize,
    array_size: usize,
    line_size: usize,
}

impl WindowBuilder {
    pub fn new(geometry: &PipelineGeometry) -> Self {
        Self {
            frame_width: geometry.frame_width,
            frame_height: geometry.frame_height,
            window_count: geometry.window_count,
            window_step: geometry.window_step,
            input_width: geometry.model_input_width,
            array_size: geometry.array_size,
            line_size: geometry.model_input_line_size,
        }
    }

    /// Rows written for `line`, one per window
    pub fn placements(&self, line: usize) -> Vec<RowPlacement> {
        (0..self.window_count)
            .map(|window| {
                let back = (window * self.window_step) % self.frame_height;
                RowPlacement {
                    window,
                    source_line: (line + self.frame_height - back) % self.frame_height,
                    dest_row: line % self.window_step
                        + (self.window_count - 1 - window) * self.window_step,
                }
            })
            .collect()
    }

    /// Rewrite the rows of `target` that depend on `line`
    pub fn fold_line(
        &self,
        dram: &mut Dram,
        ring: &SpectrogramRing,
        line: usize,
        target: &Region,
    ) -> Result<(), HardwareError> {
        let mut row = vec![0i16; self.input_width * self.array_size];

        for placement in self.placements(line) {
            let source = ring.read(dram, placement.source_line)?;

            row.fill(0);
            for j in 0..self.input_width {
                row[j * self.array_size] = source[self.frame_width - 1 - j];
            }

            let address = target.address + placement.dest_row * self.line_size;
            dram.write_i16s(address, &row)?;
        }
        Ok(())
    }
}
