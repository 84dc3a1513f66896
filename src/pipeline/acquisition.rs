//! Acquisition-transform pipeline
//!
//! Samples arrive in a ping-pong buffer: while the acquisition engine fills
//! one half, the other half is copied into the transform input packet. The
//! packet keeps the two most recent acquisitions, and its halves alternate
//! between natural and reversed order, so two scatter descriptors present
//! them oldest first without moving the older half.

use crate::config::{PipelineGeometry, TimingConfig};
use crate::error::PipelineError;
use crate::hal::{CycleCounter, Direction, Ring, ScatterGather, StreamDma};
use crate::memory::{Dram, MemoryLayout, Region};

pub struct AcquisitionPipeline {
    acquisition: Region,
    transform_input: Region,
    packet_size: usize,
    reversed: usize,
    max_poll_iterations: u64,
}

impl AcquisitionPipeline {
    pub fn new(layout: &MemoryLayout, geometry: &PipelineGeometry, timing: &TimingConfig) -> Self {
        Self {
            acquisition: layout.acquisition.clone(),
            transform_input: layout.transform_input.clone(),
            packet_size: geometry.acq_packet_size,
            reversed: 0,
            max_poll_iterations: timing.max_poll_iterations,
        }
    }

    /// Parity bit selecting which half is being filled
    pub fn reversed(&self) -> usize {
        self.reversed
    }

    /// Acquisition half written by the next `trigger`
    pub fn fill_offset(&self) -> usize {
        (1 - self.reversed) * self.packet_size
    }

    /// Start acquiring the next packet into the idle half
    pub fn trigger(&mut self, dram: &mut Dram, acquisition: &mut dyn StreamDma) -> Result<(), PipelineError> {
        let target = self.acquisition.slice(self.fill_offset(), self.packet_size);
        acquisition
            .start(dram, Direction::FromDevice, &target)
            .map_err(|err| PipelineError::transfer("acquisition submit", &err))?;

        self.reversed = 1 - self.reversed;
        Ok(())
    }

    /// Copy the completed half, run the transform into `line`, and wait for it
    pub fn transform(
        &mut self,
        dram: &mut Dram,
        engine: &mut dyn ScatterGather,
        line: &Region,
    ) -> Result<(), PipelineError> {
        let offset = self.fill_offset();
        dram.copy_within(
            self.acquisition.address + offset,
            self.transform_input.address + offset,
            self.packet_size,
        )
        .map_err(|err| PipelineError::transfer("transform input copy", &err))?;

        let halves: Vec<Region> = (0..2)
            .map(|i: usize| {
                let offset = i.abs_diff(self.reversed) * self.packet_size;
                self.transform_input.slice(offset, self.packet_size)
            })
            .collect();

        engine
            .submit(dram, Ring::Tx, &halves)
            .map_err(|err| PipelineError::transfer("transform tx submit", &err))?;
        engine
            .submit(dram, Ring::Rx, std::slice::from_ref(line))
            .map_err(|err| PipelineError::transfer("transform rx submit", &err))?;

        let mut polls = 0u64;
        loop {
            let rx = engine.poll_complete(dram, Ring::Rx);
            let tx = engine.poll_complete(dram, Ring::Tx);
            if rx > 1 || tx > halves.len() {
                return Err(PipelineError::Transfer {
                    stage: "transform completion".to_string(),
                    details: format!(
                        "completed rx={} tx={}, submitted rx=1 tx={}",
                        rx,
                        tx,
                        halves.len()
                    ),
                });
            }
            if rx == 1 && tx == halves.len() {
                break;
            }
            polls += 1;
            if polls >= self.max_poll_iterations {
                return Err(PipelineError::poll_timeout("transform completion", polls));
            }
        }

        engine
            .free(Ring::Tx, halves.len())
            .map_err(|err| PipelineError::transfer("transform tx free", &err))?;
        engine
            .free(Ring::Rx, 1)
            .map_err(|err| PipelineError::transfer("transform rx free", &err))?;
        Ok(())
    }

    /// Busy-wait for the pending acquisition, returning the cycles spent waiting
    pub fn wait_acquisition(
        &self,
        dram: &mut Dram,
        acquisition: &mut dyn StreamDma,
        timer: &mut dyn CycleCounter,
    ) -> Result<u32, PipelineError> {
        timer.reset_and_start();

        let mut polls = 0u64;
        while acquisition.is_busy(dram, Direction::FromDevice) {
            polls += 1;
            if polls >= self.max_poll_iterations {
                timer.stop();
                return Err(PipelineError::poll_timeout("acquisition wait", polls));
            }
        }

        Ok(timer.stop())
    }
}
