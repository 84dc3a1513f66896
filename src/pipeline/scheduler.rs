//! Inference scheduler
//!
//! The compute engine has no completion interrupt, and the program is too
//! long to feed in one request. The scheduler therefore drives one run
//! across iterations. It re-requests the program from the last accepted
//! offset whenever the engine is idle. Once the whole program has been
//! accepted, it compares two probe vectors that the program trailer copies
//! onto each other. The trailer is the last thing the engine writes, so
//! equal probes mean the scores in the region are final.
//!
//! The engine fetches the program from its DRAM region. The scheduler keeps
//! a host copy for patching and mirrors every patched slot back to DRAM
//! before the run starts.

use serde::Serialize;

use crate::error::{log_program_error, HardwareError, PipelineError};
use crate::hal::ComputeEngine;
use crate::memory::{Dram, Region};
use crate::pipeline::window::RegionRoles;
use crate::program::{dram_offset, InferenceProgram, ProbeVectors};

const PROBE_SOURCE_FILL: u8 = 0x00;
const PROBE_TARGET_FILL: u8 = 0xff;

/// Byte offsets of the probe vectors inside a model-input region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLayout {
    source: usize,
    target: usize,
    vector_size: usize,
}

impl ProbeLayout {
    pub fn new(probes: ProbeVectors, vector_size: usize) -> Self {
        Self {
            source: probes.source * vector_size,
            target: probes.target * vector_size,
            vector_size,
        }
    }

    /// Reset the probes so they differ until the trailer has run
    pub fn fill(&self, dram: &mut Dram, region: &Region) -> Result<(), HardwareError> {
        dram.fill(region.address + self.source, self.vector_size, PROBE_SOURCE_FILL)?;
        dram.fill(region.address + self.target, self.vector_size, PROBE_TARGET_FILL)
    }

    /// Whether the trailer copy has landed; a pure read
    pub fn matches(&self, dram: &Dram, region: &Region) -> Result<bool, HardwareError> {
        let source = dram.read(region.address + self.source, self.vector_size)?;
        let target = dram.read(region.address + self.target, self.vector_size)?;
        Ok(source == target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    /// `offset` bytes of the program accepted so far
    Running { offset: usize, region: usize },
}

/// Run started at a window boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartedRun {
    pub line: usize,
    pub region: usize,
    pub accepted_bytes: usize,
}

/// What happened in the scheduler during one line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    pub started: Option<StartedRun>,
    /// Region whose run completed
    pub completed: Option<usize>,
}

pub struct InferenceScheduler {
    program: InferenceProgram,
    /// Where the engine fetches the program from
    program_region: Region,
    regions: Vec<Region>,
    probes: ProbeLayout,
    window_step: usize,
    state: SchedulerState,
}

impl InferenceScheduler {
    /// `program_space` is the DRAM region reserved for the instruction buffer
    pub fn new(
        program: InferenceProgram,
        program_space: &Region,
        regions: Vec<Region>,
        probes: ProbeLayout,
        window_step: usize,
    ) -> Self {
        let program_region = program_space.slice(0, program.buffer.len());
        Self {
            program,
            program_region,
            regions,
            probes,
            window_step,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn program(&self) -> &InferenceProgram {
        &self.program
    }

    pub fn program_len(&self) -> usize {
        self.program.buffer.len()
    }

    pub fn program_region(&self) -> &Region {
        &self.program_region
    }

    /// Copy the whole program into its DRAM region
    pub fn load_program(&self, dram: &mut Dram) -> Result<(), HardwareError> {
        dram.write(self.program_region.address, self.program.buffer.as_bytes())
    }

    fn store_patch_slot(&self, dram: &mut Dram) -> Result<(), HardwareError> {
        let offset = self.program.dram0_slot.offset();
        let size = self.program.buffer.layout().size_bytes();
        let bytes = &self.program.buffer.as_bytes()[offset..offset + size];
        dram.write(self.program_region.address + offset, bytes)
    }

    pub fn roles(&self, line: usize) -> RegionRoles {
        RegionRoles::for_line(line, self.window_step, self.regions.len())
    }

    pub fn probes(&self) -> &ProbeLayout {
        &self.probes
    }

    /// Fail when `line` opens a window while the previous run is still going
    ///
    /// Called before the line is folded, so the region the engine still
    /// owns is never written.
    pub fn check_boundary(&self, line: usize) -> Result<(), PipelineError> {
        match self.state {
            SchedulerState::Running { offset, .. } if line % self.window_step == 0 => {
                Err(PipelineError::DeadlineViolation {
                    line,
                    run_offset: offset,
                    program_len: self.program_len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Start a run at window boundaries, then advance the current run
    pub fn on_line(
        &mut self,
        line: usize,
        dram: &mut Dram,
        compute: &mut dyn ComputeEngine,
    ) -> Result<SchedulerStep, PipelineError> {
        let started = if line % self.window_step == 0 {
            Some(self.start_window(line, dram, compute)?)
        } else {
            None
        };

        Ok(SchedulerStep {
            started,
            completed: self.advance(dram, compute)?,
        })
    }

    /// Point the program at the inferring region and hand it to the engine
    pub fn start_window(
        &mut self,
        line: usize,
        dram: &mut Dram,
        compute: &mut dyn ComputeEngine,
    ) -> Result<StartedRun, PipelineError> {
        if let SchedulerState::Running { offset, .. } = self.state {
            return Err(PipelineError::DeadlineViolation {
                line,
                run_offset: offset,
                program_len: self.program_len(),
            });
        }

        let region = self.roles(line).infer;
        let target = &self.regions[region];

        self.program
            .dram0_slot
            .patch(&mut self.program.buffer, dram_offset(target.address))
            .map_err(|err| {
                log_program_error(&err, "program patch");
                PipelineError::transfer("program patch", &err)
            })?;
        self.store_patch_slot(dram)
            .map_err(|err| PipelineError::transfer("program patch", &err))?;
        self.probes
            .fill(dram, target)
            .map_err(|err| PipelineError::transfer("probe fill", &err))?;

        let accepted = compute
            .start(dram, &self.program_region, 0)
            .map_err(|err| PipelineError::transfer("compute start", &err))?;

        tracing::debug!(
            "[Scheduler] line {} started region {} ({} of {} bytes accepted)",
            line,
            region,
            accepted,
            self.program_len()
        );

        self.state = SchedulerState::Running {
            offset: accepted,
            region,
        };
        Ok(StartedRun {
            line,
            region,
            accepted_bytes: accepted,
        })
    }

    /// Feed more of the program, or detect completion; returns the finished region
    pub fn advance(
        &mut self,
        dram: &mut Dram,
        compute: &mut dyn ComputeEngine,
    ) -> Result<Option<usize>, PipelineError> {
        let (offset, region) = match self.state {
            SchedulerState::Idle => return Ok(None),
            SchedulerState::Running { offset, region } => (offset, region),
        };

        if compute.is_busy(dram) {
            return Ok(None);
        }

        let program_len = self.program_len();
        if offset < program_len {
            let accepted = compute
                .start(dram, &self.program_region, offset)
                .map_err(|err| PipelineError::transfer("compute start", &err))?;
            self.state = SchedulerState::Running {
                offset: accepted,
                region,
            };
            return Ok(None);
        }

        let complete = self
            .probes
            .matches(dram, &self.regions[region])
            .map_err(|err| PipelineError::transfer("probe check", &err))?;
        if complete {
            self.state = SchedulerState::Idle;
            return Ok(Some(region));
        }

        // Everything was accepted but the trailer has not landed yet
        compute
            .start(dram, &self.program_region, offset)
            .map_err(|err| PipelineError::transfer("compute start", &err))?;
        Ok(None)
    }
}
