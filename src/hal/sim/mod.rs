//! Deterministic host simulation of the board
//!
//! Every hardware trait has a simulated counterpart here, so the full
//! pipeline runs in tests and in the `speech_robot_sim` binary without a
//! device. [`SimBoard`] wires them together from an [`AppConfig`] and
//! hands back shared handles for inspecting GPIO traffic and platform
//! lifecycle.

mod compute;
mod io;
mod source;
mod transfer;

pub use compute::{
    BandEnergyModel, FixedScores, FnModel, ModelInput, ModelStub, SimComputeConfig,
    SimComputeEngine,
};
pub use io::{
    GpioLog, GpioWrite, PlatformCounters, SimCycleCounter, SimFlash, SimGpio, SimPlatform,
};
pub use source::{Noise, Ramp, SampleSource, Silence, Tone, WavSource, SAMPLE_RATE};
pub use transfer::{SimAcquisition, SimExpEngine, SimTransformEngine};

use crate::config::AppConfig;
use crate::error::{PipelineError, ProgramError};
use crate::hal::{Board, Devices};
use crate::program::{Architecture, Instruction, InstructionLayout, Opcode};

/// Slack reported by the default cycle counter, well above the warning level
pub const DEFAULT_SLACK_CYCLES: u32 = 500_000;

/// Eight-line geometry with two windows of four lines
///
/// Small enough to step through line by line: 8-sample packets, a 16-point
/// transform, two model-input buffers of 128 vectors and a 64-byte model
/// program.
pub fn compact_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.acq_packet_length = 8;
    config.pipeline.frame_height = 8;
    config.pipeline.window_count = 2;
    config.pipeline.model_input_buffers = 2;
    config.architecture = Architecture {
        array_size: 4,
        local_depth: 64,
        accumulator_depth: 64,
        dram0_depth: 128,
        dram1_depth: 64,
        stride0_depth: 8,
        stride1_depth: 8,
        simd_registers_depth: 1,
        ..Architecture::default()
    };
    config.model.program_flash_offset = 0;
    config.model.program_size = 64;
    config.model.consts_flash_offset = 0x1000;
    config.model.consts_vectors = 16;
    config.model.instruction_buffer_size = 0x1000;
    config
}

/// Engine timing matching [`compact_config`]: the whole program per request
pub fn compact_compute() -> SimComputeConfig {
    SimComputeConfig {
        instructions_data_width: 8,
        max_request_bytes: 0x1000,
        busy_polls_per_request: 0,
        in_flight_polls: 1,
        ..SimComputeConfig::default()
    }
}

/// Handles into a built simulated board
#[derive(Debug, Clone)]
pub struct SimHandles {
    pub gpio: GpioLog,
    pub platform: PlatformCounters,
}

/// Encode a stand-in model program and constant block into flash
///
/// The program starts with a weight load, ends with the SIMD instruction
/// that evaluates the model stub, and is NoOp in between.
pub fn synthetic_flash(config: &AppConfig) -> Result<SimFlash, ProgramError> {
    let layout = InstructionLayout::new(&config.architecture);
    let size = layout.size_bytes();
    let count = config.model.program_size / size;

    let mut program = Vec::with_capacity(config.model.program_size);
    let no_op = layout.encode(&Instruction::no_op())?;
    for index in 0..count {
        if index == 0 && count > 1 {
            program.extend(layout.encode(&Instruction::new(Opcode::LoadWeights, 0, 0, 0, 0))?);
        } else if index + 1 == count {
            program.extend(layout.encode(&Instruction::simd())?);
        } else {
            program.extend_from_slice(&no_op);
        }
    }
    program.resize(config.model.program_size, 0);

    let consts_len = config.model.consts_vectors * config.architecture.vector_size();
    let consts = (0..consts_len).map(|i| (i % 251) as u8).collect();

    Ok(SimFlash::new()
        .with_segment(config.model.program_flash_offset, program)
        .with_segment(config.model.consts_flash_offset, consts))
}

/// Builder for a simulated [`Board`]
pub struct SimBoard {
    config: AppConfig,
    source: Box<dyn SampleSource>,
    model: Option<Box<dyn ModelStub>>,
    compute: SimComputeConfig,
    stuck: bool,
    cycles: SimCycleCounter,
    acquisition_busy_polls: u32,
    transform_latency_polls: u32,
    exp_busy_polls: u32,
    extra_completion: bool,
    fail_platform_init: bool,
}

impl SimBoard {
    pub fn new(config: &AppConfig) -> Self {
        let compute = SimComputeConfig {
            input_width: config.pipeline.acq_packet_length + 1,
            input_height: config.pipeline.frame_height,
            ..SimComputeConfig::default()
        };

        Self {
            config: config.clone(),
            source: Box::new(Silence),
            model: None,
            compute,
            stuck: false,
            cycles: SimCycleCounter::fixed(DEFAULT_SLACK_CYCLES),
            acquisition_busy_polls: 2,
            transform_latency_polls: 1,
            exp_busy_polls: 1,
            extra_completion: false,
            fail_platform_init: false,
        }
    }

    pub fn with_source(mut self, source: impl SampleSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn with_model(mut self, model: impl ModelStub + 'static) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Replace the engine timing; input dimensions are kept from the config
    pub fn with_compute(mut self, compute: SimComputeConfig) -> Self {
        self.compute = SimComputeConfig {
            input_width: self.compute.input_width,
            input_height: self.compute.input_height,
            ..compute
        };
        self
    }

    pub fn stuck_compute(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn with_cycle_counter(mut self, cycles: SimCycleCounter) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_extra_transform_completion(mut self) -> Self {
        self.extra_completion = true;
        self
    }

    pub fn with_failing_platform(mut self) -> Self {
        self.fail_platform_init = true;
        self
    }

    pub fn build(self) -> Result<(Board, SimHandles), PipelineError> {
        let flash =
            synthetic_flash(&self.config).map_err(|err| PipelineError::init("flash image", &err))?;

        let data_type = self.config.architecture.data_type;
        let mut transform = SimTransformEngine::new(
            2 * self.config.pipeline.acq_packet_length,
            data_type,
            self.transform_latency_polls,
        );
        if self.extra_completion {
            transform.inject_extra_completion();
        }

        let model: Box<dyn ModelStub> = match self.model {
            Some(model) => model,
            None => Box::new(BandEnergyModel::new(&self.config.model.labels, 0.05)),
        };
        let mut compute = SimComputeEngine::new(&self.config.architecture, self.compute, model);
        compute.set_stuck(self.stuck);

        let handles = SimHandles {
            gpio: GpioLog::default(),
            platform: PlatformCounters::default(),
        };

        let board = Board {
            platform: Box::new(SimPlatform::new(
                handles.platform.clone(),
                self.fail_platform_init,
            )),
            devices: Devices {
                acquisition: Box::new(SimAcquisition::new(self.source, self.acquisition_busy_polls)),
                transform: Box::new(transform),
                compute: Box::new(compute),
                exp: Box::new(SimExpEngine::new(data_type, self.exp_busy_polls)),
                gpio: Box::new(SimGpio::new(handles.gpio.clone())),
                timer: Box::new(self.cycles),
                flash: Box::new(flash),
            },
        };

        Ok((board, handles))
    }
}
