//! Simulated compute engine
//!
//! The engine decodes the instruction program block by block. Configure
//! instructions set the DRAM0/DRAM1 bases, data moves shuttle vectors
//! through a local memory, and the SIMD instruction evaluates a
//! [`ModelStub`] over the model input at the DRAM0 base, writing the
//! class scores back to the start of that region. Local to DRAM0 moves
//! land only after `in_flight_polls` polls, mirroring writes still in
//! flight after the last instruction was dispatched.

use std::collections::VecDeque;

use crate::error::{log_hardware_error, HardwareError};
use crate::hal::ComputeEngine;
use crate::memory::{Dram, Region};
use crate::program::{
    Architecture, ConfigRegister, Instruction, InstructionLayout, Opcode, DATA_MOVE_DRAM0_TO_LOCAL,
    DATA_MOVE_DRAM1_TO_LOCAL, DATA_MOVE_LOCAL_TO_DRAM0, DATA_MOVE_LOCAL_TO_DRAM1,
};

/// Window handed to a model stub
pub struct ModelInput<'a> {
    bytes: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub array_size: usize,
}

impl ModelInput<'_> {
    /// Channel-0 value of vector `column` in row `row`
    pub fn value(&self, row: usize, column: usize) -> i16 {
        let index = (row * self.width + column) * self.array_size * 2;
        bytemuck::pod_read_unaligned::<i16>(&self.bytes[index..index + 2])
    }
}

/// Stand-in for the compiled network
pub trait ModelStub: Send {
    /// Raw fixed-point score per class
    fn evaluate(&mut self, input: &ModelInput<'_>) -> Vec<i16>;
}

/// Returns the same scores for every window
#[derive(Debug, Clone)]
pub struct FixedScores(pub Vec<i16>);

impl ModelStub for FixedScores {
    fn evaluate(&mut self, _input: &ModelInput<'_>) -> Vec<i16> {
        self.0.clone()
    }
}

/// Scores computed by a closure
pub struct FnModel<F>(pub F);

impl<F> ModelStub for FnModel<F>
where
    F: FnMut(&ModelInput<'_>) -> Vec<i16> + Send,
{
    fn evaluate(&mut self, input: &ModelInput<'_>) -> Vec<i16> {
        (self.0)(input)
    }
}

/// Picks a class from the frequency band holding the most energy
///
/// The spectrum columns are split evenly into one band per keyword
/// class; windows whose mean magnitude stays under `energy_floor` map to
/// `silence_class`.
#[derive(Debug, Clone)]
pub struct BandEnergyModel {
    keyword_classes: usize,
    output_length: usize,
    silence_class: Option<usize>,
    energy_floor: f64,
    winner_score: i16,
}

impl BandEnergyModel {
    pub fn new(labels: &[String], energy_floor: f64) -> Self {
        let keyword_classes = labels.iter().filter(|l| !l.starts_with('_')).count().max(1);
        Self {
            keyword_classes,
            output_length: labels.len(),
            silence_class: labels.iter().position(|l| l == "_silence_"),
            energy_floor,
            // exp(6) dominates eleven exp(0) terms with ~0.97 probability
            winner_score: 6 * 256,
        }
    }
}

impl ModelStub for BandEnergyModel {
    fn evaluate(&mut self, input: &ModelInput<'_>) -> Vec<i16> {
        let mut bands = vec![0.0f64; self.keyword_classes];
        let mut total = 0.0;
        for row in 0..input.height {
            for column in 0..input.width {
                let value = input.value(row, column).max(0) as f64;
                let band = (column * self.keyword_classes / input.width).min(self.keyword_classes - 1);
                bands[band] += value;
                total += value;
            }
        }

        let mut scores = vec![0i16; self.output_length];
        let mean = total / (input.height * input.width).max(1) as f64 / 256.0;
        let winner = if mean < self.energy_floor {
            self.silence_class
        } else {
            bands
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (i, &e)| match best {
                    Some((_, b)) if b >= e => best,
                    _ => Some((i, e)),
                })
                .map(|(i, _)| i)
        };
        if let Some(class) = winner.filter(|&c| c < scores.len()) {
            scores[class] = self.winner_score;
        }
        scores
    }
}

/// Timing and shape knobs of the simulated engine
#[derive(Debug, Clone)]
pub struct SimComputeConfig {
    pub instructions_data_width: usize,
    /// Largest block accepted by one `start`
    pub max_request_bytes: usize,
    /// Polls a block keeps the engine busy
    pub busy_polls_per_request: u32,
    /// Polls before a local to DRAM0 move lands
    pub in_flight_polls: u32,
    pub input_width: usize,
    pub input_height: usize,
}

impl Default for SimComputeConfig {
    fn default() -> Self {
        Self {
            instructions_data_width: 64,
            max_request_bytes: 0x10000,
            busy_polls_per_request: 1,
            in_flight_polls: 2,
            input_width: 129,
            input_height: 124,
        }
    }
}

struct PendingWrite {
    remaining: u32,
    address: usize,
    bytes: Vec<u8>,
}

pub struct SimComputeEngine {
    arch: Architecture,
    layout: InstructionLayout,
    config: SimComputeConfig,
    model: Box<dyn ModelStub>,
    initialized: bool,
    stuck: bool,
    dram0_base: Option<usize>,
    dram1_base: Option<usize>,
    local: Vec<u8>,
    busy_remaining: u32,
    in_flight: VecDeque<PendingWrite>,
    requests: u64,
    evaluations: u64,
}

impl SimComputeEngine {
    pub fn new(arch: &Architecture, config: SimComputeConfig, model: Box<dyn ModelStub>) -> Self {
        let layout = InstructionLayout::new(arch);
        let size = layout.size_bytes();
        let config = SimComputeConfig {
            max_request_bytes: (config.max_request_bytes / size).max(1) * size,
            ..config
        };

        Self {
            arch: arch.clone(),
            layout,
            config,
            model,
            initialized: false,
            stuck: false,
            dram0_base: None,
            dram1_base: None,
            local: vec![0u8; arch.local_depth * arch.vector_size()],
            busy_remaining: 0,
            in_flight: VecDeque::new(),
            requests: 0,
            evaluations: 0,
        }
    }

    /// Never land in-flight DRAM0 writes, so runs never complete
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn fault(details: String) -> HardwareError {
        HardwareError::DeviceFault { details }
    }

    fn dram_address(&self, base: Option<usize>, vector: u64) -> Result<usize, HardwareError> {
        let base = base.ok_or(Self::fault("DRAM offset used before configuration".to_string()))?;
        Ok(base + vector as usize * self.arch.vector_size())
    }

    fn local_range(&self, vector: u64, count: usize) -> Result<std::ops::Range<usize>, HardwareError> {
        let vector_size = self.arch.vector_size();
        let start = vector as usize * vector_size;
        let end = start + count * vector_size;
        if end > self.local.len() {
            return Err(Self::fault(format!("local address {} out of range", vector)));
        }
        Ok(start..end)
    }

    fn execute(&mut self, dram: &mut Dram, instruction: &Instruction) -> Result<(), HardwareError> {
        let [op0, op1, op2] = instruction.operands;
        match instruction.opcode {
            Opcode::NoOp | Opcode::MatMul | Opcode::LoadWeights => {}
            Opcode::Configure => match instruction.config_register() {
                Some(ConfigRegister::Dram0Offset) => self.dram0_base = Some((op1 as usize) << 16),
                Some(ConfigRegister::Dram1Offset) => self.dram1_base = Some((op1 as usize) << 16),
                Some(ConfigRegister::Timeout) => {}
                None => return Err(Self::fault(format!("unknown config register {}", op0))),
            },
            Opcode::DataMove => {
                let count = op2 as usize + 1;
                let local = self.local_range(op0, count)?;
                let len = local.len();
                match instruction.flags {
                    DATA_MOVE_DRAM0_TO_LOCAL | DATA_MOVE_DRAM1_TO_LOCAL => {
                        let base = if instruction.flags == DATA_MOVE_DRAM0_TO_LOCAL {
                            self.dram0_base
                        } else {
                            self.dram1_base
                        };
                        let address = self.dram_address(base, op1)?;
                        let bytes = dram.read(address, len)?;
                        self.local[local].copy_from_slice(bytes);
                    }
                    DATA_MOVE_LOCAL_TO_DRAM0 => {
                        let address = self.dram_address(self.dram0_base, op1)?;
                        self.in_flight.push_back(PendingWrite {
                            remaining: self.config.in_flight_polls,
                            address,
                            bytes: self.local[local].to_vec(),
                        });
                    }
                    DATA_MOVE_LOCAL_TO_DRAM1 => {
                        let address = self.dram_address(self.dram1_base, op1)?;
                        dram.write(address, &self.local[local])?;
                    }
                    flags => return Err(Self::fault(format!("unsupported data move flags {:#x}", flags))),
                }
            }
            Opcode::Simd => {
                let address = self.dram_address(self.dram0_base, 0)?;
                let len = self.config.input_width * self.config.input_height * self.arch.vector_size();
                let scores = {
                    let input = ModelInput {
                        bytes: dram.read(address, len)?,
                        width: self.config.input_width,
                        height: self.config.input_height,
                        array_size: self.arch.array_size,
                    };
                    self.model.evaluate(&input)
                };
                dram.write_i16s(address, &scores)?;
                self.evaluations += 1;
            }
        }
        Ok(())
    }

    fn land_in_flight(&mut self, dram: &mut Dram) {
        if self.stuck {
            return;
        }
        for write in self.in_flight.iter_mut() {
            write.remaining = write.remaining.saturating_sub(1);
        }
        while self.in_flight.front().is_some_and(|w| w.remaining == 0) {
            if let Some(write) = self.in_flight.pop_front() {
                if let Err(err) = dram.write(write.address, &write.bytes) {
                    log_hardware_error(&err, "sim compute in-flight write");
                }
            }
        }
    }
}

impl ComputeEngine for SimComputeEngine {
    fn init(&mut self) -> Result<(), HardwareError> {
        if self.config.instructions_data_width % self.layout.size_bytes() != 0 {
            return Err(HardwareError::ConfigurationRejected {
                details: format!(
                    "data width {} is not a multiple of the {}-byte instruction",
                    self.config.instructions_data_width,
                    self.layout.size_bytes()
                ),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn start(&mut self, dram: &mut Dram, program: &Region, from_offset: usize) -> Result<usize, HardwareError> {
        if !self.initialized {
            return Err(Self::fault("compute engine not initialized".to_string()));
        }
        if self.busy_remaining > 0 {
            return Err(HardwareError::EngineBusy {
                engine: "compute".to_string(),
            });
        }
        if from_offset >= program.len {
            return Ok(program.len);
        }

        let size = self.layout.size_bytes();
        let end = (from_offset + self.config.max_request_bytes).min(program.len);
        // The block is fetched before any of it executes
        let block = dram.read(program.address + from_offset, end - from_offset)?.to_vec();
        let mut offset = from_offset;
        while offset + size <= end {
            let instruction = self
                .layout
                .decode(&block[offset - from_offset..], offset)
                .map_err(|err| Self::fault(err.to_string()))?;
            self.execute(dram, &instruction)?;
            offset += size;
        }

        // Writes with no delay land as soon as they are dispatched
        if self.config.in_flight_polls == 0 {
            self.land_in_flight(dram);
        }

        self.busy_remaining = self.config.busy_polls_per_request;
        self.requests += 1;
        Ok(offset)
    }

    fn is_busy(&mut self, dram: &mut Dram) -> bool {
        self.land_in_flight(dram);
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            true
        } else {
            false
        }
    }

    fn instructions_data_width(&self) -> usize {
        self.config.instructions_data_width
    }
}
