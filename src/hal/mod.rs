//! Hardware abstraction layer
//!
//! The pipeline talks to the board only through these traits. Every
//! engine call that touches memory receives the [`Dram`] explicitly, so a
//! transfer is just a read or write of a [`Region`] at the moment the
//! engine reports it. The host simulation in [`sim`] implements all of
//! them deterministically.

pub mod sim;

use serde::{Deserialize, Serialize};

use crate::error::HardwareError;
use crate::memory::{Dram, Region};

/// Descriptor ring of a scatter-gather engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    /// Memory to device (scatter)
    Tx,
    /// Device to memory (gather)
    Rx,
}

impl Ring {
    pub fn name(self) -> &'static str {
        match self {
            Ring::Tx => "tx",
            Ring::Rx => "rx",
        }
    }
}

/// Descriptor space and count for one ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRing {
    pub space: Region,
    pub count: usize,
}

/// Scatter-gather DMA engine in front of the transform accelerator
pub trait ScatterGather {
    /// Create and start both rings; must precede any submit
    fn start_rings(&mut self, tx: &DescriptorRing, rx: &DescriptorRing) -> Result<(), HardwareError>;

    /// Hand one descriptor per buffer to the hardware, as one batch
    fn submit(&mut self, dram: &mut Dram, ring: Ring, buffers: &[Region]) -> Result<(), HardwareError>;

    /// Descriptors completed and not yet freed on `ring`
    fn poll_complete(&mut self, dram: &mut Dram, ring: Ring) -> usize;

    /// Return `count` completed descriptors to the ring
    fn free(&mut self, ring: Ring, count: usize) -> Result<(), HardwareError>;
}

/// Simple-mode DMA transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Memory to device
    ToDevice,
    /// Device to memory
    FromDevice,
}

/// Single-buffer DMA engine (acquisition, exponent accelerator)
pub trait StreamDma {
    fn start(&mut self, dram: &mut Dram, direction: Direction, region: &Region) -> Result<(), HardwareError>;

    fn is_busy(&mut self, dram: &mut Dram, direction: Direction) -> bool;
}

/// Neural-network compute engine executing instruction programs
pub trait ComputeEngine {
    fn init(&mut self) -> Result<(), HardwareError>;

    /// Fetch the program resident in `program` from `from_offset`; returns
    /// the offset accepted so far
    ///
    /// A call with `from_offset == program.len` is a no-op returning the
    /// same offset.
    fn start(&mut self, dram: &mut Dram, program: &Region, from_offset: usize) -> Result<usize, HardwareError>;

    /// Whether the last accepted block is still being dispatched
    fn is_busy(&mut self, dram: &mut Dram) -> bool;

    /// Instruction fetch width in bytes; programs are padded to it
    fn instructions_data_width(&self) -> usize;
}

/// Motor direction register codes (bit 0: left reversed, bit 1: right reversed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorDirection {
    Forward,
    SpinLeft,
    SpinRight,
    Backward,
}

impl MotorDirection {
    pub fn code(self) -> u32 {
        match self {
            MotorDirection::Forward => 0b00,
            MotorDirection::SpinLeft => 0b01,
            MotorDirection::SpinRight => 0b10,
            MotorDirection::Backward => 0b11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorChannel {
    Left,
    Right,
}

/// PWM period and duty, in timer ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmSetting {
    pub period: u32,
    pub duty: u32,
}

/// Register-mapped GPIO outputs
pub trait GpioBank {
    fn release_microphone_reset(&mut self);
    fn set_motor_direction(&mut self, direction: MotorDirection);
    fn set_motor_pwm(&mut self, channel: MotorChannel, setting: PwmSetting);
    fn set_leds(&mut self, mask: u8);
}

/// Free-running cycle counter
pub trait CycleCounter {
    fn reset_and_start(&mut self);
    /// Stop and return the cycles counted since the last reset
    fn stop(&mut self) -> u32;
}

/// Memory-mapped flash holding the compiled model
pub trait FlashImage {
    fn read(&self, offset: usize, len: usize) -> Result<&[u8], HardwareError>;
}

/// Platform bring-up and teardown
pub trait Platform {
    fn init(&mut self) -> Result<(), HardwareError>;
    fn cleanup(&mut self);
}

/// Runs platform cleanup when dropped
pub struct PlatformGuard {
    platform: Box<dyn Platform>,
}

impl PlatformGuard {
    pub fn new(platform: Box<dyn Platform>) -> Self {
        Self { platform }
    }

    pub fn init(&mut self) -> Result<(), HardwareError> {
        self.platform.init()
    }
}

impl Drop for PlatformGuard {
    fn drop(&mut self) {
        self.platform.cleanup();
    }
}

/// Engines and peripherals the pipeline drives
pub struct Devices {
    pub acquisition: Box<dyn StreamDma>,
    pub transform: Box<dyn ScatterGather>,
    pub compute: Box<dyn ComputeEngine>,
    pub exp: Box<dyn StreamDma>,
    pub gpio: Box<dyn GpioBank>,
    pub timer: Box<dyn CycleCounter>,
    pub flash: Box<dyn FlashImage>,
}

/// Everything the firmware needs from one board
pub struct Board {
    pub platform: Box<dyn Platform>,
    pub devices: Devices,
}
