//! Simulated GPIO, cycle counter, flash and platform

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::HardwareError;
use crate::hal::{CycleCounter, FlashImage, GpioBank, MotorChannel, MotorDirection, Platform, PwmSetting};

/// One register write observed on the GPIO bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GpioWrite {
    MicrophoneReset,
    Direction { direction: MotorDirection },
    Pwm { channel: MotorChannel, setting: PwmSetting },
    Leds { mask: u8 },
}

/// Shared record of GPIO writes
#[derive(Debug, Clone, Default)]
pub struct GpioLog {
    writes: Arc<Mutex<Vec<GpioWrite>>>,
}

impl GpioLog {
    fn push(&self, write: GpioWrite) {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(write);
    }

    pub fn writes(&self) -> Vec<GpioWrite> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Direction register writes only
    pub fn directions(&self) -> Vec<MotorDirection> {
        self.writes()
            .into_iter()
            .filter_map(|write| match write {
                GpioWrite::Direction { direction } => Some(direction),
                _ => None,
            })
            .collect()
    }

    pub fn last_leds(&self) -> Option<u8> {
        self.writes().into_iter().rev().find_map(|write| match write {
            GpioWrite::Leds { mask } => Some(mask),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    log: GpioLog,
}

impl SimGpio {
    pub fn new(log: GpioLog) -> Self {
        Self { log }
    }
}

impl GpioBank for SimGpio {
    fn release_microphone_reset(&mut self) {
        self.log.push(GpioWrite::MicrophoneReset);
    }

    fn set_motor_direction(&mut self, direction: MotorDirection) {
        self.log.push(GpioWrite::Direction { direction });
    }

    fn set_motor_pwm(&mut self, channel: MotorChannel, setting: PwmSetting) {
        self.log.push(GpioWrite::Pwm { channel, setting });
    }

    fn set_leds(&mut self, mask: u8) {
        self.log.push(GpioWrite::Leds { mask });
    }
}

/// Cycle counts reported by successive `stop` calls
#[derive(Debug, Clone)]
pub struct SimCycleCounter {
    script: VecDeque<u32>,
    fallback: u32,
    running: bool,
}

impl SimCycleCounter {
    /// Always report `cycles`
    pub fn fixed(cycles: u32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: cycles,
            running: false,
        }
    }

    /// Report `script` in order, then `fallback` forever
    pub fn scripted(script: Vec<u32>, fallback: u32) -> Self {
        Self {
            script: script.into(),
            fallback,
            running: false,
        }
    }
}

impl CycleCounter for SimCycleCounter {
    fn reset_and_start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) -> u32 {
        if !self.running {
            return 0;
        }
        self.running = false;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

/// Sparse flash image made of byte segments
#[derive(Debug, Clone, Default)]
pub struct SimFlash {
    segments: Vec<(usize, Vec<u8>)>,
}

impl SimFlash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, offset: usize, bytes: Vec<u8>) -> Self {
        self.segments.push((offset, bytes));
        self
    }
}

impl FlashImage for SimFlash {
    fn read(&self, offset: usize, len: usize) -> Result<&[u8], HardwareError> {
        self.segments
            .iter()
            .find(|(start, bytes)| offset >= *start && offset + len <= start + bytes.len())
            .map(|(start, bytes)| &bytes[offset - start..offset - start + len])
            .ok_or(HardwareError::AddressOutOfRange {
                address: offset,
                len,
            })
    }
}

/// Init/cleanup counters shared with the test harness
#[derive(Debug, Clone, Default)]
pub struct PlatformCounters {
    inits: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl PlatformCounters {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SimPlatform {
    counters: PlatformCounters,
    fail_init: bool,
}

impl SimPlatform {
    pub fn new(counters: PlatformCounters, fail_init: bool) -> Self {
        Self {
            counters,
            fail_init,
        }
    }
}

impl Platform for SimPlatform {
    fn init(&mut self) -> Result<(), HardwareError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(HardwareError::DeviceFault {
                details: "platform init failed".to_string(),
            });
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
