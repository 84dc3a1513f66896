//! Simulated DMA engines: acquisition, transform and exponent

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::HardwareError;
use crate::hal::sim::source::SampleSource;
use crate::hal::{DescriptorRing, Direction, Ring, ScatterGather, StreamDma};
use crate::memory::{Dram, Region};
use crate::program::DataType;

/// Microphone acquisition engine (device to memory only)
///
/// The packet is written when the transfer starts; the engine then stays
/// busy for `busy_polls` polls.
pub struct SimAcquisition {
    source: Box<dyn SampleSource>,
    busy_polls: u32,
    remaining: u32,
    packets: u64,
}

impl SimAcquisition {
    pub fn new(source: Box<dyn SampleSource>, busy_polls: u32) -> Self {
        Self {
            source,
            busy_polls,
            remaining: 0,
            packets: 0,
        }
    }

    /// Packets transferred so far
    pub fn packets(&self) -> u64 {
        self.packets
    }
}

impl StreamDma for SimAcquisition {
    fn start(&mut self, dram: &mut Dram, direction: Direction, region: &Region) -> Result<(), HardwareError> {
        if direction != Direction::FromDevice {
            return Err(HardwareError::UnsupportedDirection {
                engine: "acquisition".to_string(),
            });
        }
        if self.remaining > 0 {
            return Err(HardwareError::EngineBusy {
                engine: "acquisition".to_string(),
            });
        }

        let mut samples = vec![0.0f32; region.len / 4];
        self.source.fill(&mut samples);
        dram.write_f32s(region.address, &samples)?;

        self.remaining = self.busy_polls;
        self.packets += 1;
        Ok(())
    }

    fn is_busy(&mut self, _dram: &mut Dram, _direction: Direction) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default)]
struct RingState {
    capacity: usize,
    pending: Vec<Region>,
    completed: usize,
}

impl RingState {
    fn in_use(&self) -> usize {
        self.pending.len() + self.completed
    }
}

/// Scatter-gather front end of the transform accelerator
///
/// Once the scatter ring holds a full frame of samples and the gather ring
/// holds a target line, the engine computes the magnitude spectrum of the
/// frame and writes it as fixed point into the target. Completion is
/// delayed by `latency_polls` polls.
pub struct SimTransformEngine {
    fft: Arc<dyn Fft<f32>>,
    frame_length: usize,
    data_type: DataType,
    tx: Option<RingState>,
    rx: Option<RingState>,
    latency_polls: u32,
    countdown: u32,
    extra_completion: bool,
    frames: u64,
}

impl SimTransformEngine {
    pub fn new(frame_length: usize, data_type: DataType, latency_polls: u32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_length);

        Self {
            fft,
            frame_length,
            data_type,
            tx: None,
            rx: None,
            latency_polls,
            countdown: latency_polls,
            extra_completion: false,
            frames: 0,
        }
    }

    /// Report one gather completion more than was submitted, once
    pub fn inject_extra_completion(&mut self) {
        self.extra_completion = true;
    }

    /// Frames transformed so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn ring_mut(&mut self, ring: Ring) -> Result<&mut RingState, HardwareError> {
        let state = match ring {
            Ring::Tx => self.tx.as_mut(),
            Ring::Rx => self.rx.as_mut(),
        };
        state.ok_or(HardwareError::RingNotStarted {
            ring: ring.name().to_string(),
        })
    }

    fn process(&mut self, dram: &mut Dram) -> Result<(), HardwareError> {
        let frame_bytes = self.frame_length * 4;
        let ready = match (&self.tx, &self.rx) {
            (Some(tx), Some(rx)) => {
                tx.pending.iter().map(|r| r.len).sum::<usize>() >= frame_bytes
                    && !rx.pending.is_empty()
            }
            _ => false,
        };
        if !ready {
            return Ok(());
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(());
        }

        let (inputs, target) = match (self.tx.as_mut(), self.rx.as_mut()) {
            (Some(tx), Some(rx)) => (std::mem::take(&mut tx.pending), rx.pending.remove(0)),
            _ => return Ok(()),
        };

        let mut samples = Vec::with_capacity(self.frame_length);
        for input in &inputs {
            samples.extend(dram.read_f32s(input.address, input.len / 4)?);
        }
        samples.truncate(self.frame_length);

        let mut spectrum: Vec<Complex<f32>> =
            samples.iter().map(|&re| Complex { re, im: 0.0 }).collect();
        self.fft.process(&mut spectrum);

        let scale = 2.0 / self.frame_length as f64;
        let line: Vec<i16> = spectrum
            .iter()
            .take(target.len / self.data_type.size_bytes())
            .map(|bin| self.data_type.from_f64(bin.norm() as f64 * scale))
            .collect();
        dram.write_i16s(target.address, &line)?;

        if let Some(tx) = self.tx.as_mut() {
            tx.completed += inputs.len();
        }
        if let Some(rx) = self.rx.as_mut() {
            rx.completed += 1;
            if self.extra_completion {
                rx.completed += 1;
                self.extra_completion = false;
            }
        }

        self.countdown = self.latency_polls;
        self.frames += 1;
        Ok(())
    }
}

impl ScatterGather for SimTransformEngine {
    fn start_rings(&mut self, tx: &DescriptorRing, rx: &DescriptorRing) -> Result<(), HardwareError> {
        if tx.count == 0 || rx.count == 0 {
            return Err(HardwareError::ConfigurationRejected {
                details: "descriptor rings need at least one descriptor".to_string(),
            });
        }
        self.tx = Some(RingState {
            capacity: tx.count,
            ..RingState::default()
        });
        self.rx = Some(RingState {
            capacity: rx.count,
            ..RingState::default()
        });
        Ok(())
    }

    fn submit(&mut self, _dram: &mut Dram, ring: Ring, buffers: &[Region]) -> Result<(), HardwareError> {
        let state = self.ring_mut(ring)?;
        let available = state.capacity - state.in_use();
        if buffers.len() > available {
            return Err(HardwareError::RingFull {
                ring: ring.name().to_string(),
                requested: buffers.len(),
                available,
            });
        }
        state.pending.extend(buffers.iter().cloned());
        Ok(())
    }

    fn poll_complete(&mut self, dram: &mut Dram, ring: Ring) -> usize {
        if let Err(err) = self.process(dram) {
            log::error!("[SimTransform] frame processing failed: {}", err);
        }
        match ring {
            Ring::Tx => self.tx.as_ref().map_or(0, |s| s.completed),
            Ring::Rx => self.rx.as_ref().map_or(0, |s| s.completed),
        }
    }

    fn free(&mut self, ring: Ring, count: usize) -> Result<(), HardwareError> {
        let state = self.ring_mut(ring)?;
        if count > state.completed {
            return Err(HardwareError::FreeMismatch {
                ring: ring.name().to_string(),
                requested: count,
                completed: state.completed,
            });
        }
        state.completed -= count;
        Ok(())
    }
}

/// Exponent accelerator: fixed point in, `f64` exponentials out
pub struct SimExpEngine {
    data_type: DataType,
    staged: Option<Vec<f64>>,
    busy_polls: u32,
    remaining: u32,
}

impl SimExpEngine {
    pub fn new(data_type: DataType, busy_polls: u32) -> Self {
        Self {
            data_type,
            staged: None,
            busy_polls,
            remaining: 0,
        }
    }
}

impl StreamDma for SimExpEngine {
    fn start(&mut self, dram: &mut Dram, direction: Direction, region: &Region) -> Result<(), HardwareError> {
        match direction {
            Direction::ToDevice => {
                let count = region.len / self.data_type.size_bytes();
                let values = dram.read_i16s(region.address, count)?;
                self.staged = Some(
                    values
                        .into_iter()
                        .map(|raw| self.data_type.to_f64(raw).exp())
                        .collect(),
                );
            }
            Direction::FromDevice => {
                let mut values = self.staged.take().ok_or(HardwareError::DeviceFault {
                    details: "exponent output requested before input".to_string(),
                })?;
                values.truncate(region.len / 8);
                dram.write_f64s(region.address, &values)?;
            }
        }
        self.remaining = self.busy_polls;
        Ok(())
    }

    fn is_busy(&mut self, _dram: &mut Dram, _direction: Direction) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::source::{Ramp, Silence};

    fn rings(dram_base: usize) -> (DescriptorRing, DescriptorRing) {
        (
            DescriptorRing {
                space: Region::new("tx_descriptors", dram_base, 0x80),
                count: 2,
            },
            DescriptorRing {
                space: Region::new("rx_descriptors", dram_base + 0x80, 0x40),
                count: 1,
            },
        )
    }

    #[test]
    fn test_acquisition_rejects_wrong_direction() {
        let mut dram = Dram::new(0, 64);
        let mut acq = SimAcquisition::new(Box::new(Silence), 0);
        let region = Region::new("acq", 0, 32);
        assert!(matches!(
            acq.start(&mut dram, Direction::ToDevice, &region),
            Err(HardwareError::UnsupportedDirection { .. })
        ));
    }

    #[test]
    fn test_acquisition_busy_then_idle() {
        let mut dram = Dram::new(0, 64);
        let mut acq = SimAcquisition::new(Box::new(Ramp::new(1.0, 0.0, 8)), 2);
        let region = Region::new("acq", 0, 32);
        acq.start(&mut dram, Direction::FromDevice, &region).unwrap();

        assert!(matches!(
            acq.start(&mut dram, Direction::FromDevice, &region),
            Err(HardwareError::EngineBusy { .. })
        ));
        assert!(acq.is_busy(&mut dram, Direction::FromDevice));
        assert!(acq.is_busy(&mut dram, Direction::FromDevice));
        assert!(!acq.is_busy(&mut dram, Direction::FromDevice));
        assert_eq!(dram.read_f32s(0, 8).unwrap(), vec![1.0; 8]);
        assert_eq!(acq.packets(), 1);
    }

    #[test]
    fn test_transform_requires_started_rings() {
        let mut dram = Dram::new(0, 256);
        let mut engine = SimTransformEngine::new(8, DataType::Fp16Bp8, 0);
        assert!(matches!(
            engine.submit(&mut dram, Ring::Tx, &[Region::new("a", 0, 16)]),
            Err(HardwareError::RingNotStarted { .. })
        ));
    }

    #[test]
    fn test_transform_dc_line() {
        let mut dram = Dram::new(0, 256);
        let mut engine = SimTransformEngine::new(8, DataType::Fp16Bp8, 1);
        let (tx, rx) = rings(0x100);
        engine.start_rings(&tx, &rx).unwrap();

        dram.write_f32s(0, &[0.5; 8]).unwrap();
        engine
            .submit(&mut dram, Ring::Tx, &[Region::new("a", 0, 16), Region::new("b", 16, 16)])
            .unwrap();
        engine
            .submit(&mut dram, Ring::Rx, &[Region::new("line", 64, 16)])
            .unwrap();

        // one poll of latency
        assert_eq!(engine.poll_complete(&mut dram, Ring::Rx), 0);
        assert_eq!(engine.poll_complete(&mut dram, Ring::Rx), 1);
        assert_eq!(engine.poll_complete(&mut dram, Ring::Tx), 2);

        let line = dram.read_i16s(64, 8).unwrap();
        // DC magnitude 8 * 0.5 scaled by 2/8 = 1.0
        assert_eq!(line[0], 256);
        assert!(line[1..].iter().all(|&v| v == 0));

        engine.free(Ring::Tx, 2).unwrap();
        engine.free(Ring::Rx, 1).unwrap();
        assert_eq!(engine.poll_complete(&mut dram, Ring::Rx), 0);
        assert_eq!(engine.frames(), 1);
    }

    #[test]
    fn test_transform_ring_full_and_free_mismatch() {
        let mut dram = Dram::new(0, 256);
        let mut engine = SimTransformEngine::new(8, DataType::Fp16Bp8, 0);
        let (tx, rx) = rings(0x100);
        engine.start_rings(&tx, &rx).unwrap();

        let err = engine
            .submit(
                &mut dram,
                Ring::Tx,
                &[
                    Region::new("a", 0, 16),
                    Region::new("b", 16, 16),
                    Region::new("c", 32, 16),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err,
            HardwareError::RingFull {
                ring: "tx".to_string(),
                requested: 3,
                available: 2
            }
        );

        assert!(matches!(
            engine.free(Ring::Rx, 1),
            Err(HardwareError::FreeMismatch { .. })
        ));
    }

    #[test]
    fn test_exp_engine() {
        let mut dram = Dram::new(0, 64);
        let mut exp = SimExpEngine::new(DataType::Fp16Bp8, 0);
        dram.write_i16s(0, &[0, 256]).unwrap();

        assert!(exp
            .start(&mut dram, Direction::FromDevice, &Region::new("rx", 16, 16))
            .is_err());

        exp.start(&mut dram, Direction::ToDevice, &Region::new("tx", 0, 4))
            .unwrap();
        exp.start(&mut dram, Direction::FromDevice, &Region::new("rx", 16, 16))
            .unwrap();
        assert!(!exp.is_busy(&mut dram, Direction::FromDevice));

        let values = dram.read_f64s(16, 2).unwrap();
        assert_eq!(values[0], 1.0);
        assert!((values[1] - std::f64::consts::E).abs() < 1e-12);
    }
}
