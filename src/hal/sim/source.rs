//! Sample sources feeding the simulated microphone

use std::f64::consts::PI;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::HardwareError;

/// Nominal microphone sample rate
pub const SAMPLE_RATE: u32 = 16_000;

/// Produces consecutive microphone samples
pub trait SampleSource: Send {
    fn fill(&mut self, out: &mut [f32]);
}

/// All zeros
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

impl SampleSource for Silence {
    fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);
    }
}

/// Continuous sine tone
#[derive(Debug, Clone)]
pub struct Tone {
    frequency_hz: f64,
    amplitude: f32,
    sample_rate: u32,
    phase: f64,
}

impl Tone {
    pub fn new(frequency_hz: f64, amplitude: f32) -> Self {
        Self {
            frequency_hz,
            amplitude,
            sample_rate: SAMPLE_RATE,
            phase: 0.0,
        }
    }
}

impl SampleSource for Tone {
    fn fill(&mut self, out: &mut [f32]) {
        let increment = self.frequency_hz / self.sample_rate as f64;
        for sample in out.iter_mut() {
            *sample = (2.0 * PI * self.phase).sin() as f32 * self.amplitude;
            self.phase = (self.phase + increment).fract();
        }
    }
}

/// Uniform white noise from a seeded generator
#[derive(Debug, Clone)]
pub struct Noise {
    rng: StdRng,
    amplitude: f32,
}

impl Noise {
    pub fn new(seed: u64, amplitude: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            amplitude,
        }
    }
}

impl SampleSource for Noise {
    fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.rng.gen_range(-1.0f32..=1.0) * self.amplitude;
        }
    }
}

/// Constant level per packet, rising by `increment` every packet
///
/// Packet `n` (counting from zero) carries `start + n * increment` in all
/// of its samples, which makes each transform line identifiable by its DC
/// component.
#[derive(Debug, Clone)]
pub struct Ramp {
    start: f32,
    increment: f32,
    packet_length: usize,
    position: usize,
}

impl Ramp {
    pub fn new(start: f32, increment: f32, packet_length: usize) -> Self {
        Self {
            start,
            increment,
            packet_length: packet_length.max(1),
            position: 0,
        }
    }

    /// Level carried by packet `n`
    pub fn level(&self, packet: usize) -> f32 {
        self.start + packet as f32 * self.increment
    }
}

impl SampleSource for Ramp {
    fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.level(self.position / self.packet_length);
            self.position += 1;
        }
    }
}

/// Mono samples decoded from a WAV file, followed by silence
#[derive(Debug, Clone)]
pub struct WavSource {
    samples: Vec<f32>,
    cursor: usize,
    sample_rate: u32,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self, HardwareError> {
        let fault = |details: String| HardwareError::DeviceFault { details };

        let mut reader = hound::WavReader::open(path)
            .map_err(|err| fault(format!("failed to open {}: {err}", path.display())))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(fault(format!("{} has zero channels", path.display())));
        }

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|err| fault(format!("error reading {}: {err}", path.display())))?,
            hound::SampleFormat::Int => match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|sample| sample.map(|v| v as f32 / i16::MAX as f32))
                    .collect::<Result<Vec<f32>, _>>()
                    .map_err(|err| fault(format!("error reading {}: {err}", path.display())))?,
                24 | 32 => {
                    let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                    reader
                        .samples::<i32>()
                        .map(|sample| sample.map(|v| v as f32 / scale))
                        .collect::<Result<Vec<f32>, _>>()
                        .map_err(|err| fault(format!("error reading {}: {err}", path.display())))?
                }
                bits => {
                    return Err(fault(format!(
                        "unsupported bits_per_sample={} for {}",
                        bits,
                        path.display()
                    )))
                }
            },
        };

        let channels = spec.channels as usize;
        let mono = if channels == 1 {
            samples
        } else {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        if spec.sample_rate != SAMPLE_RATE {
            log::warn!(
                "[WavSource] {} is {} Hz, played back unresampled at {} Hz",
                path.display(),
                spec.sample_rate,
                SAMPLE_RATE
            );
        }

        Ok(Self {
            samples: mono,
            cursor: 0,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            samples,
            cursor: 0,
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.samples.len()
    }
}

impl SampleSource for WavSource {
    fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.samples.get(self.cursor).copied().unwrap_or(0.0);
            self.cursor = self.cursor.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_amplitude() {
        let mut tone = Tone::new(1000.0, 0.5);
        let mut out = vec![0.0f32; 160];
        tone.fill(&mut out);
        let peak = out.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        assert!((peak - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_noise_is_seeded() {
        let mut a = Noise::new(7, 0.1);
        let mut b = Noise::new(7, 0.1);
        let mut out_a = vec![0.0f32; 32];
        let mut out_b = vec![0.0f32; 32];
        a.fill(&mut out_a);
        b.fill(&mut out_b);
        assert_eq!(out_a, out_b);
        assert!(out_a.iter().all(|v| v.abs() <= 0.1));
    }

    #[test]
    fn test_ramp_levels_per_packet() {
        let mut ramp = Ramp::new(0.0, 0.25, 4);
        let mut out = vec![0.0f32; 12];
        ramp.fill(&mut out);
        assert_eq!(&out[..4], &[0.0; 4]);
        assert_eq!(&out[4..8], &[0.25; 4]);
        assert_eq!(&out[8..], &[0.5; 4]);
    }

    #[test]
    fn test_wav_source_pads_with_silence() {
        let mut source = WavSource::from_samples(vec![0.5, -0.5]);
        let mut out = vec![1.0f32; 4];
        source.fill(&mut out);
        assert_eq!(out, vec![0.5, -0.5, 0.0, 0.0]);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_wav_file_roundtrip() {
        let path = std::env::temp_dir().join("speech_robot_source_test.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(0i16).unwrap();
            writer.finalize().unwrap();
        }

        let mut source = WavSource::open(&path).unwrap();
        let mut out = vec![0.0f32; 3];
        source.fill(&mut out);
        assert_eq!(out, vec![1.0, 0.0, 0.0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_wav_is_device_fault() {
        let result = WavSource::open(Path::new("no/such/file.wav"));
        assert!(matches!(result, Err(HardwareError::DeviceFault { .. })));
    }
}
