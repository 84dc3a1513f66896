//! Configuration management for the keyword-spotting pipeline
//!
//! This module provides runtime configuration loading from JSON files so
//! that pipeline geometry, accelerator parameters, thresholds and the
//! actuation table can be adjusted without recompilation. A missing or
//! malformed file falls back to the defaults of the reference board.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::PipelineError;
use crate::hal::MotorDirection;
use crate::program::Architecture;

/// Bytes per acquisition sample (32-bit float)
pub const SAMPLE_SIZE: usize = 4;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub actuation: ActuationConfig,
}

/// Streaming geometry and DRAM placement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per acquisition packet
    pub acq_packet_length: usize,
    /// Spectrogram lines per frame (one second at 16 kHz)
    pub frame_height: usize,
    /// Overlapping windows tracked over one frame
    pub window_count: usize,
    /// Rotating model-input regions in DRAM0
    pub model_input_buffers: usize,
    /// Base address of the DRAM the arena allocates from
    pub memory_base: usize,
    /// Region alignment, a multiple of 0x10000
    pub buffer_alignment: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acq_packet_length: 128,
            frame_height: 124,
            window_count: 4,
            model_input_buffers: 2,
            memory_base: 0x8000_0000,
            buffer_alignment: 0x10000,
        }
    }
}

/// Compiled model artifacts and output shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Flash offset of the compiled instruction program
    pub program_flash_offset: usize,
    /// Program size in bytes
    pub program_size: usize,
    /// Flash offset of the model constants
    pub consts_flash_offset: usize,
    /// Constants size in accelerator vectors
    pub consts_vectors: usize,
    /// Number of output classes
    pub output_length: usize,
    /// Label per output class
    pub labels: Vec<String>,
    /// Capacity of the instruction buffer in bytes
    pub instruction_buffer_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            program_flash_offset: 0x40_0000,
            program_size: 642_464,
            consts_flash_offset: 0x50_0000,
            consts_vectors: 93_937,
            output_length: 12,
            labels: default_labels(),
            instruction_buffer_size: 0x10_0000,
        }
    }
}

/// Default speech-commands label set
pub fn default_labels() -> Vec<String> {
    [
        "down",
        "go",
        "left",
        "no",
        "off",
        "on",
        "right",
        "stop",
        "up",
        "yes",
        "_silence_",
        "_unknown_",
    ]
    .iter()
    .map(|label| label.to_string())
    .collect()
}

/// How raw accelerator scores become confidences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Exponent accelerator plus normalization
    Softmax,
    /// Fixed-point score divided by 2^binary_point
    Raw,
}

/// Confidence thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub mode: ScoreMode,
    /// Global threshold; when absent 0.9 (softmax) or 50.0 (raw) applies
    pub default_threshold: Option<f64>,
    /// Per-label overrides
    pub thresholds: BTreeMap<String, f64>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            mode: ScoreMode::Softmax,
            default_threshold: None,
            thresholds: BTreeMap::new(),
        }
    }
}

impl ClassificationConfig {
    /// Effective global threshold for the configured mode
    pub fn effective_default_threshold(&self) -> f64 {
        self.default_threshold.unwrap_or(match self.mode {
            ScoreMode::Softmax => 0.9,
            ScoreMode::Raw => 50.0,
        })
    }

    /// Threshold for a label, falling back to the global one
    pub fn threshold_for(&self, label: &str) -> f64 {
        self.thresholds
            .get(label)
            .copied()
            .unwrap_or_else(|| self.effective_default_threshold())
    }
}

/// Deadline and busy-wait bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Slack below this many cycles is reported as a timing warning
    pub slack_warning_cycles: u32,
    /// Upper bound on every busy-wait loop
    pub max_poll_iterations: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            slack_warning_cycles: 100_000,
            max_poll_iterations: 1_000_000,
        }
    }
}

/// One entry of the actuation lookup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub label: String,
    pub direction: MotorDirection,
    pub left_duty: u32,
    pub right_duty: u32,
    pub leds: u8,
    /// Overrides the classification threshold for this command
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Debounced motor/LED actuation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub enabled: bool,
    /// Debounce length in iterations; one frame height when absent
    pub debounce_ticks: Option<u32>,
    pub pwm_period: u32,
    pub commands: Vec<CommandConfig>,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        let command = |label: &str, direction, duty, leds| CommandConfig {
            label: label.to_string(),
            direction,
            left_duty: duty,
            right_duty: duty,
            leds,
            threshold: None,
        };

        Self {
            enabled: true,
            debounce_ticks: None,
            pwm_period: 1000,
            commands: vec![
                command("go", MotorDirection::Forward, 1000, 0b0001),
                command("left", MotorDirection::SpinLeft, 600, 0b0010),
                command("right", MotorDirection::SpinRight, 600, 0b0100),
                command("stop", MotorDirection::Forward, 0, 0b1000),
                command("down", MotorDirection::Backward, 800, 0b0110),
            ],
        }
    }
}

impl Default for AppConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            architecture: Architecture::default(),
            model: ModelConfig::default(),
            classification: ClassificationConfig::default(),
            timing: TimingConfig::default(),
            actuation: ActuationConfig::default(),
        }
    }
}

/// Sizes derived from the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineGeometry {
    pub acq_packet_length: usize,
    /// Bytes per acquisition packet
    pub acq_packet_size: usize,
    /// Values per spectrogram line
    pub frame_width: usize,
    /// Bytes per spectrogram line
    pub frame_line_size: usize,
    pub frame_height: usize,
    pub window_count: usize,
    /// Lines between two inference starts
    pub window_step: usize,
    pub model_input_buffers: usize,
    /// Vectors per model-input row
    pub model_input_width: usize,
    pub model_input_height: usize,
    /// Bytes per model-input row
    pub model_input_line_size: usize,
    pub array_size: usize,
    /// Bytes per accelerator vector
    pub vector_size: usize,
    pub dram0_depth: usize,
    /// Bytes per DRAM0 region
    pub dram0_size: usize,
    /// Bytes reserved for DRAM1 constants
    pub dram1_size: usize,
    /// Bytes of model constants copied from flash
    pub consts_size: usize,
    pub output_length: usize,
    pub instruction_buffer_size: usize,
    pub memory_base: usize,
    pub buffer_alignment: usize,
}

impl PipelineGeometry {
    /// Vectors occupied by one full model input
    pub fn model_input_vectors(&self) -> usize {
        self.model_input_height * self.model_input_width
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file doesn't exist
    /// or the JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/pipeline_config.json")
    }

    /// Check the configuration and derive the pipeline geometry
    pub fn validate(&self) -> Result<PipelineGeometry, PipelineError> {
        self.architecture.validate()?;

        let pipeline = &self.pipeline;
        let arch = &self.architecture;
        let model = &self.model;

        let invalid = |reason: String| Err(PipelineError::InvalidConfig { reason });

        if pipeline.acq_packet_length == 0 {
            return invalid("acq_packet_length must be positive".to_string());
        }
        if pipeline.window_count == 0 || pipeline.frame_height == 0 {
            return invalid("frame_height and window_count must be positive".to_string());
        }
        if pipeline.frame_height % pipeline.window_count != 0 {
            return invalid(format!(
                "frame_height {} is not a multiple of window_count {}",
                pipeline.frame_height, pipeline.window_count
            ));
        }
        if pipeline.model_input_buffers < 2 {
            return invalid(format!(
                "at least 2 model input buffers required, got {}",
                pipeline.model_input_buffers
            ));
        }
        if pipeline.buffer_alignment == 0 || pipeline.buffer_alignment % 0x10000 != 0 {
            return invalid(format!(
                "buffer_alignment 0x{:x} is not a multiple of 0x10000",
                pipeline.buffer_alignment
            ));
        }
        if pipeline.memory_base % pipeline.buffer_alignment != 0 {
            return invalid(format!(
                "memory_base 0x{:x} is not aligned to 0x{:x}",
                pipeline.memory_base, pipeline.buffer_alignment
            ));
        }
        if model.output_length == 0 {
            return invalid("output_length must be positive".to_string());
        }
        if model.labels.len() != model.output_length {
            return invalid(format!(
                "{} labels for {} outputs",
                model.labels.len(),
                model.output_length
            ));
        }

        let frame_width = 2 * pipeline.acq_packet_length;
        let model_input_width = frame_width / 2 + 1;
        let vector_size = arch.vector_size();
        let input_vectors = pipeline.frame_height * model_input_width;

        if arch.dram0_depth < input_vectors + 2 {
            return invalid(format!(
                "dram0_depth {} cannot hold {} input vectors plus 2 probe vectors",
                arch.dram0_depth, input_vectors
            ));
        }
        if arch.dram1_depth < model.consts_vectors {
            return invalid(format!(
                "dram1_depth {} cannot hold {} constant vectors",
                arch.dram1_depth, model.consts_vectors
            ));
        }
        if model.output_length * arch.data_type.size_bytes() > input_vectors * vector_size {
            return invalid("model output does not fit in the input region".to_string());
        }

        for command in &self.actuation.commands {
            if !model.labels.contains(&command.label) {
                return invalid(format!("actuation label {:?} is not a model label", command.label));
            }
        }
        for label in self.classification.thresholds.keys() {
            if !model.labels.contains(label) {
                return invalid(format!("threshold label {:?} is not a model label", label));
            }
        }

        Ok(PipelineGeometry {
            acq_packet_length: pipeline.acq_packet_length,
            acq_packet_size: pipeline.acq_packet_length * SAMPLE_SIZE,
            frame_width,
            frame_line_size: frame_width * arch.data_type.size_bytes(),
            frame_height: pipeline.frame_height,
            window_count: pipeline.window_count,
            window_step: pipeline.frame_height / pipeline.window_count,
            model_input_buffers: pipeline.model_input_buffers,
            model_input_width,
            model_input_height: pipeline.frame_height,
            model_input_line_size: model_input_width * vector_size,
            array_size: arch.array_size,
            vector_size,
            dram0_depth: arch.dram0_depth,
            dram0_size: arch.dram0_depth * vector_size,
            dram1_size: arch.dram1_depth * vector_size,
            consts_size: model.consts_vectors * vector_size,
            output_length: model.output_length,
            instruction_buffer_size: model.instruction_buffer_size,
            memory_base: pipeline.memory_base,
            buffer_alignment: pipeline.buffer_alignment,
        })
    }

    /// Debounce length, one frame height unless configured
    pub fn debounce_ticks(&self) -> u32 {
        self.actuation
            .debounce_ticks
            .unwrap_or(self.pipeline.frame_height as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.acq_packet_length, 128);
        assert_eq!(config.pipeline.frame_height, 124);
        assert_eq!(config.model.labels.len(), 12);
        assert_eq!(config.model.labels[7], "stop");
        assert_eq!(config.classification.effective_default_threshold(), 0.9);
        assert_eq!(config.timing.slack_warning_cycles, 100_000);
        assert_eq!(config.debounce_ticks(), 124);
    }

    #[test]
    fn test_default_geometry() {
        let geometry = AppConfig::default().validate().unwrap();
        assert_eq!(geometry.acq_packet_size, 512);
        assert_eq!(geometry.frame_width, 256);
        assert_eq!(geometry.frame_line_size, 512);
        assert_eq!(geometry.window_step, 31);
        assert_eq!(geometry.model_input_width, 129);
        assert_eq!(geometry.vector_size, 16);
        assert_eq!(geometry.model_input_line_size, 129 * 16);
        assert_eq!(geometry.consts_size, 93_937 * 16);
    }

    #[test]
    fn test_rejects_uneven_windows() {
        let mut config = AppConfig::default();
        config.pipeline.window_count = 5;
        match config.validate() {
            Err(PipelineError::InvalidConfig { reason }) => {
                assert!(reason.contains("window_count"))
            }
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_single_buffer() {
        let mut config = AppConfig::default();
        config.pipeline.model_input_buffers = 1;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_label_mismatch() {
        let mut config = AppConfig::default();
        config.model.labels.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_small_dram0() {
        let mut config = AppConfig::default();
        config.architecture.dram0_depth = 124 * 129 + 1;
        assert!(config.validate().is_err());
        config.architecture.dram0_depth = 124 * 129 + 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_thresholds() {
        let mut config = ClassificationConfig::default();
        config.thresholds.insert("stop".to_string(), 0.5);
        assert_eq!(config.threshold_for("stop"), 0.5);
        assert_eq!(config.threshold_for("go"), 0.9);

        config.mode = ScoreMode::Raw;
        assert_eq!(config.threshold_for("go"), 50.0);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("does/not/exist.json");
        assert_eq!(config.pipeline.frame_height, 124);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.pipeline.window_count, config.pipeline.window_count);
        assert_eq!(parsed.actuation.commands, config.actuation.commands);
        assert_eq!(parsed.classification.mode, ScoreMode::Softmax);
    }

    #[test]
    fn test_partial_json_uses_section_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "classification": { "mode": "raw" } }"#).unwrap();
        assert_eq!(parsed.classification.mode, ScoreMode::Raw);
        assert_eq!(parsed.pipeline.frame_height, 124);
        assert_eq!(parsed.architecture.array_size, 8);
    }
}
