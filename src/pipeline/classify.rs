//! Classification of finished inferences
//!
//! The compute engine leaves one fixed-point score per class at the start
//! of the region it ran on. In softmax mode the scores are shifted by
//! their maximum, exponentiated by the exponent accelerator and
//! normalized on the CPU. In raw mode the fixed-point score itself is the
//! confidence.

use serde::Serialize;

use crate::config::{AppConfig, ScoreMode};
use crate::error::PipelineError;
use crate::hal::{Direction, StreamDma};
use crate::memory::{Dram, MemoryLayout, Region};
use crate::program::DataType;

const ACCEPTED_MARKER: &str = " <-------------";

/// Subtract the maximum from every score, saturating
///
/// The largest score maps to 0, so the exponent of every shifted score is
/// at most 1 and the sum cannot overflow.
pub fn shift_by_max(scores: &[i16]) -> Vec<i16> {
    let max = scores.iter().copied().max().unwrap_or(0);
    scores.iter().map(|&s| s.saturating_sub(max)).collect()
}

/// Normalize exponentials into probabilities
pub fn softmax_from_exponents(exponents: &[f64]) -> Vec<f64> {
    let sum: f64 = exponents.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        let uniform = 1.0 / exponents.len().max(1) as f64;
        return vec![uniform; exponents.len()];
    }
    exponents.iter().map(|&e| e / sum).collect()
}

/// Index and value of the largest element; the first one wins ties
pub fn argmax<T: PartialOrd + Copy>(values: &[T]) -> Option<(usize, T)> {
    let mut best: Option<(usize, T)> = None;
    for (index, &value) in values.iter().enumerate() {
        if best.map_or(true, |(_, current)| value > current) {
            best = Some((index, value));
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class_index: usize,
    pub label: String,
    pub confidence: f64,
    pub accepted: bool,
    /// Probability (softmax) or scaled score (raw) per class
    pub scores: Vec<f64>,
}

pub struct ClassificationDispatcher {
    mode: ScoreMode,
    labels: Vec<String>,
    thresholds: Vec<f64>,
    data_type: DataType,
    exp_tx: Region,
    exp_rx: Region,
    max_poll_iterations: u64,
}

impl ClassificationDispatcher {
    pub fn new(config: &AppConfig, layout: &MemoryLayout) -> Self {
        let labels = config.model.labels.clone();
        let thresholds = labels
            .iter()
            .map(|label| config.classification.threshold_for(label))
            .collect();

        Self {
            mode: config.classification.mode,
            labels,
            thresholds,
            data_type: config.architecture.data_type,
            exp_tx: layout.exp_tx.clone(),
            exp_rx: layout.exp_rx.clone(),
            max_poll_iterations: config.timing.max_poll_iterations,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Acceptance threshold of `class`
    pub fn threshold(&self, class: usize) -> f64 {
        self.thresholds.get(class).copied().unwrap_or(f64::INFINITY)
    }

    /// Read the scores left in `region` and classify them
    pub fn classify(
        &self,
        dram: &mut Dram,
        region: &Region,
        exp: &mut dyn StreamDma,
    ) -> Result<ClassificationResult, PipelineError> {
        let scores = dram
            .read_i16s(region.address, self.labels.len())
            .map_err(|err| PipelineError::transfer("score read", &err))?;

        let confidences = match self.mode {
            ScoreMode::Softmax => self.softmax(dram, &scores, exp)?,
            ScoreMode::Raw => scores.iter().map(|&s| self.data_type.to_f64(s)).collect(),
        };

        let result = self.evaluate(confidences);
        tracing::info!(
            "[Dispatcher] {:.9} {}{}",
            result.confidence,
            result.label,
            if result.accepted { ACCEPTED_MARKER } else { "" }
        );
        Ok(result)
    }

    /// Pick the winning class and apply its threshold
    pub fn evaluate(&self, confidences: Vec<f64>) -> ClassificationResult {
        let (class_index, confidence) = argmax(&confidences).unwrap_or((0, 0.0));
        ClassificationResult {
            class_index,
            label: self.labels.get(class_index).cloned().unwrap_or_default(),
            confidence,
            accepted: confidence > self.threshold(class_index),
            scores: confidences,
        }
    }

    fn softmax(
        &self,
        dram: &mut Dram,
        scores: &[i16],
        exp: &mut dyn StreamDma,
    ) -> Result<Vec<f64>, PipelineError> {
        let shifted = shift_by_max(scores);
        let tx = self.exp_tx.slice(0, shifted.len() * self.data_type.size_bytes());
        let rx = self.exp_rx.slice(0, shifted.len() * 8);

        dram.write_i16s(tx.address, &shifted)
            .map_err(|err| PipelineError::transfer("exponent staging", &err))?;

        exp.start(dram, Direction::ToDevice, &tx)
            .map_err(|err| PipelineError::transfer("exponent tx", &err))?;
        self.wait(dram, exp, Direction::ToDevice)?;
        exp.start(dram, Direction::FromDevice, &rx)
            .map_err(|err| PipelineError::transfer("exponent rx", &err))?;
        self.wait(dram, exp, Direction::FromDevice)?;

        let exponents = dram
            .read_f64s(rx.address, shifted.len())
            .map_err(|err| PipelineError::transfer("exponent read", &err))?;
        Ok(softmax_from_exponents(&exponents))
    }

    fn wait(&self, dram: &mut Dram, exp: &mut dyn StreamDma, direction: Direction) -> Result<(), PipelineError> {
        let mut polls = 0u64;
        while exp.is_busy(dram, direction) {
            polls += 1;
            if polls >= self.max_poll_iterations {
                return Err(PipelineError::poll_timeout("exponent wait", polls));
            }
        }
        Ok(())
    }
}
