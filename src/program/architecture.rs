//! Accelerator architecture parameters

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::program::instruction::{InstructionLayout, MAX_INSTRUCTION_BYTES};

/// Element type of accelerator vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 16-bit fixed point with 8 fractional bits
    #[serde(rename = "FP16BP8")]
    Fp16Bp8,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::Fp16Bp8 => 2,
        }
    }

    pub fn binary_point(self) -> u32 {
        match self {
            DataType::Fp16Bp8 => 8,
        }
    }

    /// Convert a raw fixed-point value to floating point
    pub fn to_f64(self, raw: i16) -> f64 {
        raw as f64 / (1u32 << self.binary_point()) as f64
    }

    /// Convert floating point to fixed point, saturating at the type range
    pub fn from_f64(self, value: f64) -> i16 {
        let scaled = (value * (1u32 << self.binary_point()) as f64).round();
        scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

/// Compute engine architecture, as produced by the accelerator generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Architecture {
    pub data_type: DataType,
    pub array_size: usize,
    pub local_depth: usize,
    pub accumulator_depth: usize,
    pub dram0_depth: usize,
    pub dram1_depth: usize,
    pub stride0_depth: usize,
    pub stride1_depth: usize,
    pub simd_registers_depth: usize,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            data_type: DataType::Fp16Bp8,
            array_size: 8,
            local_depth: 16384,
            accumulator_depth: 4096,
            dram0_depth: 32768,
            dram1_depth: 131072,
            stride0_depth: 8,
            stride1_depth: 8,
            simd_registers_depth: 1,
        }
    }
}

impl Architecture {
    /// Bytes per vector
    pub fn vector_size(&self) -> usize {
        self.array_size * self.data_type.size_bytes()
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| Err(PipelineError::InvalidArchitecture { reason });

        let depths = [
            ("array_size", self.array_size),
            ("local_depth", self.local_depth),
            ("accumulator_depth", self.accumulator_depth),
            ("dram0_depth", self.dram0_depth),
            ("dram1_depth", self.dram1_depth),
            ("stride0_depth", self.stride0_depth),
            ("stride1_depth", self.stride1_depth),
            ("simd_registers_depth", self.simd_registers_depth),
        ];
        for (name, value) in depths {
            if value == 0 {
                return invalid(format!("{} must be positive", name));
            }
        }

        if !self.stride0_depth.is_power_of_two() || !self.stride1_depth.is_power_of_two() {
            return invalid(format!(
                "stride depths {} and {} must be powers of two",
                self.stride0_depth, self.stride1_depth
            ));
        }

        if self.dram0_depth < 2 {
            return invalid("dram0_depth must leave room for probe vectors".to_string());
        }

        let bits = InstructionLayout::new(self).total_bits();
        if bits > MAX_INSTRUCTION_BYTES as u32 * 8 {
            return invalid(format!(
                "instruction needs {} bits, more than {} supported",
                bits,
                MAX_INSTRUCTION_BYTES * 8
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let arch = Architecture::default();
        assert!(arch.validate().is_ok());
        assert_eq!(arch.vector_size(), 16);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let arch = Architecture {
            local_depth: 0,
            ..Architecture::default()
        };
        match arch.validate() {
            Err(PipelineError::InvalidArchitecture { reason }) => {
                assert!(reason.contains("local_depth"))
            }
            other => panic!("Expected InvalidArchitecture, got {:?}", other),
        }
    }

    #[test]
    fn test_stride_must_be_power_of_two() {
        let arch = Architecture {
            stride0_depth: 6,
            ..Architecture::default()
        };
        assert!(arch.validate().is_err());
    }

    #[test]
    fn test_fixed_point_conversion() {
        let dt = DataType::Fp16Bp8;
        assert_eq!(dt.to_f64(256), 1.0);
        assert_eq!(dt.to_f64(-128), -0.5);
        assert_eq!(dt.from_f64(5.34375), 1368);
        assert_eq!(dt.from_f64(1.0e6), i16::MAX);
        assert_eq!(dt.from_f64(-1.0e6), i16::MIN);
    }
}
