// Instruction program error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Program error code constants
///
/// Error code range: 2001-2005
pub struct ProgramErrorCodes {}

impl ProgramErrorCodes {
    /// Instruction buffer capacity exceeded
    pub const BUFFER_OVERFLOW: i32 = 2001;

    /// Operand value does not fit its encoded width
    pub const OPERAND_OVERFLOW: i32 = 2002;

    /// Patch target is not an instruction boundary inside the program
    pub const INVALID_PATCH: i32 = 2003;

    /// Program cannot be padded or split at the requested alignment
    pub const MISALIGNED: i32 = 2004;

    /// Encoded bytes do not decode to a known instruction
    pub const INVALID_INSTRUCTION: i32 = 2005;
}

/// Log a program error with structured context
pub fn log_program_error(err: &ProgramError, context: &str) {
    error!(
        "Program error in {}: code={}, component=InstructionBuffer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while building, patching, or decoding the compute-engine
/// instruction program
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramError {
    /// Append would run past the instruction buffer capacity
    BufferOverflow { requested: usize, capacity: usize },

    /// Operand does not fit the layout's bit width
    OperandOverflow {
        operand: usize,
        value: u64,
        bits: u32,
    },

    /// Patch offset is not a written instruction boundary
    InvalidPatch { offset: usize, len: usize },

    /// Offset or length not aligned as required
    Misaligned { offset: usize, alignment: usize },

    /// Unknown opcode or flags in encoded bytes
    InvalidInstruction { offset: usize, header: u8 },
}

impl ErrorCode for ProgramError {
    fn code(&self) -> i32 {
        match self {
            ProgramError::BufferOverflow { .. } => ProgramErrorCodes::BUFFER_OVERFLOW,
            ProgramError::OperandOverflow { .. } => ProgramErrorCodes::OPERAND_OVERFLOW,
            ProgramError::InvalidPatch { .. } => ProgramErrorCodes::INVALID_PATCH,
            ProgramError::Misaligned { .. } => ProgramErrorCodes::MISALIGNED,
            ProgramError::InvalidInstruction { .. } => ProgramErrorCodes::INVALID_INSTRUCTION,
        }
    }

    fn message(&self) -> String {
        match self {
            ProgramError::BufferOverflow {
                requested,
                capacity,
            } => format!(
                "Instruction buffer overflow: need {} bytes, capacity {}",
                requested, capacity
            ),
            ProgramError::OperandOverflow {
                operand,
                value,
                bits,
            } => format!(
                "Operand {} value {} does not fit in {} bits",
                operand, value, bits
            ),
            ProgramError::InvalidPatch { offset, len } => format!(
                "Cannot patch at offset {} (program length {})",
                offset, len
            ),
            ProgramError::Misaligned { offset, alignment } => {
                format!("Offset {} is not aligned to {}", offset, alignment)
            }
            ProgramError::InvalidInstruction { offset, header } => format!(
                "Invalid instruction header 0x{:02x} at offset {}",
                header, offset
            ),
        }
    }
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProgramError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ProgramError {}
