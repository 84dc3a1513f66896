// Pipeline error types and constants
//
// Every variant is fatal: the control loop stops, and the top-level
// handler logs the error and releases the platform. Timing warnings are
// not errors and never reach this type.

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Pipeline error code constants
///
/// Error code range: 3001-3005
pub struct PipelineErrorCodes {}

impl PipelineErrorCodes {
    /// A setup call failed at startup
    pub const HARDWARE_INIT: i32 = 3001;

    /// A steady-state transfer or engine request failed
    pub const TRANSFER: i32 = 3002;

    /// A window boundary was reached while the previous inference ran
    pub const DEADLINE_VIOLATION: i32 = 3003;

    /// Accelerator architecture parameters failed validation
    pub const INVALID_ARCHITECTURE: i32 = 3004;

    /// Pipeline configuration failed validation
    pub const INVALID_CONFIG: i32 = 3005;
}

/// Log a pipeline error with structured context
///
/// This function logs pipeline errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_pipeline_error(err: &PipelineError, context: &str) {
    error!(
        "Pipeline error in {}: code={}, component=SpeechPipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Fatal pipeline errors
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Engine configuration, ring setup, program build or image copy failed
    HardwareInit { stage: String, details: String },

    /// Submit/alloc/free failure, completion count mismatch, or poll timeout
    Transfer { stage: String, details: String },

    /// New window boundary while the previous run is still in flight
    DeadlineViolation {
        line: usize,
        run_offset: usize,
        program_len: usize,
    },

    /// Accelerator architecture parameters are not usable
    InvalidArchitecture { reason: String },

    /// Pipeline geometry or model configuration is not usable
    InvalidConfig { reason: String },
}

impl PipelineError {
    /// Wrap a lower-level error raised during startup
    pub fn init(stage: &str, err: &dyn ErrorCode) -> Self {
        PipelineError::HardwareInit {
            stage: stage.to_string(),
            details: format!("code {}: {}", err.code(), err.message()),
        }
    }

    /// Wrap a lower-level error raised during steady-state operation
    pub fn transfer(stage: &str, err: &dyn ErrorCode) -> Self {
        PipelineError::Transfer {
            stage: stage.to_string(),
            details: format!("code {}: {}", err.code(), err.message()),
        }
    }

    /// Bounded busy-wait ran out of polls
    pub fn poll_timeout(stage: &str, polls: u64) -> Self {
        PipelineError::Transfer {
            stage: stage.to_string(),
            details: format!("no completion after {} polls", polls),
        }
    }
}

impl ErrorCode for PipelineError {
    fn code(&self) -> i32 {
        match self {
            PipelineError::HardwareInit { .. } => PipelineErrorCodes::HARDWARE_INIT,
            PipelineError::Transfer { .. } => PipelineErrorCodes::TRANSFER,
            PipelineError::DeadlineViolation { .. } => PipelineErrorCodes::DEADLINE_VIOLATION,
            PipelineError::InvalidArchitecture { .. } => PipelineErrorCodes::INVALID_ARCHITECTURE,
            PipelineError::InvalidConfig { .. } => PipelineErrorCodes::INVALID_CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineError::HardwareInit { stage, details } => {
                format!("Hardware initialization failed at {}: {}", stage, details)
            }
            PipelineError::Transfer { stage, details } => {
                format!("Transfer fault at {}: {}", stage, details)
            }
            PipelineError::DeadlineViolation {
                line,
                run_offset,
                program_len,
            } => format!(
                "Inference missed its deadline at line {} (accepted {} of {} program bytes)",
                line, run_offset, program_len
            ),
            PipelineError::InvalidArchitecture { reason } => {
                format!("Invalid accelerator architecture: {}", reason)
            }
            PipelineError::InvalidConfig { reason } => {
                format!("Invalid pipeline configuration: {}", reason)
            }
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PipelineError {}
