// Error types for the speech robot firmware
//
// This module defines the error taxonomy for hardware access, instruction
// program construction, and the streaming pipeline, with stable error codes
// suitable for diagnostics output.

mod hardware;
mod pipeline;
mod program;

pub use hardware::{log_hardware_error, HardwareError, HardwareErrorCodes};
pub use pipeline::{log_pipeline_error, PipelineError, PipelineErrorCodes};
pub use program::{log_program_error, ProgramError, ProgramErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent reporting on the
/// diagnostic console and in telemetry.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
