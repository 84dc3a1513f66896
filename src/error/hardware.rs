// Hardware error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Hardware error code constants
///
/// Error code range: 1001-1008
pub struct HardwareErrorCodes {}

impl HardwareErrorCodes {
    /// Descriptor ring used before `start_rings`
    pub const RING_NOT_STARTED: i32 = 1001;

    /// Not enough free descriptors on the ring
    pub const RING_FULL: i32 = 1002;

    /// Freed more descriptors than were completed
    pub const FREE_MISMATCH: i32 = 1003;

    /// Engine asked to start while still busy
    pub const ENGINE_BUSY: i32 = 1004;

    /// Engine does not support the requested transfer direction
    pub const UNSUPPORTED_DIRECTION: i32 = 1005;

    /// Address range outside of the mapped memory
    pub const ADDRESS_OUT_OF_RANGE: i32 = 1006;

    /// Engine rejected its configuration
    pub const CONFIGURATION_REJECTED: i32 = 1007;

    /// Engine reported a device-level fault
    pub const DEVICE_FAULT: i32 = 1008;
}

/// Log a hardware error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_hardware_error(err: &HardwareError, context: &str) {
    error!(
        "Hardware error in {}: code={}, component=Hal, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors reported by the hardware abstraction layer
///
/// These errors are produced by transfer engines, the compute engine,
/// and memory access. The pipeline maps them onto its own fatal taxonomy
/// together with the stage that was running.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Descriptor ring used before it was created and started
    RingNotStarted { ring: String },

    /// Submission needs more descriptors than the ring has free
    RingFull {
        ring: String,
        requested: usize,
        available: usize,
    },

    /// Attempt to free descriptors that were never completed
    FreeMismatch {
        ring: String,
        requested: usize,
        completed: usize,
    },

    /// Engine is still processing a previous request
    EngineBusy { engine: String },

    /// Direction not wired on this engine
    UnsupportedDirection { engine: String },

    /// Address range does not fall inside mapped memory
    AddressOutOfRange { address: usize, len: usize },

    /// Engine rejected its configuration at setup
    ConfigurationRejected { details: String },

    /// Device-level fault
    DeviceFault { details: String },
}

impl ErrorCode for HardwareError {
    fn code(&self) -> i32 {
        match self {
            HardwareError::RingNotStarted { .. } => HardwareErrorCodes::RING_NOT_STARTED,
            HardwareError::RingFull { .. } => HardwareErrorCodes::RING_FULL,
            HardwareError::FreeMismatch { .. } => HardwareErrorCodes::FREE_MISMATCH,
            HardwareError::EngineBusy { .. } => HardwareErrorCodes::ENGINE_BUSY,
            HardwareError::UnsupportedDirection { .. } => {
                HardwareErrorCodes::UNSUPPORTED_DIRECTION
            }
            HardwareError::AddressOutOfRange { .. } => HardwareErrorCodes::ADDRESS_OUT_OF_RANGE,
            HardwareError::ConfigurationRejected { .. } => {
                HardwareErrorCodes::CONFIGURATION_REJECTED
            }
            HardwareError::DeviceFault { .. } => HardwareErrorCodes::DEVICE_FAULT,
        }
    }

    fn message(&self) -> String {
        match self {
            HardwareError::RingNotStarted { ring } => {
                format!("Descriptor ring {} used before start", ring)
            }
            HardwareError::RingFull {
                ring,
                requested,
                available,
            } => format!(
                "Descriptor ring {} full: requested {}, available {}",
                ring, requested, available
            ),
            HardwareError::FreeMismatch {
                ring,
                requested,
                completed,
            } => format!(
                "Descriptor ring {} free mismatch: requested {}, completed {}",
                ring, requested, completed
            ),
            HardwareError::EngineBusy { engine } => format!("Engine {} is busy", engine),
            HardwareError::UnsupportedDirection { engine } => {
                format!("Engine {} does not support this direction", engine)
            }
            HardwareError::AddressOutOfRange { address, len } => format!(
                "Address range 0x{:08x}+0x{:x} is outside mapped memory",
                address, len
            ),
            HardwareError::ConfigurationRejected { details } => {
                format!("Configuration rejected: {}", details)
            }
            HardwareError::DeviceFault { details } => format!("Device fault: {}", details),
        }
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HardwareError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for HardwareError {}

impl From<std::io::Error> for HardwareError {
    fn from(err: std::io::Error) -> Self {
        HardwareError::DeviceFault {
            details: err.to_string(),
        }
    }
}
