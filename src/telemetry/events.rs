//! Pipeline telemetry event types exposed to the CLI.

use serde::{Deserialize, Serialize};

use crate::hal::MotorDirection;

/// Events recorded by the control loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PipelineEvent {
    InferenceStarted {
        line: usize,
        region: usize,
        accepted_bytes: usize,
    },
    Classification {
        iteration: u64,
        class_index: usize,
        label: String,
        confidence: f64,
        accepted: bool,
    },
    TimingWarning {
        iteration: u64,
        slack_cycles: u32,
    },
    CommandChanged {
        iteration: u64,
        label: String,
        direction: MotorDirection,
        leds: u8,
    },
    Fault {
        code: i32,
        message: String,
    },
}
