//! Streaming keyword-spotting pipeline
//!
//! One iteration per acquisition packet, in a fixed order:
//!
//! 1. trigger the next acquisition and run the transform of the previous one
//!    into the current spectrogram line ([`acquisition`], [`spectrogram`]);
//! 2. fold the line into the preparing model-input region ([`window`]);
//! 3. start or advance the compute engine run ([`scheduler`]);
//! 4. classify a finished run and drive the outputs ([`classify`],
//!    [`actuation`]);
//! 5. wait out the rest of the acquisition and measure the slack.
//!
//! [`SpeechPipeline`] owns all of it and is driven by [`run_firmware`].

pub mod acquisition;
pub mod actuation;
pub mod classify;
mod controller;
pub mod scheduler;
pub mod spectrogram;
pub mod window;

pub use acquisition::AcquisitionPipeline;
pub use actuation::{CommandAction, CommandState, CommandTable};
pub use classify::{argmax, ClassificationDispatcher, ClassificationResult};
pub use controller::{run_firmware, IterationReport, RunSummary, SpeechPipeline};
pub use scheduler::{InferenceScheduler, ProbeLayout, SchedulerState, SchedulerStep, StartedRun};
pub use spectrogram::SpectrogramRing;
pub use window::{RegionRoles, WindowBuilder};
