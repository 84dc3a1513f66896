// Speech Robot Core - keyword spotting firmware
// Streaming spectrogram windows into a polled neural-network accelerator

// Module declarations
pub mod config;
pub mod error;
pub mod hal;
pub mod memory;
pub mod pipeline;
pub mod program;
pub mod telemetry;

// Re-exports for convenience
pub use config::AppConfig;
pub use error::{ErrorCode, PipelineError};
pub use pipeline::{run_firmware, SpeechPipeline};

use tracing::Level;

/// Install the fmt subscriber used by the binaries
///
/// Logs go to stderr so that stdout stays machine-readable. Safe to call
/// more than once; later calls keep the first subscriber.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(Level::DEBUG);
        init_logging(Level::INFO);
        tracing::info!("[Test] logging initialized");
    }
}
