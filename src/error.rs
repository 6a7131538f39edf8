//! Typed pipeline failures.
//!
//! Most of the crate returns `anyhow::Result`; the variants here are the cases
//! callers need to tell apart. Only `DeviceUnavailable` is fatal to a process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every candidate device failed to open or to produce a frame.
    #[error("no capture device available (tried: {})", attempts.join("; "))]
    DeviceUnavailable { attempts: Vec<String> },

    /// The active device stopped producing frames. Ends the running loop.
    #[error("frame read failed on {device}: {reason}")]
    FrameRead { device: String, reason: String },

    /// A single detection could not be classified (e.g. missing landmarks).
    #[error("detection #{index} skipped: {reason}")]
    ClassificationSkipped { index: usize, reason: String },
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::DeviceUnavailable { .. })
    }
}
