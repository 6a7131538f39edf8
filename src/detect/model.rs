use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detection model boundary.
///
/// The model is an external collaborator: the pipeline hands it a frame and
/// gets back whatever it found. Latency is unspecified, so implementations are
/// only ever called from the driver thread and never while a shared lock is
/// held.
pub trait DetectionModel: Send {
    /// Model identifier for logs.
    fn name(&self) -> &'static str;

    /// Run inference on one frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
