use anyhow::anyhow;

use super::{BackendKind, CaptureDevice, DeviceCandidate, DeviceId, DeviceOpener};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Ordered fallback search over candidate devices.
///
/// Each attempt opens a device and reads one frame; the first device that
/// opens AND yields a non-empty frame wins. A device that opens but fails the
/// read is dropped (closing it) before the next attempt. The search runs once;
/// retrying the whole search is the caller's decision.
#[derive(Clone, Debug)]
pub struct DeviceSelector {
    candidates: Vec<DeviceCandidate>,
    fallback_backends: Vec<BackendKind>,
}

/// The device that passed selection, with the frame that proved it readable.
pub struct SelectedDevice {
    pub device: Box<dyn CaptureDevice>,
    /// Candidate as resolved (backend always set).
    pub candidate: DeviceCandidate,
    pub probe_frame: Frame,
}

impl DeviceSelector {
    pub fn new(candidates: Vec<DeviceCandidate>) -> Self {
        Self {
            candidates,
            fallback_backends: Vec::new(),
        }
    }

    /// Backends to retry a hint-less candidate with after its inferred backend
    /// fails (e.g. `v4l2` then `mjpeg` for the same id).
    pub fn with_fallback_backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.fallback_backends = backends;
        self
    }

    /// Every (id, backend) pair in the order it will be tried.
    pub fn attempt_order(&self) -> Vec<(DeviceId, BackendKind)> {
        let mut order = Vec::new();
        for candidate in &self.candidates {
            match candidate.backend {
                Some(backend) => order.push((candidate.id.clone(), backend)),
                None => {
                    let inferred = BackendKind::infer(&candidate.id);
                    order.push((candidate.id.clone(), inferred));
                    for backend in &self.fallback_backends {
                        if *backend != inferred {
                            order.push((candidate.id.clone(), *backend));
                        }
                    }
                }
            }
        }
        order
    }

    pub fn select(&self, opener: &dyn DeviceOpener) -> Result<SelectedDevice, PipelineError> {
        let mut attempts = Vec::new();
        for (id, backend) in self.attempt_order() {
            log::info!("trying capture device {} ({})", id, backend);
            let mut device = match opener.open(&id, backend) {
                Ok(device) => device,
                Err(err) => {
                    log::warn!("device {} ({}) failed to open: {:#}", id, backend, err);
                    attempts.push(format!("{} ({}): open failed: {}", id, backend, err));
                    continue;
                }
            };

            let probe = device.read_frame().and_then(|frame| {
                if frame.is_empty() {
                    Err(anyhow!("device returned an empty frame"))
                } else {
                    Ok(frame)
                }
            });
            match probe {
                Ok(probe_frame) => {
                    log::info!(
                        "using capture device {} ({}) at {}x{}",
                        id,
                        backend,
                        probe_frame.width,
                        probe_frame.height
                    );
                    return Ok(SelectedDevice {
                        device,
                        candidate: DeviceCandidate::new(id).with_backend(backend),
                        probe_frame,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "device {} ({}) opened but could not be read: {:#}",
                        id,
                        backend,
                        err
                    );
                    attempts.push(format!("{} ({}): read failed: {}", id, backend, err));
                    drop(device);
                }
            }
        }
        Err(PipelineError::DeviceUnavailable { attempts })
    }
}
