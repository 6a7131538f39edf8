//! Vigil
//!
//! Camera alert pipeline: frames come in from a capture device, an external
//! detection model labels them, a classification policy decides whether the
//! frame is alert-worthy, and alerts are throttled and fanned out to
//! notification channels while every processed frame is pushed to live viewers.
//!
//! # Module Structure
//!
//! - `frame`: Immutable captured frames
//! - `ingest`: Capture devices and fallback device selection
//! - `detect`: Detection types and the external model boundary
//! - `classify`: Presence / posture policies producing verdicts
//! - `throttle`: Per-stream minimum-interval gates
//! - `notify`: Notification channels, fan-out and the dispatcher worker
//! - `broadcast`: Live telemetry subscriber set
//! - `render`: Frame overlay and JPEG encoding
//! - `screenshot`: Timestamped alert snapshots on disk
//! - `pipeline`: The driver state machine composing all of the above
//! - `api`: Loopback HTTP server (health, status, SSE stream)
//! - `config`: File + environment configuration

pub mod api;
pub mod broadcast;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod render;
pub mod screenshot;
pub mod throttle;

pub use broadcast::{Broadcaster, FrameSummary, PublishReport, Subscription, TelemetryMessage};
pub use classify::{
    policy_for_mode, ClassificationPolicy, ClassifierMode, FrameAssessment, PosturePolicy,
    PresencePolicy, Verdict, VerdictState,
};
pub use detect::{BoundingBox, Detection, DetectionModel, Keypoint};
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{
    BackendKind, CaptureDevice, CaptureSettings, DeviceCandidate, DeviceId, DeviceOpener,
    DeviceSelector, SelectedDevice, SystemDevices,
};
pub use notify::{
    AlertDispatcher, AlertEvent, AlertSink, ChannelError, ChannelKind, ChannelOutcome,
    ChannelResult, DispatchStats, FanOut, NotificationChannel, NotificationConfig, Notifier,
};
pub use pipeline::{
    ActivePipeline, FrameReport, Pipeline, PipelineComponents, PipelineHandle, PipelineSettings,
    PipelineState, PipelineStatus,
};
pub use screenshot::ScreenshotStore;
pub use throttle::AlertThrottle;
