//! USB/V4L2 capture device.
//!
//! Numeric ids map to `/dev/video<N>`; string ids are used as the device path.
//! The device is asked for RGB24 at the configured size; whatever format it
//! settles on is normalized to RGB8 per frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureDevice, CaptureSettings, DeviceId, SourceStats};
use crate::frame::Frame;

pub struct V4l2Device {
    path: String,
    settings: CaptureSettings,
    state: V4l2State,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) fn device_path(id: &DeviceId) -> String {
    match id {
        DeviceId::Index(index) => format!("/dev/video{}", index),
        DeviceId::Name(name) => name.clone(),
    }
}

impl V4l2Device {
    pub fn open(id: &DeviceId, settings: CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = device_path(id);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = settings.width;
        requested.height = settings.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let negotiated = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} delivers unsupported pixel format {}",
                path,
                negotiated.fourcc
            )
        })?;

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: opened {} ({}x{} {:?})",
            path,
            negotiated.width,
            negotiated.height,
            format
        );
        Ok(Self {
            path,
            settings,
            state,
            format,
            active_width: negotiated.width,
            active_height: negotiated.height,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl CaptureDevice for V4l2Device {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let raw = self
            .state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context(format!("capture frame from {}", self.path))
            })?;
        // MJPG buffers are padded to the mapped size; the decoder stops at EOI.
        let pixels = normalize_to_rgb(&raw, self.active_width, self.active_height, self.format)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        )
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= self.health_grace(),
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }
}
