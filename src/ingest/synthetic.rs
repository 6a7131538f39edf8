//! Synthetic capture device.
//!
//! `stub://<name>` ids produce a moving gradient at the configured size. Query
//! parameters script failure modes for demos and tests:
//! - `frames=N`: the read after frame N fails (end of stream)
//! - `fail=open`: opening fails (device absent)
//! - `fail=read`: opens, but every read fails (device busy / no signal)

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CaptureDevice, CaptureSettings, DeviceId, SourceStats};
use crate::frame::Frame;

pub struct SyntheticDevice {
    name: String,
    settings: CaptureSettings,
    frame_limit: Option<u64>,
    fail_reads: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticDevice {
    pub fn open(id: &DeviceId, settings: CaptureSettings) -> Result<Self> {
        let raw = match id {
            DeviceId::Index(index) => format!("stub://index-{}", index),
            DeviceId::Name(name) => name.clone(),
        };
        let url = Url::parse(&raw).with_context(|| format!("parse synthetic device id {}", raw))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic devices use stub:// ids, got {}", raw));
        }

        let mut frame_limit = None;
        let mut fail_reads = false;
        for (key, value) in url.query_pairs() {
            match (key.as_ref(), value.as_ref()) {
                ("frames", count) => {
                    frame_limit = Some(
                        count
                            .parse()
                            .with_context(|| format!("invalid frames= in {}", raw))?,
                    )
                }
                ("fail", "open") => return Err(anyhow!("synthetic device {} is offline", raw)),
                ("fail", "read") => fail_reads = true,
                (other, _) => log::warn!("SyntheticDevice: ignoring parameter '{}'", other),
            }
        }

        log::info!(
            "SyntheticDevice: opened {} ({}x{})",
            raw,
            settings.width,
            settings.height
        );
        Ok(Self {
            name: raw,
            settings,
            frame_limit,
            fail_reads,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.settings.width * self.settings.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.fail_reads {
            return Err(anyhow!("{}: no signal", self.name));
        }
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!("{}: end of stream after {} frames", self.name, limit));
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            self.frame_count,
        )
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.name.clone(),
        }
    }
}
