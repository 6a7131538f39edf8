//! HTTP camera device.
//!
//! Connects to an `http(s)://` camera URL. A `multipart/*` response is read as
//! an MJPEG stream (JPEGs are cut out of the byte stream by SOI/EOI markers);
//! anything else is treated as a snapshot endpoint that is fetched once per
//! frame.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::normalize::decode_jpeg;
use super::{CaptureDevice, CaptureSettings, DeviceId, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegDevice {
    url: String,
    agent: ureq::Agent,
    stream: HttpStream,
    settings: CaptureSettings,
    connected_at: Instant,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

impl MjpegDevice {
    pub fn open(id: &DeviceId, settings: CaptureSettings) -> Result<Self> {
        let DeviceId::Name(url) = id else {
            return Err(anyhow!("http cameras are addressed by URL, got index {}", id));
        };
        let parsed = url::Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(CONNECT_TIMEOUT)
            .build();
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("connect to camera {}", url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        };
        log::info!("MjpegDevice: connected to {} ({})", url, content_type);

        Ok(Self {
            url: url.clone(),
            agent,
            stream,
            settings,
            connected_at: Instant::now(),
            last_frame_at: None,
            frame_count: 0,
        })
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
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

impl CaptureDevice for MjpegDevice {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let jpeg = match &mut self.stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
            HttpStream::Snapshot => self.fetch_snapshot()?,
        };
        let (pixels, width, height) = decode_jpeg(&jpeg)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height, self.frame_count)
    }

    fn is_healthy(&self) -> bool {
        match self.last_frame_at {
            Some(last) => last.elapsed() <= self.health_grace(),
            None => self.connected_at.elapsed() <= CONNECT_TIMEOUT,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Byte range of the first complete JPEG (SOI .. EOI inclusive) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
