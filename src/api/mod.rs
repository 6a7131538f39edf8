//! Local HTTP surface: health, status, the live SSE stream and a viewer page.
//!
//! One accept thread hands every connection to a short-lived handler thread,
//! so an idle client cannot hold up other callers. A `/stream` handler keeps
//! its thread as the viewer's writer: it owns a broadcaster subscription and
//! a socket write timeout, so a stalled viewer only ever fills its own queue
//! and is dropped once a write blocks past the timeout.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::broadcast::{Broadcaster, Subscription};
use crate::pipeline::{PipelineState, PipelineStatus};

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_POLL: Duration = Duration::from_millis(500);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const VIEWER_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>vigil</title></head>
<body style="background:#111;color:#eee;font-family:sans-serif">
<h3>vigil live view</h3>
<img id="frame" style="max-width:100%" alt="waiting for frames">
<p>persons: <span id="count">0</span> &middot; <span id="ts"></span></p>
<script>
const source = new EventSource("/stream");
source.onmessage = (event) => {
  const msg = JSON.parse(event.data);
  if (msg.type !== "video") return;
  document.getElementById("frame").src = "data:image/jpeg;base64," + msg.frame;
  document.getElementById("count").textContent = msg.person_count;
  document.getElementById("ts").textContent = msg.timestamp;
};
</script>
</body>
</html>
"#;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// A `/stream` write blocked longer than this drops the viewer.
    pub stream_write_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
            stream_write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    stream_writers: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Number of `/stream` writer threads still running.
    pub fn stream_writers(&self) -> usize {
        self.stream_writers.load(Ordering::SeqCst)
    }

    /// Stops accepting and joins the accept thread. Stream writers notice the
    /// flag within one poll interval, or after the write timeout when the
    /// viewer has stopped reading, and close their connections.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Shared state the endpoints read from.
#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Arc<Broadcaster>,
    pub pipeline: Arc<PipelineStatus>,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    message: String,
    person_count: usize,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    state: PipelineState,
    device: Option<String>,
    frames_processed: u64,
    alerts_raised: u64,
    subscribers: usize,
    last_frame: Option<String>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let stream_writers = Arc::new(AtomicUsize::new(0));
        let server = ServerContext {
            state: self.state,
            shutdown: shutdown.clone(),
            stream_writers: stream_writers.clone(),
            stream_write_timeout: self.cfg.stream_write_timeout,
        };
        let join = std::thread::Builder::new()
            .name("vigil-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, server) {
                    log::error!("api server stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            stream_writers,
            join: Some(join),
        })
    }
}

/// Everything a connection handler needs, cloned per connection.
#[derive(Clone)]
struct ServerContext {
    state: ApiState,
    shutdown: Arc<AtomicBool>,
    stream_writers: Arc<AtomicUsize>,
    stream_write_timeout: Duration,
}

fn run_api(listener: TcpListener, server: ServerContext) -> Result<()> {
    loop {
        if server.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let server = server.clone();
                let spawned = std::thread::Builder::new()
                    .name("vigil-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &server) {
                            log::warn!("api request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("api connection from {} dropped: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ServerContext) -> Result<()> {
    let state = &server.state;
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => {
            let body = serde_json::to_vec(&health(state))?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/status" => {
            let body = serde_json::to_vec(&status(state))?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/" | "/index.html" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            VIEWER_HTML.as_bytes(),
        ),
        "/stream" => serve_stream(stream, peer, server),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn health(state: &ApiState) -> HealthBody {
    let person_count = state
        .broadcaster
        .latest_summary()
        .map(|summary| summary.person_count)
        .unwrap_or(0);
    let (status, message) = match state.pipeline.state() {
        PipelineState::Running => (
            "ok",
            format!(
                "capturing from {}",
                state.pipeline.device().unwrap_or_else(|| "unknown".to_string())
            ),
        ),
        PipelineState::Starting => ("starting", "selecting capture device".to_string()),
        PipelineState::Stopping | PipelineState::Stopped => ("stopped", "pipeline stopped".to_string()),
        PipelineState::Failed => ("error", "no capture device available".to_string()),
    };
    HealthBody {
        status,
        message,
        person_count,
    }
}

fn status(state: &ApiState) -> StatusBody {
    StatusBody {
        state: state.pipeline.state(),
        device: state.pipeline.device(),
        frames_processed: state.pipeline.frames_processed(),
        alerts_raised: state.pipeline.alerts_raised(),
        subscribers: state.broadcaster.subscriber_count(),
        last_frame: state
            .broadcaster
            .latest_summary()
            .map(|summary| summary.timestamp_string()),
    }
}

/// Counts a running stream writer for as long as it is alive.
struct WriterSlot(Arc<AtomicUsize>);

impl WriterSlot {
    fn claim(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for WriterSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs on the connection's handler thread until the viewer goes away.
fn serve_stream(mut stream: TcpStream, peer: SocketAddr, server: &ServerContext) -> Result<()> {
    let _slot = WriterSlot::claim(&server.stream_writers);
    stream.set_write_timeout(Some(server.stream_write_timeout))?;
    stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-store\r\nConnection: keep-alive\r\n\r\n",
    )?;
    stream.flush()?;

    let broadcaster = &server.state.broadcaster;
    let subscription = broadcaster.subscribe();
    let id = subscription.id();
    if let Err(err) = pump_stream(&mut stream, &subscription, &server.shutdown) {
        log::debug!("viewer {} ({}) stream ended: {}", id, peer, err);
    }
    broadcaster.unsubscribe(id);
    Ok(())
}

/// Forwards broadcast messages as SSE `data:` events until the viewer goes
/// away, the broadcaster drops the subscription, or the server shuts down.
fn pump_stream(
    stream: &mut TcpStream,
    subscription: &Subscription,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut last_write = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        match subscription.recv_timeout(STREAM_POLL) {
            Ok(payload) => {
                write!(stream, "data: {}\n\n", payload)?;
                stream.flush()?;
                last_write = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_write.elapsed() >= KEEPALIVE_INTERVAL {
                    stream.write_all(b": keep-alive\n\n")?;
                    stream.flush()?;
                    last_write = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("dropped by broadcaster"));
            }
        }
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream.set_read_timeout(None)?;
    parse_request(&String::from_utf8_lossy(&data))
}

fn parse_request(text: &str) -> Result<HttpRequest> {
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_strips_query() {
        let request =
            parse_request("GET /stream?since=3 HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")
                .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/stream");
        assert!(parse_request("").is_err());
    }

    #[test]
    fn health_reflects_pipeline_state() {
        let state = ApiState {
            broadcaster: Arc::new(Broadcaster::new(1)),
            pipeline: Arc::new(PipelineStatus::default()),
        };
        let body = health(&state);
        assert_eq!(body.status, "starting");
        assert_eq!(body.person_count, 0);
    }
}
