//! Local live API.
//!
//! A small HTTP/1.1 server for polling the controller's current state from
//! the ground station or a browser:
//!
//! - `GET /health`
//! - `GET /api/sensor/live` latest telemetry payload
//! - `GET /api/frame.jpg` latest composed frame
//! - `GET /api/detections` latest cached detections and their age
//!
//! Every endpoint only copies out of the shared stores; nothing here can
//! block the capture or controller loops.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::{DetectionSet, DetectionsCache};
use crate::frame::{EncodeFormat, FrameStore};
use crate::transport::LatestTelemetry;

const MAX_REQUEST_BYTES: usize = 8192;
pub const DEFAULT_LIVE_API_ADDR: &str = "0.0.0.0:5055";

#[derive(Clone, Debug)]
pub struct LiveApiConfig {
    pub addr: String,
    pub jpeg_quality: u8,
}

impl Default for LiveApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LIVE_API_ADDR.to_string(),
            jpeg_quality: 80,
        }
    }
}

/// Shared state the API reads from.
#[derive(Clone)]
pub struct LiveState {
    pub frames: Arc<FrameStore>,
    pub detections: Arc<DetectionsCache>,
    pub telemetry: Arc<LatestTelemetry>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("live api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct LiveApiServer {
    cfg: LiveApiConfig,
    state: LiveState,
}

impl LiveApiServer {
    pub fn new(cfg: LiveApiConfig, state: LiveState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("live api listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, &state, shutdown_thread) {
                log::error!("live api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &LiveApiConfig,
    state: &LiveState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, state) {
                    log::warn!("live api request failed: {}", err);
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

#[derive(Serialize)]
struct DetectionsBody<'a> {
    age_ms: u64,
    #[serde(flatten)]
    set: &'a DetectionSet,
}

fn handle_connection(mut stream: TcpStream, cfg: &LiveApiConfig, state: &LiveState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/api/sensor/live" => match state.telemetry.get() {
            Some(payload) => {
                let body = serde_json::to_vec(&payload)?;
                write_response(&mut stream, 200, "application/json", &body)
            }
            None => write_json_response(&mut stream, 503, r#"{"error":"no data"}"#),
        },
        "/api/frame.jpg" => {
            match state
                .frames
                .get_composed_encoded(EncodeFormat::Jpeg, cfg.jpeg_quality)
            {
                Ok(Some(jpeg)) => write_response(
                    &mut stream,
                    200,
                    EncodeFormat::Jpeg.content_type(),
                    &jpeg,
                ),
                Ok(None) => write_json_response(&mut stream, 503, r#"{"error":"no frame"}"#),
                Err(err) => {
                    log::warn!("live api: frame encode failed: {:#}", err);
                    write_json_response(&mut stream, 500, r#"{"error":"encode_failed"}"#)
                }
            }
        }
        "/api/detections" => match state.detections.latest() {
            Some(entry) => {
                let body = serde_json::to_vec(&DetectionsBody {
                    age_ms: entry.age().as_millis() as u64,
                    set: &entry.value,
                })?;
                write_response(&mut stream, 200, "application/json", &body)
            }
            None => write_json_response(&mut stream, 503, r#"{"error":"no detections"}"#),
        },
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
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
    let text = String::from_utf8_lossy(&data);
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
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
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
