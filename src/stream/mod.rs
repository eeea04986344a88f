//! HTTP debug surface.
//!
//! A hand-rolled server on a plain [`TcpListener`] with three routes: `/`
//! serves a monitor page, `/stream` pushes `multipart/x-mixed-replace` JPEG
//! parts, `/status` returns counters and tuning as JSON. Requests this small
//! do not need a framework; each client costs one task and one buffered
//! request read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::camera::SensorSettings;
use crate::config::StreamConfig;
use crate::detect::DetectTuning;
use crate::scanner::ScanSnapshot;
use crate::stats::{StatsHandle, StatsSnapshot};

pub mod annotate;

pub use annotate::Rotation;

const INDEX_HTML: &str = "<!DOCTYPE html>\n<html>\n<head>\n<title>miniola</title>\n<style>\nbody { background: #000; color: #0f0; font-family: monospace; text-align: center; }\nimg { margin-top: 1em; border: 1px solid #0f0; max-width: 95vw; }\n</style>\n</head>\n<body>\n<h1>MINIOLA</h1>\n<img src=\"/stream\" alt=\"live view\">\n<p>counters at <a href=\"/status\">/status</a></p>\n</body>\n</html>\n";

const STREAM_HEADER: &str = "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";

/// Serves the debug view and status for one scan process.
pub struct StreamServer {
    listener: TcpListener,
    snapshot: watch::Receiver<Option<ScanSnapshot>>,
    config: Arc<StreamConfig>,
    stats: StatsHandle,
    started: Instant,
}

impl StreamServer {
    /// Binds the listen address; the server does nothing until [`run`] is
    /// awaited.
    ///
    /// [`run`]: StreamServer::run
    pub async fn bind(
        config: StreamConfig,
        snapshot: watch::Receiver<Option<ScanSnapshot>>,
        stats: StatsHandle,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        info!(addr = %listener.local_addr()?, "http server listening");
        Ok(Self {
            listener,
            snapshot,
            config: Arc::new(config),
            stats,
            started: Instant::now(),
        })
    }

    /// Actual bound address; differs from the configured one for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until the task is aborted.
    pub async fn run(self) {
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "accept failed");
                    continue;
                }
            };
            debug!(%peer, "client connected");
            let snapshot = self.snapshot.clone();
            let config = Arc::clone(&self.config);
            let stats = self.stats.clone();
            let started = self.started;
            tokio::spawn(async move {
                if let Err(error) = handle_client(socket, peer, snapshot, config, stats, started).await
                {
                    debug!(%peer, %error, "client closed with error");
                }
            });
        }
    }
}

/// Extracts the request target from the first line of an HTTP request.
fn request_path(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parts.next()
}

async fn handle_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    snapshot: watch::Receiver<Option<ScanSnapshot>>,
    config: Arc<StreamConfig>,
    stats: StatsHandle,
    started: Instant,
) -> std::io::Result<()> {
    let mut buf = [0u8; 2048];
    let n = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    match request_path(&request) {
        Some("/") => {
            respond(
                &mut socket,
                "200 OK",
                "text/html; charset=utf-8",
                INDEX_HTML.as_bytes(),
            )
            .await
        }
        Some("/stream") => {
            stats.client_connected();
            info!(%peer, "stream client connected");
            let result = serve_stream(&mut socket, snapshot, &config).await;
            stats.client_disconnected();
            info!(%peer, "stream client disconnected");
            result
        }
        Some("/status") => {
            let body = status_body(&snapshot, &stats, started);
            respond(&mut socket, "200 OK", "application/json", &body).await
        }
        _ => {
            respond(&mut socket, "404 Not Found", "text/plain", b"not found\n").await
        }
    }
}

async fn respond(
    socket: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.flush().await
}

/// Sends annotated JPEG parts until the client or the scan loop goes away.
///
/// Each part waits for a fresh snapshot and for the pacing interval, so a
/// slow consumer skips captures instead of queueing them.
async fn serve_stream(
    socket: &mut TcpStream,
    mut rx: watch::Receiver<Option<ScanSnapshot>>,
    config: &StreamConfig,
) -> std::io::Result<()> {
    socket.write_all(STREAM_HEADER.as_bytes()).await?;
    let interval = Duration::from_millis(config.min_interval_ms);
    let mut next_part = tokio::time::Instant::now();

    loop {
        let snap = rx.borrow_and_update().clone();
        if let Some(snap) = snap {
            tokio::time::sleep_until(next_part).await;
            next_part = tokio::time::Instant::now() + interval;

            let rotation = config.rotation;
            let show_binary = config.show_binary;
            let quality = config.quality;
            let encoded = tokio::task::spawn_blocking(move || {
                annotate::encode_view(&snap, rotation, show_binary, quality)
            })
            .await;
            match encoded {
                Ok(Ok(bytes)) => {
                    let head = format!(
                        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        bytes.len()
                    );
                    socket.write_all(head.as_bytes()).await?;
                    socket.write_all(&bytes).await?;
                    socket.write_all(b"\r\n").await?;
                }
                Ok(Err(error)) => warn!(%error, "view encode failed"),
                Err(error) => warn!(%error, "encode task failed"),
            }
        }
        if rx.changed().await.is_err() {
            debug!("scan loop gone, ending stream");
            return Ok(());
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    perforations: u64,
    film_frames: u64,
    recording: bool,
    session: Option<u32>,
    tuning: Option<DetectTuning>,
    /// Cutoff the last capture was binarized with, when the mode has one.
    threshold_level: Option<u8>,
    settings: Option<SensorSettings>,
    stats: StatsSnapshot,
    uptime_s: u64,
}

fn status_body(
    rx: &watch::Receiver<Option<ScanSnapshot>>,
    stats: &StatsHandle,
    started: Instant,
) -> Vec<u8> {
    let snap = rx.borrow().clone();
    let payload = StatusPayload {
        perforations: snap.as_ref().map(|s| s.report.perforations).unwrap_or(0),
        film_frames: snap.as_ref().map(|s| s.report.film_frames).unwrap_or(0),
        recording: snap.as_ref().map(|s| s.recording).unwrap_or(false),
        session: snap.as_ref().and_then(|s| s.session),
        tuning: snap.as_ref().map(|s| s.report.tuning),
        threshold_level: snap.as_ref().and_then(|s| s.report.threshold_level),
        settings: snap.as_ref().map(|s| s.settings),
        stats: stats.snapshot(),
        uptime_s: started.elapsed().as_secs(),
    };
    // A plain struct of numbers cannot fail to serialize.
    serde_json::to_vec_pretty(&payload).unwrap_or_else(|_| b"{}".to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_parses_get_lines() {
        assert_eq!(request_path("GET / HTTP/1.1\r\nHost: x\r\n\r\n"), Some("/"));
        assert_eq!(
            request_path("GET /stream HTTP/1.1\r\n\r\n"),
            Some("/stream")
        );
        assert_eq!(request_path("POST /stream HTTP/1.1\r\n\r\n"), None);
        assert_eq!(request_path(""), None);
    }

    #[test]
    fn status_body_is_valid_json_before_first_frame() {
        let (_tx, rx) = watch::channel(None);
        let stats = crate::stats::ScanStats::new_handle();
        let body = status_body(&rx, &stats, Instant::now());
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["perforations"], 0);
        assert_eq!(value["recording"], false);
        assert!(value["tuning"].is_null());
    }
}
