//! Shared helpers for reporter-server integration tests.

#![allow(dead_code)]

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use reporter_capture::{CaptureBackend, CaptureError, CaptureFilter, FrameSource, InterfaceInfo};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub const STATS_PATH: &str = "/cgi-bin/stats.cgi";
pub const CHALLENGE: &str =
    r#"Digest realm="antMiner Configuration", nonce="5f2b8c1d9e0a", qop="auth""#;

/// Builds an Ethernet II / IPv4 / UDP frame from `src` to the LAN broadcast
/// address on `dport`.
pub fn udp_frame(src: Ipv4Addr, dport: u16) -> Vec<u8> {
    let o = src.octets();
    let mut f = vec![0xff; 6];
    f.extend_from_slice(&[0x02, 0x00, o[0], o[1], o[2], o[3]]);
    f.extend_from_slice(&[0x08, 0x00]);
    f.extend_from_slice(&[0x45, 0, 0, 28, 0, 0, 0x40, 0, 64, 17, 0, 0]);
    f.extend_from_slice(&o);
    f.extend_from_slice(&[255, 255, 255, 255]);
    f.extend_from_slice(&14235u16.to_be_bytes());
    f.extend_from_slice(&dport.to_be_bytes());
    f.extend_from_slice(&[0, 8, 0, 0]);
    f
}

/// One loopback and one private LAN interface.
pub fn lan_interfaces() -> Vec<InterfaceInfo> {
    vec![
        InterfaceInfo::new("lo", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
        InterfaceInfo::new("eth0", vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))]),
    ]
}

/// Frame source fed from the test through a channel.
pub struct ChannelSource(mpsc::Receiver<Vec<u8>>);

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        Ok(self.0.recv().ok())
    }
}

/// Backend that hands out a single channel-fed source.
pub struct ChannelBackend {
    interfaces: Vec<InterfaceInfo>,
    source: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl CaptureBackend for ChannelBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        Ok(self.interfaces.clone())
    }

    fn open(
        &self,
        interface: &str,
        _filter: &CaptureFilter,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let rx = self
            .source
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CaptureError::Open {
                interface: interface.to_string(),
                reason: "device already in use".to_string(),
            })?;
        Ok(Box::new(ChannelSource(rx)))
    }
}

/// Returns a backend and the sender that feeds its frames.
pub fn channel_backend(interfaces: Vec<InterfaceInfo>) -> (mpsc::Sender<Vec<u8>>, ChannelBackend) {
    let (tx, rx) = mpsc::channel();
    (
        tx,
        ChannelBackend {
            interfaces,
            source: Mutex::new(Some(rx)),
        },
    )
}

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn device_response(headers: &HeaderMap, status: StatusCode, body: &'static str) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|auth| {
            auth.starts_with("Digest ")
                && auth.contains(r#"username="root""#)
                && auth.contains(&format!(r#"uri="{}""#, STATS_PATH))
        });

    if authorized {
        (status, body).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, CHALLENGE)],
            "unauthorized",
        )
            .into_response()
    }
}

/// Starts a fake miner whose digest-protected stats endpoint answers with
/// `status` and `body`. Returns the HTTP port.
pub async fn spawn_device(status: StatusCode, body: &'static str) -> u16 {
    let app = Router::new().route(
        STATS_PATH,
        get(move |headers: HeaderMap| async move { device_response(&headers, status, body) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Starts a fake miner that holds each authenticated request for `delay`
/// before answering with `body`.
///
/// The returned [`Notify`] fires when an authenticated request arrives.
pub async fn spawn_slow_device(delay: Duration, body: &'static str) -> (u16, Arc<Notify>) {
    let arrived = Arc::new(Notify::new());
    let signal = Arc::clone(&arrived);
    let app = Router::new().route(
        STATS_PATH,
        get(move |headers: HeaderMap| {
            let signal = Arc::clone(&signal);
            async move {
                let response = device_response(&headers, StatusCode::OK, body);
                if response.status() == StatusCode::OK {
                    signal.notify_one();
                    tokio::time::sleep(delay).await;
                }
                response
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, arrived)
}

/// Starts a server that always answers 401 without a challenge.
pub async fn spawn_unchallenging_device() -> u16 {
    let app = Router::new().route(STATS_PATH, get(|| async { StatusCode::UNAUTHORIZED }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Incremental reader of `data:` payloads from an SSE response.
pub struct SseReader {
    response: reqwest::Response,
    buffer: String,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Returns the JSON payload of the next event, skipping keep-alive
    /// comments.
    pub async fn next_json(&mut self) -> serde_json::Value {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let data: String = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if !data.is_empty() {
                    return serde_json::from_str(&data).expect("event data should be JSON");
                }
                continue;
            }

            let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for event")
                .expect("failed to read chunk")
                .expect("stream closed");
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}
