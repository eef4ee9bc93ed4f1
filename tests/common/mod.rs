//! Shared helpers for building a minimal loopback protocol server in tests.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Install a `tracing` subscriber once so `cargo test -- --nocapture` shows
/// the engine's internal diagnostics. Safe to call from every test.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn socket_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn connected_frame(version: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1034u32.to_ne_bytes());
    body.extend_from_slice(&1u32.to_ne_bytes());
    body.extend_from_slice(&version.to_ne_bytes());
    frame(&body)
}

pub fn response_frame(id: u32, status: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_ne_bytes());
    body.extend_from_slice(&id.to_ne_bytes());
    body.extend_from_slice(&(status as u32).to_ne_bytes());
    body.extend_from_slice(payload);
    frame(&body)
}

/// A single outbound request frame as read off the wire: opcode, id, and
/// payload (header already stripped).
pub struct ReceivedRequest {
    pub code: u32,
    pub id: u32,
    pub payload: Vec<u8>,
}

pub fn read_request(stream: &mut StdUnixStream) -> ReceivedRequest {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut rest = vec![0u8; len];
    stream.read_exact(&mut rest).unwrap();
    let code = u32::from_ne_bytes(rest[0..4].try_into().unwrap());
    let id = u32::from_ne_bytes(rest[4..8].try_into().unwrap());
    ReceivedRequest { code, id, payload: rest[8..].to_vec() }
}

pub fn read_subscription_tag(stream: &mut StdUnixStream) -> [u8; 4] {
    let mut tag = [0u8; 4];
    stream.read_exact(&mut tag).unwrap();
    tag
}

pub fn send_frame(stream: &mut StdUnixStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
}

/// Poll `channel` repeatedly until `done()` returns true or `overall_timeout`
/// elapses, returning whether it converged.
pub fn poll_until(channel: &rilio::Channel, overall_timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < overall_timeout {
        if done() {
            return true;
        }
        channel.poll(Some(Duration::from_millis(20))).unwrap();
    }
    done()
}
