//! Inbound framing state machine: a 4-byte big-endian length prefix
//! followed by that many bytes of body.

use std::io::{self, ErrorKind, Read};

use mio::net::UnixStream;

use crate::codec::MAX_BODY_LEN;

enum Stage {
    Len { buf: [u8; 4], have: usize },
    Body { len: usize, buf: Vec<u8>, have: usize },
}

pub(super) struct RxState {
    stage: Stage,
}

/// What happened on one attempt to read more of the stream.
pub(super) enum RxOutcome {
    /// A complete body was assembled.
    Frame(Vec<u8>),
    /// The socket would block; nothing more to read right now.
    WouldBlock,
}

/// Distinguishes a genuine transport error from the peer closing the
/// connection and from a declared length over the protocol's limit.
pub(super) enum RxError {
    Io(io::Error),
    Eof,
    TooLarge(usize),
}

impl From<io::Error> for RxError {
    fn from(err: io::Error) -> Self {
        RxError::Io(err)
    }
}

impl RxState {
    pub fn new() -> Self {
        RxState { stage: Stage::Len { buf: [0; 4], have: 0 } }
    }

    /// Read as much as is currently available without blocking. May
    /// internally loop over the two sub-stages but returns as soon as
    /// either a full frame is ready or the socket has no more to give.
    pub fn read_frame(&mut self, stream: &mut UnixStream) -> Result<RxOutcome, RxError> {
        loop {
            match &mut self.stage {
                Stage::Len { buf, have } => {
                    match stream.read(&mut buf[*have..]) {
                        Ok(0) => return Err(RxError::Eof),
                        Ok(n) => *have += n,
                        Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                            return Ok(RxOutcome::WouldBlock)
                        }
                        Err(err) => return Err(err.into()),
                    }
                    if *have < 4 {
                        return Ok(RxOutcome::WouldBlock);
                    }
                    let len = u32::from_be_bytes(*buf) as usize;
                    if len > MAX_BODY_LEN {
                        return Err(RxError::TooLarge(len));
                    }
                    self.stage = Stage::Body { len, buf: vec![0u8; len], have: 0 };
                }
                Stage::Body { len, buf, have } => {
                    if *len == 0 {
                        let body = Vec::new();
                        self.stage = Stage::Len { buf: [0; 4], have: 0 };
                        return Ok(RxOutcome::Frame(body));
                    }
                    match stream.read(&mut buf[*have..]) {
                        Ok(0) => return Err(RxError::Eof),
                        Ok(n) => *have += n,
                        Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                            return Ok(RxOutcome::WouldBlock)
                        }
                        Err(err) => return Err(err.into()),
                    }
                    if *have < *len {
                        return Ok(RxOutcome::WouldBlock);
                    }
                    let body = std::mem::take(buf);
                    self.stage = Stage::Len { buf: [0; 4], have: 0 };
                    return Ok(RxOutcome::Frame(body));
                }
            }
        }
    }
}
