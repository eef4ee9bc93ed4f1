use std::io;

use thiserror::Error;

/// Errors surfaced by a [`crate::Channel`], either returned directly from a
/// fallible call or carried by an `ERROR` signal.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("malformed packet: {0}")]
    InvalidData(&'static str),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
