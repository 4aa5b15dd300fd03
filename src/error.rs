use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors raised while encoding or decoding a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid packet length")]
    InvalidPacketLength,
    #[error("invalid token length")]
    InvalidTokenLength,
    #[error("invalid option delta")]
    InvalidOptionDelta,
    #[error("invalid option length")]
    InvalidOptionLength,
}

/// Error for an unrecognized Content-Format value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown content format")]
pub struct InvalidContentFormat;

/// Error for an Observe option value that is neither register nor deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid observe flag")]
pub struct InvalidObserve;

/// Errors raised by the discovery, client and server endpoints.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Message(#[from] MessageError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse address {0:?}")]
    InvalidAddress(String),
    #[error("timed out")]
    Timeout,
    #[error("request was reset by {0}")]
    Reset(SocketAddr),
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
