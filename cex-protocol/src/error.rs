//! Error taxonomy for the packet codec, DTM-KEX state machine, and session
//! transport (spec §7). Wraps `cex_primitives::Error`/`cex_cipher::Error`
//! rather than inventing a parallel leaf-error hierarchy for the same
//! underlying failures.

use core::fmt;

#[derive(Debug)]
pub enum Error {
    /// A primitive or block-mode failure (MAC mismatch, decrypt failure,
    /// bad key length, ...).
    Cipher(cex_cipher::Error),
    /// Malformed frame, sequence violation, or bad magic.
    Protocol(&'static str),
    /// Peer went silent past the configured timeout.
    ExchangeTimeout,
    /// Peer sent `Service::Refusal`.
    PeerRefused,
    /// Receive or reassembly exceeded `MAX_ALLOCATION`.
    PayloadTooLarge,
    /// Underlying stream/socket failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cipher(e) => write!(f, "{e}"),
            Self::Protocol(why) => write!(f, "protocol error: {why}"),
            Self::ExchangeTimeout => write!(f, "exchange timed out"),
            Self::PeerRefused => write!(f, "peer refused the exchange"),
            Self::PayloadTooLarge => write!(f, "payload exceeds configured allocation limit"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<cex_cipher::Error> for Error {
    fn from(e: cex_cipher::Error) -> Self {
        Self::Cipher(e)
    }
}

impl From<cex_primitives::Error> for Error {
    fn from(e: cex_primitives::Error) -> Self {
        Self::Cipher(cex_cipher::Error::Primitive(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
