//! Error type for the block-mode engine and stream processor (spec §7).

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A primitive-layer failure (wraps `cex_primitives::Error`).
    Primitive(cex_primitives::Error),
    /// A short read occurred before the declared input length was reached.
    UnexpectedEof,
    /// Underlying stream/socket failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(e) => write!(f, "{e}"),
            Self::UnexpectedEof => write!(f, "unexpected eof before declared length"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<cex_primitives::Error> for Error {
    fn from(e: cex_primitives::Error) -> Self {
        Self::Primitive(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
