//! Error taxonomy shared by the whole CEX workspace (spec §7).

use core::fmt;

/// Top-level error kind for primitive and keyed-material operations.
///
/// Mirrors the taxonomy in spec §7: callers downstream (cex-cipher,
/// cex-protocol, cex-keystore) wrap this in their own error enums rather
/// than inventing a parallel hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An engine method was called before `init`.
    NotInitialized,
    /// Length/alignment/bounds violation on API inputs.
    InvalidParameter(&'static str),
    /// Unknown primitive kind or unsupported mode combination.
    Unsupported(&'static str),
    /// MAC mismatch, decrypt failure, or policy mismatch.
    AuthenticationFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "engine used before init"),
            Self::InvalidParameter(why) => write!(f, "invalid parameter: {why}"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
        }
    }
}

impl std::error::Error for Error {}
