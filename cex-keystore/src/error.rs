//! Error types for the key-package container (spec §7).
//!
//! Mirrors `citadel-keystore::error`'s shape — a top-level enum plus a
//! handful of typed newtype wrappers around it for individual operations —
//! generalized from per-key lifecycle errors to per-subkey container errors.

use std::fmt;

use crate::types::{PackageId, SubkeyId, SubkeyState};

#[derive(Debug)]
pub enum KeystoreError {
    /// No package at this path / with this id.
    PackageNotFound(PackageId),
    /// `read`/`read_at` addressed a subkey id/index the package doesn't have.
    SubkeyNotFound(SubkeyId),
    /// Subkey is `Used` or `Expired` (spec §4.8 `read`).
    SubkeyUnavailable { id: SubkeyId, state: SubkeyState },
    /// `Volatile` subkey's `option_flag` expiry has passed.
    SubkeyExpired(SubkeyId),
    /// `PackageAuth`/`DomainAuth` check failed (spec §4.8 policy checks).
    Unauthorized,
    /// Malformed on-disk layout (short read, bad subkey count, etc).
    Corrupt(&'static str),
    /// Underlying primitive/description failure.
    Primitive(cex_primitives::Error),
    /// Filesystem failure.
    Io(String),
}

impl fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageNotFound(id) => write!(f, "package not found: {id}"),
            Self::SubkeyNotFound(id) => write!(f, "subkey not found: {id}"),
            Self::SubkeyUnavailable { id, state } => {
                write!(f, "subkey {id} unavailable: {state:?}")
            }
            Self::SubkeyExpired(id) => write!(f, "subkey {id} expired"),
            Self::Unauthorized => write!(f, "unauthorized: authority mismatch"),
            Self::Corrupt(why) => write!(f, "corrupt key-package: {why}"),
            Self::Primitive(e) => write!(f, "primitive error: {e}"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for KeystoreError {}

impl From<cex_primitives::Error> for KeystoreError {
    fn from(e: cex_primitives::Error) -> Self {
        Self::Primitive(e)
    }
}

impl From<std::io::Error> for KeystoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Typed wrapper for `create` failures, in the teacher's
/// one-newtype-per-operation style.
#[derive(Debug)]
pub struct CreateError(pub KeystoreError);
impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for CreateError {}
impl From<KeystoreError> for CreateError {
    fn from(e: KeystoreError) -> Self {
        Self(e)
    }
}

#[derive(Debug)]
pub struct ReadError(pub KeystoreError);
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for ReadError {}
impl From<KeystoreError> for ReadError {
    fn from(e: KeystoreError) -> Self {
        Self(e)
    }
}
