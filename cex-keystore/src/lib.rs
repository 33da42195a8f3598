//! `cex-keystore`: the on-disk key-package container (spec §4.8, §6.4, C8)
//! plus its audit log and adaptive threat layer.
//!
//! Grounded throughout on `citadel-keystore` — `error.rs`'s typed-wrapper
//! taxonomy, `audit.rs`'s sink trait and integrity-chain sink, and
//! `threat.rs`'s `ThreatAssessor`/`PolicyAdapter` — generalized from a
//! one-key-per-file, linear-lifecycle model to one file holding `N`
//! independent subkeys, each with its own policy bitfield and bitfield
//! state.

pub mod audit;
pub mod error;
pub mod package;
pub mod storage;
pub mod threat;
pub mod types;

pub use audit::{AuditAction, AuditEvent, AuditSinkSync, FileAuditSink, InMemoryAuditSink, IntegrityChainSink, TracingAuditSink};
pub use error::{CreateError, KeystoreError, ReadError};
pub use package::{KeyPackage, PresentedAuthority, SubkeyRead, VolumeKeyPackage};
pub use threat::{PolicyAdapter, ThreatAssessor, ThreatConfig, ThreatEvent, ThreatEventKind, ThreatLevel};
pub use types::{KeyAuthority, PackageId, SubkeyId, SubkeyPolicy, SubkeyState, AUTHORITY_WIRE_LEN};
