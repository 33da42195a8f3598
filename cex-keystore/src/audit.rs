//! Audit logging: every key-package operation emits a structured event.
//!
//! Adapted from `citadel-keystore::audit` — the sink trait and the
//! tracing/in-memory/file/integrity-chain sinks carry over unchanged in
//! shape; only the event payload moves from per-key `KeyId`/`KeyType`/
//! `KeyState` to per-package `PackageId`/`SubkeyId`/`SubkeyState`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{PackageId, SubkeyId, SubkeyState};

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuditAction {
    PackageCreated { subkey_count: u32 },
    SubkeyRead,
    SubkeyOverwritten,
    SubkeyExpired,
    SubkeyUnauthorized,
    ThreatLevelChanged { verdict: String },
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub package_id: Option<PackageId>,
    pub subkey_id: Option<SubkeyId>,
    pub subkey_state: Option<SubkeyState>,
    pub action: AuditAction,
    pub actor: String,
    pub success: bool,
    pub detail: Option<String>,
    /// Monotonic sequence number (populated by [`IntegrityChainSink`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// SHA-256 hex digest of the previous event's JSON (populated by
    /// [`IntegrityChainSink`]). The first event in a chain has
    /// `prev_hash = SHA-256("cex-audit-genesis")`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

impl AuditEvent {
    pub fn subkey_event(
        package_id: PackageId,
        subkey_id: SubkeyId,
        state: SubkeyState,
        action: AuditAction,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            package_id: Some(package_id),
            subkey_id: Some(subkey_id),
            subkey_state: Some(state),
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    pub fn system_event(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            package_id: None,
            subkey_id: None,
            subkey_state: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go. Synchronous to avoid an `async_trait` dependency;
/// async sinks use interior mutability (channel, `try_lock`, etc).
pub trait AuditSinkSync: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSinkSync for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            timestamp = %event.timestamp,
            package_id = ?event.package_id,
            subkey_id = ?event.subkey_id,
            action = ?event.action,
            actor = %event.actor,
            success = event.success,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Collects events in memory (for tests).
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSinkSync for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.try_lock() {
            events.push(event);
        }
    }
}

/// Writes JSON events to a file (append-only).
pub struct FileAuditSink {
    path: std::path::PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSinkSync for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        use std::io::Write;
        match std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        tracing::warn!(error = %e, "audit file write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "audit event serialize failed"),
            },
            Err(e) => tracing::warn!(path = ?self.path, error = %e, "cannot open audit file"),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity chain sink (tamper-evident audit log)
// ---------------------------------------------------------------------------

/// Wraps any `AuditSinkSync` and adds a SHA-256 hash chain: each event gets
/// a monotonic `sequence` and a `prev_hash` over the previous event's JSON,
/// so a verifier can replay the log and detect insertion, deletion, or
/// modification of any entry. Genesis is `SHA-256("cex-audit-genesis")`.
pub struct IntegrityChainSink {
    inner: Arc<dyn AuditSinkSync>,
    state: std::sync::Mutex<ChainState>,
}

struct ChainState {
    sequence: u64,
    prev_hash: String,
}

impl IntegrityChainSink {
    pub fn new(inner: Arc<dyn AuditSinkSync>) -> Self {
        use sha2::{Digest, Sha256};
        let genesis = format!("{:x}", Sha256::digest(b"cex-audit-genesis"));
        Self {
            inner,
            state: std::sync::Mutex::new(ChainState { sequence: 0, prev_hash: genesis }),
        }
    }
}

impl AuditSinkSync for IntegrityChainSink {
    fn record(&self, mut event: AuditEvent) {
        use sha2::{Digest, Sha256};

        let mut state = self.state.lock().unwrap();
        event.sequence = Some(state.sequence);
        event.prev_hash = Some(state.prev_hash.clone());

        if let Ok(json) = serde_json::to_string(&event) {
            state.prev_hash = format!("{:x}", Sha256::digest(json.as_bytes()));
        }
        state.sequence += 1;

        drop(state);
        self.inner.record(event);
    }
}
