//! The key-package container itself (spec §4.8, C8): `create`, `read`,
//! `read_at`, and the `VolumeKey` specialization.
//!
//! Grounded on `citadel-keystore::keystore::Keystore` for the overall shape
//! (a container type holding a storage handle, an audit sink, and a threat
//! assessor, with policy-gated operations that audit-log every outcome) —
//! generalized from Keystore's per-key JSON-file CRUD to one file holding
//! `N` subkeys with the atomic `PostOverwrite` read-then-zero sequence
//! spec §4.8 requires.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cex_primitives::{CipherDescription, KeyGenerator, KeyMaterial, Prng};
use chrono::Utc;
use subtle::ConstantTimeEq;

use crate::audit::{AuditAction, AuditEvent, AuditSinkSync};
use crate::error::KeystoreError;
use crate::storage::{self, PackageHeader, SubkeyEntry};
use crate::threat::{PolicyAdapter, ThreatAssessor, ThreatEvent, ThreatEventKind};
use crate::types::{KeyAuthority, PackageId, SubkeyId, SubkeyPolicy, SubkeyState};

/// Nominal tolerance, in seconds, past a `Volatile` subkey's `option_flag`
/// deadline, before `PolicyAdapter::grace_factor` compression is applied.
const VOLATILE_GRACE_SECS: i64 = 30;

/// `package_tag`/`domain_id` the caller presents on a `read` for subkeys
/// that carry `PACKAGE_AUTH`/`DOMAIN_AUTH` (spec §4.8).
#[derive(Clone, Copy, Default)]
pub struct PresentedAuthority {
    pub package_tag: Option<[u8; 32]>,
    pub domain_id: Option<[u8; 32]>,
}

/// A subkey read, decoded into the types the rest of CEX expects.
pub struct SubkeyRead {
    pub description: CipherDescription,
    pub material: KeyMaterial,
    pub extension: [u8; 16],
}

/// Blob layout: `key_bytes || iv_bytes`, sized from the package
/// description. No per-subkey `info` is stored on disk — the subkey id's
/// bytes stand in for `info` on reconstruction, giving every subkey's
/// `KeyMaterial` a distinct, deterministic `info` without a dedicated wire
/// field spec §6.4 doesn't budget space for.
fn blob_len(desc: &CipherDescription) -> usize {
    desc.key_bits as usize / 8 + desc.iv_bits as usize / 8
}

fn split_blob(desc: &CipherDescription, blob: &[u8], id: SubkeyId) -> Result<KeyMaterial, KeystoreError> {
    let key_bytes = desc.key_bits as usize / 8;
    let (key, iv) = blob.split_at(key_bytes);
    let info = id.0.to_le_bytes().to_vec();
    Ok(KeyMaterial::new(key.to_vec(), iv.to_vec(), info, desc)?)
}

/// A key-package container backed by one file on disk.
pub struct KeyPackage {
    path: PathBuf,
    audit: Option<Arc<dyn AuditSinkSync>>,
    threat: Option<Arc<ThreatAssessor>>,
}

impl KeyPackage {
    /// Allocate a new package of `N` subkeys, all `Active`, via `generator`
    /// (spec §4.8 `create`). `policies[i]` governs `subkeys[i]`.
    pub fn create(
        path: impl Into<PathBuf>,
        authority: &KeyAuthority,
        description: &CipherDescription,
        policies: &[u64],
        generator: &mut KeyGenerator<'_>,
        prng: &mut dyn Prng,
    ) -> Result<Self, KeystoreError> {
        let path = path.into();
        let n = policies.len();
        if n == 0 {
            return Err(KeystoreError::Corrupt("package must hold at least one subkey"));
        }

        let mut entries = Vec::with_capacity(n);
        let mut blobs = Vec::with_capacity(n);
        let want_len = blob_len(description);

        for &policy in policies {
            let id = SubkeyId::generate();
            let material = generator.generate(description, &id.0.to_le_bytes())?;
            let mut blob = Vec::with_capacity(want_len);
            blob.extend_from_slice(material.key());
            blob.extend_from_slice(material.iv());
            blobs.push(blob);
            entries.push(SubkeyEntry { policy, id, state: SubkeyState::default().with(SubkeyState::ACTIVE) });
        }

        let mut extension = [0u8; 16];
        prng.fill(&mut extension);

        storage::write_new(&path, authority, description, Utc::now().timestamp(), &entries, &extension, &blobs)?;

        Ok(Self { path, audit: None, threat: None })
    }

    /// Open an existing package file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), audit: None, threat: None }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSinkSync>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_threat(mut self, threat: Arc<ThreatAssessor>) -> Self {
        self.threat = Some(threat);
        self
    }

    fn read_header(&self) -> Result<(std::fs::File, PackageHeader), KeystoreError> {
        let mut file = storage::open(&self.path)?;
        let header = storage::read_header(&mut file)?;
        Ok((file, header))
    }

    /// `read(id)` (spec §4.8): locate by id, enforce state/auth/expiry, and
    /// for `PostOverwrite` subkeys perform the copy-out/zero/mark-used
    /// sequence atomically before returning.
    pub fn read(&self, id: SubkeyId, presented: PresentedAuthority) -> Result<SubkeyRead, KeystoreError> {
        let (mut file, header) = self.read_header()?;
        let index = header
            .entries
            .iter()
            .position(|e| e.id.0 == id.0)
            .ok_or(KeystoreError::SubkeyNotFound(id))? as u32;
        self.read_entry(&mut file, &header, index, presented)
    }

    /// `read_at(stream, index)` (spec §4.8): positional read, used for
    /// tests and volume-key mode where the subkey id equals its index.
    pub fn read_at(&self, index: u32, presented: PresentedAuthority) -> Result<SubkeyRead, KeystoreError> {
        let (mut file, header) = self.read_header()?;
        if index as usize >= header.entries.len() {
            return Err(KeystoreError::SubkeyNotFound(SubkeyId(index as u128)));
        }
        self.read_entry(&mut file, &header, index, presented)
    }

    fn read_entry(
        &self,
        file: &mut std::fs::File,
        header: &PackageHeader,
        index: u32,
        presented: PresentedAuthority,
    ) -> Result<SubkeyRead, KeystoreError> {
        let entry = header.entries[index as usize];
        let policy = SubkeyPolicy(entry.policy);
        let package_id = PackageId(header.authority.package_id);

        if entry.state.is_used() || entry.state.is_expired() {
            self.note_failure(package_id, entry.id, entry.state, ThreatEventKind::SubkeyUnavailable, AuditAction::SubkeyRead);
            return Err(KeystoreError::SubkeyUnavailable { id: entry.id, state: entry.state });
        }

        if policy.contains(SubkeyPolicy::PACKAGE_AUTH) {
            let ok = presented
                .package_tag
                .map(|tag| bool::from(tag[..].ct_eq(&header.authority.package_tag[..])))
                .unwrap_or(false);
            if !ok {
                self.note_failure(package_id, entry.id, entry.state, ThreatEventKind::Unauthorized, AuditAction::SubkeyUnauthorized);
                return Err(KeystoreError::Unauthorized);
            }
        }
        if policy.contains(SubkeyPolicy::DOMAIN_AUTH) {
            let ok = presented
                .domain_id
                .map(|dom| bool::from(dom[..].ct_eq(&header.authority.domain_id[..])))
                .unwrap_or(false);
            if !ok {
                self.note_failure(package_id, entry.id, entry.state, ThreatEventKind::Unauthorized, AuditAction::SubkeyUnauthorized);
                return Err(KeystoreError::Unauthorized);
            }
        }

        if policy.contains(SubkeyPolicy::VOLATILE) {
            // A package with no threat assessor attached gets no grace
            // window — the raw expiry stands. One that does gets a
            // tolerance past `option_flag` that `PolicyAdapter::grace_factor`
            // compresses as the assessed threat level rises.
            let deadline = match &self.threat {
                Some(threat) => {
                    let factor = PolicyAdapter::grace_factor(threat.level());
                    header.authority.option_flag + (VOLATILE_GRACE_SECS as f64 * factor) as i64
                }
                None => header.authority.option_flag,
            };
            if deadline < Utc::now().timestamp() {
                self.note_failure(package_id, entry.id, entry.state, ThreatEventKind::SubkeyExpired, AuditAction::SubkeyExpired);
                return Err(KeystoreError::SubkeyExpired(entry.id));
            }
        }

        let blob = storage::read_blob(file, header.layout, index)?;
        let material = split_blob(&header.description, &blob, entry.id)?;

        if policy.contains(SubkeyPolicy::POST_OVERWRITE) {
            storage::zero_blob(file, header.layout, index)?;
            let used = entry.state.without(SubkeyState::ACTIVE).with(SubkeyState::USED);
            storage::write_state(file, index, used)?;
            if let Some(audit) = &self.audit {
                audit.record(AuditEvent::subkey_event(package_id, entry.id, used, AuditAction::SubkeyOverwritten));
            }
        }

        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::subkey_event(package_id, entry.id, entry.state, AuditAction::SubkeyRead));
        }

        Ok(SubkeyRead { description: header.description, material, extension: header.extension })
    }

    fn note_failure(
        &self,
        package_id: PackageId,
        subkey_id: SubkeyId,
        state: SubkeyState,
        kind: ThreatEventKind,
        action: AuditAction,
    ) {
        if let Some(threat) = &self.threat {
            threat.record(ThreatEvent::new(kind, 3.0));
        }
        if let Some(audit) = &self.audit {
            let verbose = self.threat.as_ref().is_some_and(|t| PolicyAdapter::force_verbose_audit(t.level()));
            let mut event = AuditEvent::subkey_event(package_id, subkey_id, state, action).with_failure();
            if verbose {
                event = event.with_detail(format!("threat level {}", self.threat.as_ref().unwrap().level()));
            }
            audit.record(event);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Specialization for volume-key files: subkeys are addressed purely
/// positionally and the stored id equals the index (spec §4.8 "used ...
/// for volume-key mode where `id == index`").
pub struct VolumeKeyPackage(KeyPackage);

impl VolumeKeyPackage {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self(KeyPackage::open(path))
    }

    pub fn with_audit(self, audit: Arc<dyn AuditSinkSync>) -> Self {
        Self(self.0.with_audit(audit))
    }

    pub fn with_threat(self, threat: Arc<ThreatAssessor>) -> Self {
        Self(self.0.with_threat(threat))
    }

    pub fn read(&self, index: u32) -> Result<SubkeyRead, KeystoreError> {
        self.0.read_at(index, PresentedAuthority::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cex_primitives::{BlockCipherKind, CipherMode, DigestKind, PaddingMode};
    use rand_core::{OsRng, RngCore};

    struct TestPrng;
    impl Prng for TestPrng {
        fn fill(&mut self, buf: &mut [u8]) {
            OsRng.fill_bytes(buf);
        }
        fn next_u32(&mut self) -> u32 {
            OsRng.next_u32()
        }
    }

    fn test_description() -> CipherDescription {
        CipherDescription {
            engine: BlockCipherKind::Aes256 as u16,
            key_bits: 256,
            iv_bits: 128,
            mode: CipherMode::Ctr,
            padding: PaddingMode::None,
            block_bits: 128,
            rounds: 14,
            kdf_digest: DigestKind::Sha256,
            mac_digest_size: 32,
            mac_digest: DigestKind::Sha256,
        }
    }

    fn test_authority() -> KeyAuthority {
        KeyAuthority {
            domain_id: [1u8; 32],
            origin_id: [2u8; 16],
            target_id: [3u8; 16],
            package_id: [4u8; 32],
            package_tag: [5u8; 32],
            policy_flags: 0,
            option_flag: 0,
        }
    }

    #[test]
    fn post_overwrite_consumes_subkey_s7() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.kex");
        let desc = test_description();
        let authority = test_authority();
        let policies = vec![SubkeyPolicy::POST_OVERWRITE; 10];
        let mut prng = TestPrng;
        let mut generator = KeyGenerator::new(&mut prng, DigestKind::Sha256);

        let package = KeyPackage::create(&path, &authority, &desc, &policies, &mut generator, &mut TestPrng).unwrap();

        let first = package.read_at(3, PresentedAuthority::default()).unwrap();
        assert_eq!(first.material.key().len(), 32);

        let err = package.read_at(3, PresentedAuthority::default()).unwrap_err();
        assert!(matches!(err, KeystoreError::SubkeyUnavailable { .. }));

        let mut file = storage::open(&path).unwrap();
        let header = storage::read_header(&mut file).unwrap();
        let blob = storage::read_blob(&mut file, header.layout, 3).unwrap();
        assert!(storage::blob_is_zero(&blob));
    }

    #[test]
    fn package_auth_mismatch_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.kex");
        let desc = test_description();
        let authority = test_authority();
        let policies = vec![SubkeyPolicy::PACKAGE_AUTH];
        let mut prng = TestPrng;
        let mut generator = KeyGenerator::new(&mut prng, DigestKind::Sha256);
        let package = KeyPackage::create(&path, &authority, &desc, &policies, &mut generator, &mut TestPrng).unwrap();

        let wrong = PresentedAuthority { package_tag: Some([9u8; 32]), domain_id: None };
        assert!(matches!(package.read_at(0, wrong).unwrap_err(), KeystoreError::Unauthorized));

        let right = PresentedAuthority { package_tag: Some(authority.package_tag), domain_id: None };
        assert!(package.read_at(0, right).is_ok());
    }

    #[test]
    fn volatile_past_expiry_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.kex");
        let desc = test_description();
        let mut authority = test_authority();
        authority.option_flag = Utc::now().timestamp() - 1;
        let policies = vec![SubkeyPolicy::VOLATILE];
        let mut prng = TestPrng;
        let mut generator = KeyGenerator::new(&mut prng, DigestKind::Sha256);
        let package = KeyPackage::create(&path, &authority, &desc, &policies, &mut generator, &mut TestPrng).unwrap();

        assert!(matches!(
            package.read_at(0, PresentedAuthority::default()).unwrap_err(),
            KeystoreError::SubkeyExpired(_)
        ));
    }

    #[test]
    fn volume_key_package_reads_positionally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.kex");
        let desc = test_description();
        let authority = test_authority();
        let policies = vec![0u64; 4];
        let mut prng = TestPrng;
        let mut generator = KeyGenerator::new(&mut prng, DigestKind::Sha256);
        KeyPackage::create(&path, &authority, &desc, &policies, &mut generator, &mut TestPrng).unwrap();

        let volume = VolumeKeyPackage::open(&path);
        assert!(volume.read(2).is_ok());
    }

    #[test]
    fn audit_and_threat_observe_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.kex");
        let desc = test_description();
        let authority = test_authority();
        let policies = vec![SubkeyPolicy::PACKAGE_AUTH];
        let mut prng = TestPrng;
        let mut generator = KeyGenerator::new(&mut prng, DigestKind::Sha256);

        let audit: Arc<dyn AuditSinkSync> = Arc::new(crate::audit::InMemoryAuditSink::new());
        let threat = Arc::new(ThreatAssessor::new(Default::default()));
        let package = KeyPackage::create(&path, &authority, &desc, &policies, &mut generator, &mut TestPrng)
            .unwrap()
            .with_audit(audit.clone())
            .with_threat(threat.clone());

        let _ = package.read_at(0, PresentedAuthority::default());
        assert!(threat.level().value() >= 1);
    }
}
