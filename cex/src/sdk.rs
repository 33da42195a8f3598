//! CEX SDK — public API surface.
//!
//! This module is the stable entry point for embedding CEX in another
//! program. `cex_primitives`, `cex_cipher`, `cex_protocol`, and
//! `cex_keystore` remain usable directly for anyone who wants the
//! lower-level components (a custom block mode driver, a bespoke packet
//! framing, ...); this module just wires the common path together the way
//! a caller would otherwise have to by hand.

use std::path::{Path, PathBuf};

use cex_cipher::BlockMode;
use cex_keystore::{KeyAuthority, KeyPackage, KeystoreError, PackageId, PresentedAuthority, SubkeyPolicy, SubkeyRead};
use cex_primitives::{
    block_cipher, prng, BlockCipherKind, CipherDescription, CipherMode, DigestKind, Error as PrimitiveError, KeyGenerator, KeyMaterial,
    PaddingMode, PrngKind,
};
use cex_protocol::{run_exchange, DtmIdentity, DtmParameters, ListenerRegistry, Role, SessionCiphers};
use tokio::io::{AsyncRead, AsyncWrite};

/// SDK version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A ready-to-use `CipherDescription` for AES-256-CTR with SHA-256 as both
/// the KDF digest and the (unused, since CTR has no MAC) MAC digest —
/// the description most callers reach for first.
pub fn aes256_ctr_description() -> CipherDescription {
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

fn cipher_kind_of(desc: &CipherDescription) -> Result<BlockCipherKind, PrimitiveError> {
    match desc.key_bits {
        128 => Ok(BlockCipherKind::Aes128),
        192 => Ok(BlockCipherKind::Aes192),
        256 => Ok(BlockCipherKind::Aes256),
        _ => Err(PrimitiveError::Unsupported("no block cipher registered for this key size")),
    }
}

/// Thin facade over `cex_cipher::BlockMode`: generates key material from a
/// description and runs whole-buffer encrypt/decrypt in one call, for
/// callers that don't need the stream processor's buffering or cancel
/// token.
pub struct CipherEngine {
    description: CipherDescription,
}

impl CipherEngine {
    pub fn new(description: CipherDescription) -> Result<Self, PrimitiveError> {
        // Validate the description names a supported engine up front.
        cipher_kind_of(&description)?;
        block_cipher(cipher_kind_of(&description)?)?;
        Ok(Self { description })
    }

    pub fn description(&self) -> CipherDescription {
        self.description
    }

    /// Draw fresh key material for this description from the OS RNG.
    pub fn generate_key(&self, info: &[u8]) -> Result<KeyMaterial, PrimitiveError> {
        let mut rng = prng(PrngKind::OsRng, None);
        let mut generator = KeyGenerator::new(rng.as_mut(), self.description.kdf_digest);
        generator.generate(&self.description, info)
    }

    pub fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, cex_cipher::Error> {
        let kind = cipher_kind_of(&self.description)?;
        let mut engine = BlockMode::new(self.description.mode, kind)?;
        engine.init(true, key)?;
        Ok(engine.transform(plaintext)?)
    }

    pub fn decrypt(&self, key: &KeyMaterial, ciphertext: &[u8]) -> Result<Vec<u8>, cex_cipher::Error> {
        let kind = cipher_kind_of(&self.description)?;
        let mut engine = BlockMode::new(self.description.mode, kind)?;
        engine.init(false, key)?;
        Ok(engine.transform(ciphertext)?)
    }
}

/// Thin facade over `cex_keystore::KeyPackage`: creating a fresh package of
/// plain, unauthenticated, non-expiring `Active` subkeys and reading them
/// back by position. Callers who need `PostOverwrite`/`Volatile`/
/// `PackageAuth`/`DomainAuth` policy bits or audit/threat wiring should use
/// `cex_keystore::KeyPackage` directly — this facade covers the common
/// "just give me N symmetric keys on disk" case.
pub struct KeyVault {
    package: KeyPackage,
}

impl KeyVault {
    /// Create a new vault of `count` `Active` subkeys, all under `description`.
    pub fn create(path: impl Into<PathBuf>, description: CipherDescription, count: usize) -> Result<Self, KeystoreError> {
        let path = path.into();
        let package_id = PackageId::generate();
        let authority = KeyAuthority {
            domain_id: [0u8; 32],
            origin_id: [0u8; 16],
            target_id: [0u8; 16],
            package_id: package_id.0,
            package_tag: [0u8; 32],
            policy_flags: 0,
            option_flag: 0,
        };
        let policies = vec![SubkeyPolicy::default().0; count];
        let mut keygen_rng = prng(PrngKind::OsRng, None);
        let mut generator = KeyGenerator::new(keygen_rng.as_mut(), description.kdf_digest);
        let mut extension_rng = prng(PrngKind::OsRng, None);
        let package = KeyPackage::create(path, &authority, &description, &policies, &mut generator, extension_rng.as_mut())?;
        Ok(Self { package })
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { package: KeyPackage::open(path) }
    }

    pub fn path(&self) -> &Path {
        self.package.path()
    }

    /// Read the subkey at table index `index`. Consumes it if its policy
    /// carries `PostOverwrite`.
    pub fn read_at(&self, index: u32) -> Result<SubkeyRead, KeystoreError> {
        self.package.read_at(index, PresentedAuthority::default())
    }
}

/// Run one side of a DTM-KEX exchange to completion over `stream`,
/// returning the established `(auth_ciphers, primary_ciphers)` pair —
/// `primary_ciphers` is what application traffic should use afterward.
pub async fn establish_session<S>(
    stream: S,
    role: Role,
    local_identity: DtmIdentity,
    params: &DtmParameters,
    domain_secret: &[u8],
) -> Result<(SessionCiphers, SessionCiphers), cex_protocol::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let listeners = ListenerRegistry::new();
    run_exchange(stream, role, local_identity, params, domain_secret, &listeners).await
}

/// A `DtmParameters` suitable for local demos and tests: AES-256-CTR on
/// both phases, the hybrid X25519 + ML-KEM-768 PKE, and message
/// padding/delay bounds taken from `CEX_*` environment variables (zero if
/// unset) via `EnvConfig`. Production deployments should widen the
/// asymmetric/symmetric-key padding bounds per spec §4.6's traffic-analysis
/// guidance — `EnvConfig` deliberately only overlays the message bounds.
pub fn demo_parameters() -> DtmParameters {
    use cex_primitives::PkeKind;
    use cex_protocol::{EnvConfig, PaddingBound, PaddingBounds};

    let zero_bound = PaddingBound { pre: 0, post: 0 };
    let base_padding = PaddingBounds { asm_key: zero_bound, asm_params: zero_bound, sym_key: zero_bound, message: zero_bound };
    let base_delays = cex_protocol::DelayBounds { asm_key: 0, sym_key: 0, message: 0 };
    let (padding_bounds, delays_ms) = EnvConfig::from_env().apply(base_padding, base_delays);

    DtmParameters {
        oid: *b"CEX-DEMO-SESSION",
        auth_pke_id: PkeKind::HybridX25519MlKem768,
        primary_pke_id: PkeKind::HybridX25519MlKem768,
        auth_session: aes256_ctr_description(),
        primary_session: aes256_ctr_description(),
        random_kind: PrngKind::OsRng,
        padding_bounds,
        delays_ms,
    }
}
