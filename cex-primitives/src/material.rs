//! Keyed material container (spec §4.2 / C2).

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::description::CipherDescription;
use crate::error::Error;
use crate::kdf;
use crate::kinds::DigestKind;
use crate::traits::Prng;

/// `{ key, iv, info }` triple. Never mutated after construction; scrubbed on
/// drop via `Zeroizing` rather than a hand-rolled `Drop` impl — the same
/// posture `citadel-envelope` takes with `Zeroizing::new(ss_raw)` for its
/// shared secrets.
///
/// `Clone` is explicit (REDESIGN FLAGS: no `Clone`/`Dispose` triads) — the
/// parallel block-mode engine clones it once per worker thread to build a
/// thread-local primitive instance, never to extend ownership implicitly.
#[derive(Clone)]
pub struct KeyMaterial {
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
    info: Vec<u8>,
}

impl KeyMaterial {
    /// Validate lengths against a description and take ownership.
    pub fn new(key: Vec<u8>, iv: Vec<u8>, info: Vec<u8>, desc: &CipherDescription) -> Result<Self, Error> {
        let want_key_bytes = desc.key_bits as usize / 8;
        let want_iv_bytes = desc.iv_bits as usize / 8;
        if key.len() != want_key_bytes {
            return Err(Error::InvalidParameter("key length does not match description.key_bits"));
        }
        if iv.len() != want_iv_bytes {
            return Err(Error::InvalidParameter("iv length does not match description.iv_bits"));
        }
        Ok(Self {
            key: Zeroizing::new(key),
            iv: Zeroizing::new(iv),
            info,
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn info(&self) -> &[u8] {
        &self.info
    }
}

impl PartialEq for KeyMaterial {
    /// Constant-time comparison (spec §4.2).
    fn eq(&self, other: &Self) -> bool {
        let key_eq: bool = self.key.ct_eq(&other.key).into();
        let iv_eq: bool = self.iv.ct_eq(&other.iv).into();
        key_eq & iv_eq & (self.info == other.info)
    }
}

/// Deterministic function of (entropy source, digest, lengths): draws a
/// seed from a `Prng`, then expands `seed || info` through the configured
/// digest/KDF to produce key/iv material of the requested sizes.
pub struct KeyGenerator<'p> {
    prng: &'p mut dyn Prng,
    digest: DigestKind,
}

impl<'p> KeyGenerator<'p> {
    pub fn new(prng: &'p mut dyn Prng, digest: DigestKind) -> Self {
        Self { prng, digest }
    }

    pub fn generate(&mut self, desc: &CipherDescription, info: &[u8]) -> Result<KeyMaterial, Error> {
        let key_bytes = desc.key_bits as usize / 8;
        let iv_bytes = desc.iv_bits as usize / 8;

        // Seed length matches the digest's natural output so HKDF expansion
        // has full-strength input entropy regardless of requested key size.
        let mut seed = vec![0u8; kdf::digest_output_len(self.digest)];
        self.prng.fill(&mut seed);

        let key = kdf::expand(self.digest, &seed, info, key_bytes)?;
        let iv = kdf::expand(self.digest, &seed, info, iv_bytes)?;

        KeyMaterial::new(key, iv, info.to_vec(), desc)
    }
}
