//! Key derivation: HKDF-expand (used by `KeyGenerator` and DTM-KEX's
//! pre-auth key) and PBKDF2 (spec §8 P4/P5 test vectors).

use hkdf::Hkdf;
use sha2::{Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::error::Error;
use crate::kinds::DigestKind;

pub fn digest_output_len(kind: DigestKind) -> usize {
    match kind {
        DigestKind::Sha256 | DigestKind::Sha3_256 => 32,
        DigestKind::Sha512 | DigestKind::Sha3_512 => 64,
    }
}

/// `HKDF-Expand(seed, info, len)` under the chosen digest. `seed` is used
/// directly as HKDF input keying material with no extract salt, matching
/// `citadel-envelope::kdf::derive_key`'s `Hkdf::new(None, shared_secret)`
/// pattern.
pub fn expand(kind: DigestKind, seed: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, Error> {
    let mut out = vec![0u8; out_len];
    match kind {
        DigestKind::Sha256 => {
            let hk = Hkdf::<Sha256>::new(None, seed);
            hk.expand(info, &mut out).map_err(|_| Error::InvalidParameter("hkdf expand length"))?;
        }
        DigestKind::Sha512 => {
            let hk = Hkdf::<Sha512>::new(None, seed);
            hk.expand(info, &mut out).map_err(|_| Error::InvalidParameter("hkdf expand length"))?;
        }
        DigestKind::Sha3_256 => {
            let hk = Hkdf::<Sha3_256>::new(None, seed);
            hk.expand(info, &mut out).map_err(|_| Error::InvalidParameter("hkdf expand length"))?;
        }
        DigestKind::Sha3_512 => {
            let hk = Hkdf::<Sha3_512>::new(None, seed);
            hk.expand(info, &mut out).map_err(|_| Error::InvalidParameter("hkdf expand length"))?;
        }
    }
    Ok(out)
}

/// `PBKDF2(HMAC-<digest>, password, salt, iterations, dk_len)` — spec §8 P4/P5.
pub fn pbkdf2(kind: DigestKind, password: &[u8], salt: &[u8], iterations: u32, dk_len: usize) -> Result<Vec<u8>, Error> {
    let mut out = vec![0u8; dk_len];
    match kind {
        DigestKind::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out),
        DigestKind::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out),
        DigestKind::Sha3_256 => pbkdf2::pbkdf2_hmac::<Sha3_256>(password, salt, iterations, &mut out),
        DigestKind::Sha3_512 => pbkdf2::pbkdf2_hmac::<Sha3_512>(password, salt, iterations, &mut out),
    }
    Ok(out)
}
