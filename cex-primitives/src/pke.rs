//! Asymmetric key-encapsulation provider (spec §3 `DtmIdentity.pke_id` / §1).
//!
//! True NTRU/McEliece/Rainbow/GMSS schemes are out of scope (spec §1 treats
//! them as external collaborators reachable only through `PkeKind`); this
//! crate backs the enum with one concrete, already-hybrid scheme so
//! DTM-KEX has something real to drive end to end.

use ml_kem::{
    kem::{Decapsulate, Encapsulate},
    Ciphertext, EncodedSizeUser, KemCore, MlKem768, MlKem768Params,
};
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use crate::error::Error;
use crate::kinds::PkeKind;

const X25519_KEY_BYTES: usize = 32;
const MLKEM_PUBLIC_KEY_BYTES: usize = 1184;
const MLKEM_SECRET_KEY_BYTES: usize = 2400;
const MLKEM_CIPHERTEXT_BYTES: usize = 1088;

/// `x25519_pk[32] || mlkem_ek[1184]`
pub const PKE_PUBLIC_KEY_BYTES: usize = X25519_KEY_BYTES + MLKEM_PUBLIC_KEY_BYTES;
/// `x25519_sk[32] || mlkem_dk[2400]`
pub const PKE_SECRET_KEY_BYTES: usize = X25519_KEY_BYTES + MLKEM_SECRET_KEY_BYTES;
/// `x25519_ephemeral_pk[32] || mlkem_ct[1088]`
pub const PKE_CIPHERTEXT_BYTES: usize = X25519_KEY_BYTES + MLKEM_CIPHERTEXT_BYTES;
/// `x25519_dh[32] || mlkem_ss[32]`, fed to the KDF — never sent on the wire.
pub const PKE_SHARED_SECRET_BYTES: usize = 64;

type Ek = ml_kem::kem::EncapsulationKey<MlKem768Params>;
type Dk = ml_kem::kem::DecapsulationKey<MlKem768Params>;
type MlKemCt = Ciphertext<MlKem768>;

#[derive(Clone)]
pub struct PkePublicKey {
    x25519: X25519PublicKey,
    mlkem: Ek,
}

impl PkePublicKey {
    pub fn to_bytes(&self) -> [u8; PKE_PUBLIC_KEY_BYTES] {
        let mut out = [0u8; PKE_PUBLIC_KEY_BYTES];
        out[..X25519_KEY_BYTES].copy_from_slice(self.x25519.as_bytes());
        out[X25519_KEY_BYTES..].copy_from_slice(self.mlkem.as_bytes().as_slice());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PKE_PUBLIC_KEY_BYTES {
            return Err(Error::InvalidParameter("pke public key length"));
        }
        let x25519_bytes: [u8; X25519_KEY_BYTES] =
            bytes[..X25519_KEY_BYTES].try_into().map_err(|_| Error::InvalidParameter("pke public key length"))?;
        let mlkem_bytes: [u8; MLKEM_PUBLIC_KEY_BYTES] =
            bytes[X25519_KEY_BYTES..].try_into().map_err(|_| Error::InvalidParameter("pke public key length"))?;
        Ok(Self {
            x25519: X25519PublicKey::from(x25519_bytes),
            mlkem: Ek::from_bytes(&mlkem_bytes.into()),
        })
    }

    /// Writes the encoded key into `out` without an intermediate
    /// allocation; fails rather than silently truncating if `out` is the
    /// wrong size.
    pub fn write_into(&self, out: &mut [u8]) -> Result<(), Error> {
        if out.len() != PKE_PUBLIC_KEY_BYTES {
            return Err(Error::InvalidParameter("pke public key output buffer length"));
        }
        out.copy_from_slice(&self.to_bytes());
        Ok(())
    }
}

pub struct PkeSecretKey {
    x25519: StaticSecret,
    mlkem: Dk,
}

impl PkeSecretKey {
    pub fn to_bytes(&self) -> [u8; PKE_SECRET_KEY_BYTES] {
        let mut out = [0u8; PKE_SECRET_KEY_BYTES];
        out[..X25519_KEY_BYTES].copy_from_slice(&self.x25519.to_bytes());
        out[X25519_KEY_BYTES..].copy_from_slice(self.mlkem.as_bytes().as_slice());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PKE_SECRET_KEY_BYTES {
            return Err(Error::InvalidParameter("pke secret key length"));
        }
        let x25519_bytes: [u8; X25519_KEY_BYTES] =
            bytes[..X25519_KEY_BYTES].try_into().map_err(|_| Error::InvalidParameter("pke secret key length"))?;
        let mlkem_bytes: [u8; MLKEM_SECRET_KEY_BYTES] =
            bytes[X25519_KEY_BYTES..].try_into().map_err(|_| Error::InvalidParameter("pke secret key length"))?;
        Ok(Self {
            x25519: StaticSecret::from(x25519_bytes),
            mlkem: Dk::from_bytes(&mlkem_bytes.into()),
        })
    }

    /// Writes the encoded key into `out` without an intermediate
    /// allocation; fails rather than silently truncating if `out` is the
    /// wrong size.
    pub fn write_into(&self, out: &mut [u8]) -> Result<(), Error> {
        if out.len() != PKE_SECRET_KEY_BYTES {
            return Err(Error::InvalidParameter("pke secret key output buffer length"));
        }
        out.copy_from_slice(&self.to_bytes());
        Ok(())
    }
}

/// Selected by `PkeKind` via `pke_provider`; DTM-KEX only ever goes through
/// this seam, never touches X25519/ML-KEM directly.
pub trait PkeProvider {
    fn keygen(&self) -> (PkePublicKey, PkeSecretKey);
    /// Returns `(combined_shared_secret, ciphertext)`.
    fn encapsulate(&self, pk: &PkePublicKey) -> Result<(Vec<u8>, Vec<u8>), Error>;
    fn decapsulate(&self, sk: &PkeSecretKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

pub struct HybridX25519MlKem768Provider;

impl PkeProvider for HybridX25519MlKem768Provider {
    fn keygen(&self) -> (PkePublicKey, PkeSecretKey) {
        let x25519_sk = StaticSecret::random_from_rng(OsRng);
        let x25519_pk = X25519PublicKey::from(&x25519_sk);
        let (mlkem_dk, mlkem_ek) = MlKem768::generate(&mut OsRng);
        (
            PkePublicKey { x25519: x25519_pk, mlkem: mlkem_ek },
            PkeSecretKey { x25519: x25519_sk, mlkem: mlkem_dk },
        )
    }

    fn encapsulate(&self, pk: &PkePublicKey) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let x25519_eph = EphemeralSecret::random_from_rng(OsRng);
        let x25519_eph_pk = X25519PublicKey::from(&x25519_eph);
        let x25519_ss = x25519_eph.diffie_hellman(&pk.x25519);

        let (mlkem_ct, mlkem_ss) = pk
            .mlkem
            .encapsulate(&mut OsRng)
            .map_err(|_| Error::Unsupported("ml-kem encapsulation failed"))?;

        let mut combined_ss = Vec::with_capacity(PKE_SHARED_SECRET_BYTES);
        combined_ss.extend_from_slice(x25519_ss.as_bytes());
        combined_ss.extend_from_slice(mlkem_ss.as_slice());

        let mut ct = Vec::with_capacity(PKE_CIPHERTEXT_BYTES);
        ct.extend_from_slice(x25519_eph_pk.as_bytes());
        ct.extend_from_slice(mlkem_ct.as_slice());

        Ok((combined_ss, ct))
    }

    fn decapsulate(&self, sk: &PkeSecretKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() != PKE_CIPHERTEXT_BYTES {
            return Err(Error::InvalidParameter("pke ciphertext length"));
        }
        let x25519_epk_bytes: [u8; X25519_KEY_BYTES] =
            ciphertext[..X25519_KEY_BYTES].try_into().map_err(|_| Error::InvalidParameter("pke ciphertext length"))?;
        let x25519_epk = X25519PublicKey::from(x25519_epk_bytes);

        let mlkem_ct_bytes = &ciphertext[X25519_KEY_BYTES..];
        let mlkem_ct = MlKemCt::try_from(mlkem_ct_bytes).map_err(|_| Error::InvalidParameter("ml-kem ciphertext encoding"))?;

        let x25519_ss = sk.x25519.diffie_hellman(&x25519_epk);
        let mlkem_ss = sk
            .mlkem
            .decapsulate(&mlkem_ct)
            .map_err(|_| Error::AuthenticationFailed)?;

        let mut combined_ss = Vec::with_capacity(PKE_SHARED_SECRET_BYTES);
        combined_ss.extend_from_slice(x25519_ss.as_bytes());
        combined_ss.extend_from_slice(mlkem_ss.as_slice());
        Ok(combined_ss)
    }
}

pub fn pke_provider(kind: PkeKind) -> Result<Box<dyn PkeProvider>, Error> {
    match kind {
        PkeKind::HybridX25519MlKem768 => Ok(Box::new(HybridX25519MlKem768Provider)),
    }
}
