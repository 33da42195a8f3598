//! Primitive identifiers — small tagged enumerations (spec §3).

/// Block cipher engines the registry can hand out (§4.1).
///
/// Only AES is actually wired to a concrete implementation; the others are
/// named because spec §1 scopes Rijndael/Serpent/Twofish variants as
/// external collaborators behind this same enum, so callers can match on a
/// stable tag set even though this crate only backs a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCipherKind {
    Aes128,
    Aes192,
    Aes256,
    Serpent,
    Twofish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCipherKind {
    Chacha20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestKind {
    Sha256,
    Sha512,
    Sha3_256,
    Sha3_512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacKind {
    HmacSha256,
    HmacSha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrngKind {
    /// OS entropy source, reseeded on every `fill`.
    OsRng,
    /// Deterministic ChaCha20-based PRNG, seeded once at construction.
    /// Used by the `kat` (known-answer-test) code paths.
    ChaCha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    Ctr,
    Cbc,
    Cfb,
    Ofb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaddingMode {
    Pkcs7,
    X923,
    Iso7816,
    Tbc,
    None,
}

/// Identifier for an asymmetric (PKE/KEM) parameter set, per spec §3
/// `DtmIdentity.pke_id`. Opaque beyond selecting a `PkeProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PkeKind {
    /// Hybrid X25519 + ML-KEM-768, standing in for the spec's NTRU/McEliece/
    /// Rainbow/GMSS options, which spec §1 treats opaquely.
    HybridX25519MlKem768,
}
