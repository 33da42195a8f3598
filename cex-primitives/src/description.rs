//! `CipherDescription` — fixed-size record and its external wire contract
//! (spec §3 / §6.3).

use crate::error::Error;
use crate::kinds::{CipherMode, DigestKind, PaddingMode};

/// 32-byte little-endian wire layout from spec §6.3.
pub const WIRE_LEN: usize = 32;

/// Fixed-size cipher description record. Two descriptions are equal iff all
/// fields are equal (derived `PartialEq` gives this for free).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherDescription {
    /// Tag of the engine (`BlockCipherKind`/`StreamCipherKind`), stored as a
    /// raw u16 on the wire; `engine_tag`/`from_engine_tag` translate it.
    pub engine: u16,
    pub key_bits: u16,
    pub iv_bits: u16,
    pub mode: CipherMode,
    pub padding: PaddingMode,
    pub block_bits: u16,
    pub rounds: u16,
    pub kdf_digest: DigestKind,
    pub mac_digest_size: u16,
    pub mac_digest: DigestKind,
}

fn mode_tag(m: CipherMode) -> u8 {
    match m {
        CipherMode::Ctr => 0,
        CipherMode::Cbc => 1,
        CipherMode::Cfb => 2,
        CipherMode::Ofb => 3,
    }
}

fn mode_from_tag(t: u8) -> Result<CipherMode, Error> {
    match t {
        0 => Ok(CipherMode::Ctr),
        1 => Ok(CipherMode::Cbc),
        2 => Ok(CipherMode::Cfb),
        3 => Ok(CipherMode::Ofb),
        _ => Err(Error::Unsupported("cipher mode tag")),
    }
}

fn padding_tag(p: PaddingMode) -> u8 {
    match p {
        PaddingMode::Pkcs7 => 0,
        PaddingMode::X923 => 1,
        PaddingMode::Iso7816 => 2,
        PaddingMode::Tbc => 3,
        PaddingMode::None => 4,
    }
}

fn padding_from_tag(t: u8) -> Result<PaddingMode, Error> {
    match t {
        0 => Ok(PaddingMode::Pkcs7),
        1 => Ok(PaddingMode::X923),
        2 => Ok(PaddingMode::Iso7816),
        3 => Ok(PaddingMode::Tbc),
        4 => Ok(PaddingMode::None),
        _ => Err(Error::Unsupported("padding mode tag")),
    }
}

fn digest_tag(d: DigestKind) -> u8 {
    match d {
        DigestKind::Sha256 => 0,
        DigestKind::Sha512 => 1,
        DigestKind::Sha3_256 => 2,
        DigestKind::Sha3_512 => 3,
    }
}

fn digest_from_tag(t: u8) -> Result<DigestKind, Error> {
    match t {
        0 => Ok(DigestKind::Sha256),
        1 => Ok(DigestKind::Sha512),
        2 => Ok(DigestKind::Sha3_256),
        3 => Ok(DigestKind::Sha3_512),
        _ => Err(Error::Unsupported("digest tag")),
    }
}

impl CipherDescription {
    /// Serialize per spec §6.3:
    /// `engine[2] key_bits[2] iv_bits[2] mode[1] padding[1] block_bits[2]
    ///  rounds[2] kdf_digest[1] mac_digest_size[2] mac_digest[1] reserved[16]`
    pub fn to_bytes(&self) -> [u8; WIRE_LEN] {
        let mut out = [0u8; WIRE_LEN];
        out[0..2].copy_from_slice(&self.engine.to_le_bytes());
        out[2..4].copy_from_slice(&self.key_bits.to_le_bytes());
        out[4..6].copy_from_slice(&self.iv_bits.to_le_bytes());
        out[6] = mode_tag(self.mode);
        out[7] = padding_tag(self.padding);
        out[8..10].copy_from_slice(&self.block_bits.to_le_bytes());
        out[10..12].copy_from_slice(&self.rounds.to_le_bytes());
        out[12] = digest_tag(self.kdf_digest);
        out[13..15].copy_from_slice(&self.mac_digest_size.to_le_bytes());
        out[15] = digest_tag(self.mac_digest);
        // out[16..32] stays reserved-zero.
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != WIRE_LEN {
            return Err(Error::InvalidParameter("cipher description must be 32 bytes"));
        }
        Ok(Self {
            engine: u16::from_le_bytes([data[0], data[1]]),
            key_bits: u16::from_le_bytes([data[2], data[3]]),
            iv_bits: u16::from_le_bytes([data[4], data[5]]),
            mode: mode_from_tag(data[6])?,
            padding: padding_from_tag(data[7])?,
            block_bits: u16::from_le_bytes([data[8], data[9]]),
            rounds: u16::from_le_bytes([data[10], data[11]]),
            kdf_digest: digest_from_tag(data[12])?,
            mac_digest_size: u16::from_le_bytes([data[13], data[14]]),
            mac_digest: digest_from_tag(data[15])?,
        })
    }
}
