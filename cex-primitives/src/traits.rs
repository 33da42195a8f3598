//! Primitive interfaces (spec §4.1 / §6.1).
//!
//! These are the seams the registry (`registry.rs`) hands instances across.
//! Any implementer is free to provide additional primitives so long as they
//! conform to these signatures — the registry is a lookup, not a sealed
//! trait hierarchy.

use crate::error::Error;
use crate::material::KeyMaterial;

pub trait BlockCipher: Send {
    fn block_size(&self) -> usize;
    fn init(&mut self, is_encrypt: bool, key: &KeyMaterial) -> Result<(), Error>;
    fn transform_block(&self, input: &[u8], output: &mut [u8]) -> Result<(), Error>;
}

pub trait StreamCipher: Send {
    fn init(&mut self, key: &KeyMaterial) -> Result<(), Error>;
    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), Error>;
}

pub trait Digest: Send {
    fn block_size(&self) -> usize;
    fn digest_size(&self) -> usize;
    fn update(&mut self, data: &[u8]);
    fn finalize(&mut self, into: &mut [u8]) -> Result<(), Error>;
    fn reset(&mut self);
}

pub trait Mac: Send {
    fn key_size(&self) -> usize;
    fn digest_size(&self) -> usize;
    /// The underlying digest's block size — HMAC's internal pad width, not
    /// `digest_size()` (e.g. 64 bytes for HMAC-SHA-256, whose digest is 32).
    fn block_size(&self) -> usize;
    fn update(&mut self, data: &[u8]);
    fn finalize(&mut self, into: &mut [u8]) -> Result<(), Error>;
    fn reset(&mut self);
}

pub trait Prng: Send {
    fn fill(&mut self, out: &mut [u8]);
    fn next_u32(&mut self) -> u32;
}
