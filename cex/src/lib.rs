//! # CEX
//!
//! Parallel symmetric-cipher engine and DTM-KEX authenticated key
//! exchange.
//!
//! ## Quick start
//!
//! ```rust
//! use cex::sdk::{aes256_ctr_description, CipherEngine};
//!
//! let engine = CipherEngine::new(aes256_ctr_description()).unwrap();
//! let key = engine.generate_key(b"demo").unwrap();
//!
//! let ciphertext = engine.encrypt(&key, b"secret data").unwrap();
//! let plaintext = engine.decrypt(&key, &ciphertext).unwrap();
//! assert_eq!(plaintext, b"secret data");
//! ```
//!
//! The four workspace crates remain independently usable:
//! - [`cex_primitives`] — the primitive registry and keyed material container
//! - [`cex_cipher`] — the block-mode engine and stream processor
//! - [`cex_protocol`] — the packet codec, DTM-KEX, and session transport
//! - [`cex_keystore`] — the key-package container
//!
//! This crate's [`sdk`] module wires the common path across all four; the
//! [`cli`] module (behind the `cli` feature) is the `cex` binary's command
//! dispatch.

pub mod sdk;

#[cfg(feature = "cli")]
pub mod cli;

pub use cex_cipher;
pub use cex_keystore;
pub use cex_primitives;
pub use cex_protocol;

pub use sdk::VERSION;
