//! `cex-primitives`: the primitive registry and keyed-material container
//! that every other CEX crate builds on (spec §4, §6.1, §6.3).

pub mod description;
pub mod error;
pub mod kdf;
pub mod kinds;
pub mod material;
pub mod pke;
pub mod registry;
pub mod traits;

pub use description::{CipherDescription, WIRE_LEN};
pub use error::Error;
pub use kinds::{BlockCipherKind, CipherMode, DigestKind, MacKind, PaddingMode, PkeKind, PrngKind, StreamCipherKind};
pub use material::{KeyGenerator, KeyMaterial};
pub use pke::{pke_provider, PkeProvider, PkePublicKey, PkeSecretKey};
pub use registry::{block_cipher, digest, mac, prng, stream_cipher};
pub use traits::{BlockCipher, Digest, Mac, Prng, StreamCipher};
