//! Block-mode engine and stream processor built on `cex-primitives`.

pub mod blockmode;
pub mod ctr;
pub mod error;
pub mod stream;

pub use blockmode::{BlockMode, EngineState};
pub use error::Error;
pub use stream::{
    cipher_stream, concurrent_eligible, digest_reader, mac_reader, run_concurrent, run_sequential, ProgressEvent, SeekableHint,
    StreamCancelToken, DEFAULT_BUFFER_SIZE,
};
