//! `cex-protocol`: the packet codec, DTM-KEX authenticated exchange state
//! machine, and post-exchange session transport (spec §4.5–§4.7, C5–C7).
//!
//! Built on `cex-primitives`' registry/key-material and `cex-cipher`'s
//! block-mode engine — this crate never touches a concrete cipher
//! implementation directly, only `BlockMode`/`PkeProvider`.

pub mod config;
pub mod dtmkex;
pub mod error;
pub mod packet;
pub mod transport;

pub use config::EnvConfig;
pub use dtmkex::{
    rekey, run_exchange, DelayBounds, Decryptor, DtmEventListener, DtmIdentity, DtmParameters, Encryptor, ExchangeState, HostEvent,
    ListenerRegistry, PaddingBound, PaddingBounds, Role, Severity, SessionCiphers,
};
pub use error::Error;
pub use packet::{ExchangeFlag, Packet, PacketHeader, PacketType, ServiceFlag};
pub use transport::{ReceivedFile, SessionTransport, TransportEvent, TransportEventListener, DEFAULT_TRANSFER_CHUNK};
