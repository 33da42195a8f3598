//! Session transport (spec §4.7 / C7): the post-exchange datagram flow —
//! `send`, `send_file`, and a keep-alive timer — built over the
//! `SessionCiphers` a completed `dtmkex::run_exchange` hands back.
//!
//! File reassembly uses a staged temp-file-then-atomic-rename, generalizing
//! `citadel-keystore::storage::FileBackend`'s whole-blob
//! write-to-`.tmp`-then-`rename` idiom from one JSON file per key to one
//! chunked transfer per file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use cex_primitives::{registry, CipherDescription, KeyMaterial, Mac as MacTrait};
use subtle::ConstantTimeEq;

use crate::dtmkex::{HostEvent, ListenerRegistry, SessionCiphers, Severity};
use crate::error::Error;
use crate::packet::{Packet, PacketType, ServiceFlag, MAX_PAYLOAD};

/// Default bound on a single `Transfer` frame's plaintext (spec §4.7).
pub const DEFAULT_TRANSFER_CHUNK: usize = 64 * 1024;

/// `Transfer` frame sub-kind, carried in `packet_flag` so the receiver can
/// tell a leading metadata frame from a data frame or the trailing MAC
/// frame without a separate framing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum TransferFlag {
    Metadata = 0,
    Chunk = 1,
    Final = 2,
}

/// A completed incoming transfer, surfaced to the host as `FileReceived`.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub suggested_name: String,
    pub total_len: u64,
    pub path: PathBuf,
}

/// Extra host events specific to the transport layer (spec §4.7): these sit
/// alongside `dtmkex::HostEvent` rather than folded into it, since they only
/// make sense once a session is `Established`.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    DataReceived(Vec<u8>),
    FileRequest { suggested_name: String, total_len: u64 },
    FileReceived(ReceivedFile),
}

pub trait TransportEventListener: Send + Sync {
    fn on_transport_event(&self, event: TransportEvent);
    /// Host chooses where an incoming file lands; default accepts the
    /// sender's suggested name under `dest_dir`.
    fn choose_destination(&self, suggested_name: &str, dest_dir: &Path) -> PathBuf {
        dest_dir.join(suggested_name)
    }
}

struct ReassemblyState {
    temp_path: PathBuf,
    file: File,
    suggested_name: String,
    total_len: u64,
    received: u64,
    mac: Box<dyn MacTrait>,
}

/// Post-exchange transport. Holds the session's forward/return ciphers and
/// drives `send`/`send_file`/`keep_alive` over a duplex stream.
///
/// `MAX_ALLOCATION` has no default (spec §9 redesign flag: the teacher-
/// analog 240 MiB default is a DoS vector) — callers must size it for their
/// own deployment.
pub struct SessionTransport<S> {
    stream: Mutex<S>,
    ciphers: SessionCiphers,
    /// The established session's cipher description — only its
    /// `mac_digest`/`mac_digest_size` fields are used here, to pick the
    /// transfer-level MAC's algorithm and derived-key length.
    session_description: CipherDescription,
    next_seq: std::sync::atomic::AtomicU32,
    max_allocation: u64,
    dest_dir: PathBuf,
    listeners: Arc<ListenerRegistry>,
    transport_listeners: Mutex<Vec<Arc<dyn TransportEventListener>>>,
    reassembly: Mutex<Option<ReassemblyState>>,
    last_peer_activity: Mutex<std::time::Instant>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SessionTransport<S> {
    pub fn new(
        stream: S,
        ciphers: SessionCiphers,
        session_description: CipherDescription,
        max_allocation: u64,
        dest_dir: PathBuf,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            stream: Mutex::new(stream),
            ciphers,
            session_description,
            next_seq: std::sync::atomic::AtomicU32::new(0),
            max_allocation,
            dest_dir,
            listeners,
            transport_listeners: Mutex::new(Vec::new()),
            reassembly: Mutex::new(None),
            last_peer_activity: Mutex::new(std::time::Instant::now()),
        }
    }

    /// Derives the transfer-level MAC for `direction`'s key material: HMAC
    /// under `session_description.mac_digest`, keyed from
    /// `cex_primitives::kdf::expand(ikm, "dtm-transfer-mac")` over that
    /// direction's session key — never the session key bytes directly.
    fn transfer_mac(&self, direction: &KeyMaterial) -> Result<Box<dyn MacTrait>, Error> {
        let desc = &self.session_description;
        let mac_kind = registry::mac_kind_for_digest(desc.mac_digest)?;
        let key_len = if desc.mac_digest_size > 0 {
            desc.mac_digest_size as usize
        } else {
            cex_primitives::kdf::digest_output_len(desc.mac_digest)
        };
        let mac_key = cex_primitives::kdf::expand(desc.mac_digest, direction.key(), b"dtm-transfer-mac", key_len)?;
        Ok(registry::mac(mac_kind, &mac_key)?)
    }

    pub async fn subscribe(&self, listener: Arc<dyn TransportEventListener>) {
        self.transport_listeners.lock().await.push(listener);
    }

    pub async fn unsubscribe(&self, listener: &Arc<dyn TransportEventListener>) {
        self.transport_listeners.lock().await.retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn emit_transport(&self, event: TransportEvent) {
        for listener in self.transport_listeners.lock().await.iter() {
            listener.on_transport_event(event.clone());
        }
    }

    fn next_sequence(&self) -> u32 {
        self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    async fn write_frame(&self, packet_type: PacketType, packet_flag: u16, plaintext: &[u8]) -> Result<(), Error> {
        let ciphertext = self.ciphers.forward.seal(plaintext)?;
        let packet = Packet::new(packet_type, self.next_sequence(), packet_flag, 0, ciphertext)?;
        let mut stream = self.stream.lock().await;
        stream.write_all(&packet.encode()).await?;
        stream.flush().await?;
        let _ = packet_type;
        self.listeners.emit_packet_sent(None, plaintext.len()).await;
        Ok(())
    }

    async fn read_frame(&self) -> Result<(PacketType, u16, Vec<u8>), Error> {
        let mut header_buf = [0u8; crate::packet::HEADER_BYTES];
        {
            let mut stream = self.stream.lock().await;
            stream.read_exact(&mut header_buf).await?;
            let header = crate::packet::PacketHeader::from_bytes(&header_buf)?;
            let mut ciphertext = vec![0u8; header.payload_len as usize];
            stream.read_exact(&mut ciphertext).await?;
            let plaintext = self.ciphers.ret.open(&ciphertext)?;
            *self.last_peer_activity.lock().await = std::time::Instant::now();
            Ok((header.packet_type, header.packet_flag, plaintext))
        }
    }

    /// Wraps `payload` in one or more `Message` frames, splitting on
    /// `MAX_PAYLOAD` boundaries when larger than a single frame can hold.
    pub async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        for chunk in payload.chunks(MAX_PAYLOAD as usize) {
            self.write_frame(PacketType::Message, 0, chunk).await?;
        }
        Ok(())
    }

    /// Splits `path`'s contents into bounded `Transfer` frames: a leading
    /// `Metadata` frame (filename, total size), then `Chunk` frames each
    /// carrying a running MAC over all plaintext sent so far, and a
    /// trailing `Final` frame carrying the full-file MAC (spec §4.7).
    pub async fn send_file(&self, path: &Path) -> Result<(), Error> {
        let metadata = tokio::fs::metadata(path).await?;
        let total_len = metadata.len();
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        let mut meta_frame = Vec::new();
        meta_frame.extend_from_slice(&(file_name.len() as u32).to_le_bytes());
        meta_frame.extend_from_slice(file_name.as_bytes());
        meta_frame.extend_from_slice(&total_len.to_le_bytes());
        self.write_frame(PacketType::Transfer, TransferFlag::Metadata as u16, &meta_frame).await?;

        let mut file = File::open(path).await?;
        let forward_key = self.ciphers.forward.key_material().ok_or(cex_primitives::Error::NotInitialized)?;
        let mut mac = self.transfer_mac(forward_key)?;
        let mut buf = vec![0u8; DEFAULT_TRANSFER_CHUNK];
        loop {
            let n = read_fill(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            mac.update(&buf[..n]);
            self.write_frame(PacketType::Transfer, TransferFlag::Chunk as u16, &buf[..n]).await?;
        }

        let mut digest_out = vec![0u8; mac.digest_size()];
        mac.finalize(&mut digest_out)?;
        self.write_frame(PacketType::Transfer, TransferFlag::Final as u16, &digest_out).await?;
        Ok(())
    }

    /// Runs the receive loop until the peer disconnects or sends
    /// `Service/Terminate`. Dispatches `Message`/`Transfer`/`Service` frames
    /// and surfaces host-visible events; callers typically spawn this on
    /// its own task per spec §5's "dedicated receive thread."
    pub async fn run_receive_loop(&self) -> Result<(), Error> {
        loop {
            let (packet_type, packet_flag, payload) = self.read_frame().await?;
            match packet_type {
                PacketType::Message => {
                    self.emit_transport(TransportEvent::DataReceived(payload)).await;
                }
                PacketType::Transfer => {
                    self.handle_transfer_frame(packet_flag, payload).await?;
                }
                PacketType::Service if packet_flag == ServiceFlag::Terminate as u16 => {
                    return Ok(());
                }
                PacketType::Service if packet_flag == ServiceFlag::KeepAlive as u16 => {
                    // Liveness only; `last_peer_activity` already updated by `read_frame`.
                }
                PacketType::Service => {
                    self.listeners
                        .emit_session_error(format!("unhandled service flag {packet_flag}"), Severity::Warning)
                        .await;
                }
                _ => {
                    self.listeners
                        .emit_session_error(format!("unexpected packet_type in established transport: {packet_type:?}"), Severity::Warning)
                        .await;
                }
            }
        }
    }

    async fn handle_transfer_frame(&self, packet_flag: u16, payload: Vec<u8>) -> Result<(), Error> {
        if packet_flag == TransferFlag::Metadata as u16 {
            if payload.len() < 4 {
                return Err(Error::Protocol("truncated transfer metadata frame"));
            }
            let name_len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
            let name_end = 4 + name_len;
            if payload.len() < name_end + 8 {
                return Err(Error::Protocol("truncated transfer metadata frame"));
            }
            let suggested_name = String::from_utf8_lossy(&payload[4..name_end]).into_owned();
            let total_len = u64::from_le_bytes(payload[name_end..name_end + 8].try_into().unwrap());
            if total_len > self.max_allocation {
                return Err(Error::PayloadTooLarge);
            }
            self.emit_transport(TransportEvent::FileRequest { suggested_name: suggested_name.clone(), total_len }).await;

            let dest = self.choose_destination(&suggested_name).await;
            let temp_path = dest.with_extension("cex-transfer-tmp");
            let file = File::create(&temp_path).await?;
            let return_key = self.ciphers.ret.key_material().ok_or(cex_primitives::Error::NotInitialized)?;
            let mac = self.transfer_mac(return_key)?;
            *self.reassembly.lock().await = Some(ReassemblyState { temp_path, file, suggested_name, total_len, received: 0, mac });
            return Ok(());
        }

        if packet_flag == TransferFlag::Chunk as u16 {
            let mut guard = self.reassembly.lock().await;
            let state = guard.as_mut().ok_or(Error::Protocol("transfer chunk with no open transfer"))?;
            let next_received = state.received + payload.len() as u64;
            if next_received > state.total_len || next_received > self.max_allocation {
                return Err(Error::PayloadTooLarge);
            }
            state.mac.update(&payload);
            state.file.write_all(&payload).await?;
            state.received = next_received;
            return Ok(());
        }

        if packet_flag == TransferFlag::Final as u16 {
            let state = self.reassembly.lock().await.take().ok_or(Error::Protocol("transfer final frame with no open transfer"))?;
            let ReassemblyState { temp_path, mut file, suggested_name, total_len, received, mut mac } = state;
            if received != total_len {
                return Err(Error::Protocol("transfer ended short of declared total length"));
            }
            let mut expected = vec![0u8; mac.digest_size()];
            mac.finalize(&mut expected)?;
            let matches: bool = expected.len() == payload.len() && bool::from(expected.ct_eq(&payload));
            if !matches {
                tokio::fs::remove_file(&temp_path).await.ok();
                return Err(cex_primitives::Error::AuthenticationFailed.into());
            }
            file.flush().await?;
            drop(file);

            let final_path = self.choose_destination(&suggested_name).await;
            tokio::fs::rename(&temp_path, &final_path).await?;
            self.emit_transport(TransportEvent::FileReceived(ReceivedFile { suggested_name, total_len, path: final_path })).await;
            return Ok(());
        }

        Err(Error::Protocol("unknown transfer sub-flag"))
    }

    async fn choose_destination(&self, suggested_name: &str) -> PathBuf {
        let listeners = self.transport_listeners.lock().await;
        for listener in listeners.iter() {
            return listener.choose_destination(suggested_name, &self.dest_dir);
        }
        self.dest_dir.join(suggested_name)
    }

    /// Emits `Service/KeepAlive` at `interval` while idle; if no frame
    /// (send or receive) has crossed the wire for `3 * interval`, emits
    /// `Service/Terminate` and returns.
    pub async fn keep_alive(&self, interval: Duration) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let idle_for = self.last_peer_activity.lock().await.elapsed();
            if idle_for >= interval * 3 {
                self.write_frame(PacketType::Service, ServiceFlag::Terminate as u16, &[]).await.ok();
                self.listeners.emit_session_error("peer idle beyond 3x keep-alive interval".into(), Severity::Error).await;
                return Ok(());
            }
            self.write_frame(PacketType::Service, ServiceFlag::KeepAlive as u16, &[]).await?;
        }
    }
}

async fn read_fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl ListenerRegistry {
    async fn emit_packet_sent(&self, exchange_flag: Option<crate::packet::ExchangeFlag>, length: usize) {
        self.emit(HostEvent::PacketSent { exchange_flag, length }).await;
    }

    async fn emit_session_error(&self, message: String, severity: Severity) {
        self.emit(HostEvent::SessionError { message, severity }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtmkex::{Decryptor, Encryptor};
    use cex_primitives::{BlockCipherKind, CipherDescription, CipherMode, DigestKind, KeyMaterial, PaddingMode};

    fn test_description() -> CipherDescription {
        CipherDescription {
            engine: 0,
            key_bits: 256,
            iv_bits: 128,
            mode: CipherMode::Ctr,
            padding: PaddingMode::None,
            block_bits: 128,
            rounds: 0,
            kdf_digest: DigestKind::Sha256,
            mac_digest_size: 32,
            mac_digest: DigestKind::Sha256,
        }
    }

    fn test_ciphers() -> (SessionCiphers, SessionCiphers) {
        let desc = test_description();
        let fwd_key = KeyMaterial::new(vec![1u8; 32], vec![2u8; 16], b"a".to_vec(), &desc).unwrap();
        let ret_key = KeyMaterial::new(vec![3u8; 32], vec![4u8; 16], b"b".to_vec(), &desc).unwrap();

        let client = SessionCiphers {
            forward: Encryptor::new(BlockCipherKind::Aes256, &fwd_key).unwrap(),
            ret: Decryptor::new(BlockCipherKind::Aes256, &ret_key).unwrap(),
        };
        let server = SessionCiphers {
            forward: Encryptor::new(BlockCipherKind::Aes256, &ret_key).unwrap(),
            ret: Decryptor::new(BlockCipherKind::Aes256, &fwd_key).unwrap(),
        };
        (client, server)
    }

    #[tokio::test]
    async fn send_and_receive_a_message() {
        let (client_ciphers, server_ciphers) = test_ciphers();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let tmp = tempfile::tempdir().unwrap();
        let client = Arc::new(SessionTransport::new(client_io, client_ciphers, test_description(), 1024 * 1024, tmp.path().to_path_buf(), Arc::new(ListenerRegistry::new())));
        let server = Arc::new(SessionTransport::new(server_io, server_ciphers, test_description(), 1024 * 1024, tmp.path().to_path_buf(), Arc::new(ListenerRegistry::new())));

        struct Capture(std::sync::Mutex<Vec<TransportEvent>>);
        impl TransportEventListener for Capture {
            fn on_transport_event(&self, event: TransportEvent) {
                self.0.lock().unwrap().push(event);
            }
        }
        let capture = Arc::new(Capture(std::sync::Mutex::new(Vec::new())));
        server.subscribe(capture.clone()).await;

        let server_recv = tokio::spawn({
            let server = server.clone();
            async move { server.run_receive_loop().await }
        });

        client.send(b"hello transport").await.unwrap();
        client.write_frame(PacketType::Service, ServiceFlag::Terminate as u16, &[]).await.unwrap();

        server_recv.await.unwrap().unwrap();

        let events = capture.0.lock().unwrap();
        assert!(matches!(&events[0], TransportEvent::DataReceived(payload) if payload == b"hello transport"));
    }

    #[tokio::test]
    async fn send_file_round_trips_with_rename() {
        let (client_ciphers, server_ciphers) = test_ciphers();
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);

        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("payload.bin");
        tokio::fs::write(&src_path, vec![0xABu8; 200 * 1024]).await.unwrap();

        let client = Arc::new(SessionTransport::new(client_io, client_ciphers, test_description(), 10 * 1024 * 1024, dest_dir.path().to_path_buf(), Arc::new(ListenerRegistry::new())));
        let server = Arc::new(SessionTransport::new(server_io, server_ciphers, test_description(), 10 * 1024 * 1024, dest_dir.path().to_path_buf(), Arc::new(ListenerRegistry::new())));

        let server_recv = tokio::spawn({
            let server = server.clone();
            async move { server.run_receive_loop().await }
        });

        client.send_file(&src_path).await.unwrap();
        client.write_frame(PacketType::Service, ServiceFlag::Terminate as u16, &[]).await.unwrap();
        server_recv.await.unwrap().unwrap();

        let final_path = dest_dir.path().join("payload.bin");
        let written = tokio::fs::read(&final_path).await.unwrap();
        assert_eq!(written.len(), 200 * 1024);
        assert!(written.iter().all(|b| *b == 0xAB));
    }
}
