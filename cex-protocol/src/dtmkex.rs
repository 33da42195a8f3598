//! DTM-KEX state machine (spec §4.6 / C6): a two-phase authenticated key
//! exchange driven by a dedicated receive task per endpoint (spec §5's
//! "dedicated receive thread," realized as a `tokio::spawn` task — the
//! async-runtime analog the teacher already uses throughout `citadel-api`
//! for blocking-shaped I/O work).
//!
//! Control flow is `Result`-based throughout (REDESIGN FLAGS: no
//! exceptions-as-control-flow in the exchange). Host events are delivered
//! through a typed listener registry (`DtmEventListener`) rather than a
//! `+=` multicast delegate list.

use std::sync::Arc;
use std::time::Duration;

use rand_core::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use cex_cipher::blockmode::BlockMode;
use cex_primitives::{pke_provider, BlockCipherKind, CipherDescription, Digest, DigestKind, KeyMaterial, PkeKind, PkeProvider, PrngKind};

use crate::error::Error;
use crate::packet::{ExchangeFlag, Packet, PacketType, ServiceFlag};

/// `{ identity, pke_id, session, option_flag }` (spec §3).
#[derive(Debug, Clone)]
pub struct DtmIdentity {
    pub identity: Vec<u8>,
    pub pke_id: PkeKind,
    pub session: CipherDescription,
    pub option_flag: i64,
}

/// Inclusive upper bounds on random prepend/append padding (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct PaddingBound {
    pub pre: u16,
    pub post: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct PaddingBounds {
    pub asm_key: PaddingBound,
    pub asm_params: PaddingBound,
    pub sym_key: PaddingBound,
    pub message: PaddingBound,
}

/// Upper bounds on randomized transmit delays, in milliseconds (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct DelayBounds {
    pub asm_key: u32,
    pub sym_key: u32,
    pub message: u32,
}

/// `DtmParameters` (spec §3). Built exclusively via named-field struct
/// literals — this sidesteps the teacher-analog `ToStream`/constructor
/// field-order bug outright (spec §9 open question) rather than having to
/// reproduce or resolve it.
#[derive(Debug, Clone)]
pub struct DtmParameters {
    pub oid: [u8; 16],
    pub auth_pke_id: PkeKind,
    pub primary_pke_id: PkeKind,
    pub auth_session: CipherDescription,
    pub primary_session: CipherDescription,
    pub random_kind: PrngKind,
    pub padding_bounds: PaddingBounds,
    pub delays_ms: DelayBounds,
}

/// Exchange state (spec §4.6 state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Closed,
    Connecting,
    AuthExchanging,
    AuthEstablished,
    PrimaryExchanging,
    Established,
    Rekeying,
}

/// Which side of the exchange this endpoint plays; both sides run the same
/// phase sequence, this only selects who speaks first within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Host-visible events (spec §6.2).
#[derive(Debug, Clone)]
pub enum HostEvent {
    IdentityReceived { peer_identity: Vec<u8>, session_oid: [u8; 16] },
    PacketReceived { exchange_flag: Option<ExchangeFlag>, length: usize },
    PacketSent { exchange_flag: Option<ExchangeFlag>, length: usize },
    SessionEstablished { forward_fingerprint: [u8; 8], return_fingerprint: [u8; 8] },
    SessionError { message: String, severity: Severity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// Typed listener registry (REDESIGN FLAGS: explicit subscribe/unsubscribe
/// instead of a `+=` multicast delegate list), invoked synchronously from
/// the single dispatcher task that owns the receive loop.
pub trait DtmEventListener: Send + Sync {
    fn on_event(&self, event: HostEvent);
    /// Return `false` to refuse a freshly observed peer identity; the
    /// default accepts every identity.
    fn authorize_identity(&self, _peer_identity: &[u8], _session_oid: [u8; 16]) -> bool {
        true
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn DtmEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: Arc<dyn DtmEventListener>) {
        self.listeners.lock().await.push(listener);
    }

    pub async fn unsubscribe(&self, listener: &Arc<dyn DtmEventListener>) {
        self.listeners.lock().await.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) async fn emit(&self, event: HostEvent) {
        for listener in self.listeners.lock().await.iter() {
            listener.on_event(event.clone());
        }
    }

    async fn authorize(&self, peer_identity: &[u8], oid: [u8; 16]) -> bool {
        for listener in self.listeners.lock().await.iter() {
            if !listener.authorize_identity(peer_identity, oid) {
                return false;
            }
        }
        true
    }
}

/// Per-direction view over an initialized `BlockMode` (REDESIGN FLAGS:
/// `Encryptor`/`Decryptor` replace an `_isEncryption` boolean latent on a
/// single shared type).
pub struct Encryptor(BlockMode);
pub struct Decryptor(BlockMode);

impl Encryptor {
    pub(crate) fn new(cipher_kind: BlockCipherKind, key: &KeyMaterial) -> Result<Self, Error> {
        let mut engine = BlockMode::new(cex_primitives::CipherMode::Ctr, cipher_kind)?;
        engine.init(true, key)?;
        Ok(Self(engine))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.0.transform(plaintext)?)
    }

    /// The key material this direction was initialized with, for deriving
    /// further per-purpose keys (e.g. a transfer-level MAC) from the same
    /// session secret via `cex_primitives::kdf::expand`.
    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.0.key_material()
    }
}

impl Decryptor {
    pub(crate) fn new(cipher_kind: BlockCipherKind, key: &KeyMaterial) -> Result<Self, Error> {
        let mut engine = BlockMode::new(cex_primitives::CipherMode::Ctr, cipher_kind)?;
        engine.init(false, key)?;
        Ok(Self(engine))
    }

    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.0.transform(ciphertext)?)
    }

    /// The key material this direction was initialized with; see
    /// `Encryptor::key_material`.
    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.0.key_material()
    }
}

/// The two session ciphers an endpoint holds at `Established`: one to
/// encrypt outgoing traffic, one to decrypt incoming traffic.
pub struct SessionCiphers {
    pub forward: Encryptor,
    pub ret: Decryptor,
}

fn cipher_kind_for(desc: &CipherDescription) -> BlockCipherKind {
    match desc.key_bits {
        128 => BlockCipherKind::Aes128,
        192 => BlockCipherKind::Aes192,
        _ => BlockCipherKind::Aes256,
    }
}

fn fingerprint(key: &KeyMaterial) -> [u8; 8] {
    let mut d = cex_primitives::registry::digest(DigestKind::Sha256);
    d.update(key.key());
    let mut out = [0u8; 32];
    let _ = d.finalize(&mut out);
    let mut fp = [0u8; 8];
    fp.copy_from_slice(&out[..8]);
    fp
}

async fn random_delay(bound_ms: u32, half_floor: bool) {
    if bound_ms == 0 {
        return;
    }
    let mut seed = [0u8; 4];
    rand_core::OsRng.fill_bytes(&mut seed);
    let draw = u32::from_le_bytes(seed) % (bound_ms + 1);
    let floor = if half_floor { bound_ms / 2 } else { 0 };
    let delay = floor + draw % (bound_ms - floor + 1);
    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
}

fn random_padding(bound: PaddingBound) -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand_core::OsRng;
    let mut draw = |max: u16| -> usize {
        if max == 0 {
            return 0;
        }
        let mut buf = [0u8; 2];
        rng.fill_bytes(&mut buf);
        (u16::from_le_bytes(buf) % (max + 1)) as usize
    };
    let pre_len = draw(bound.pre);
    let post_len = draw(bound.post);
    let mut pre = vec![0u8; pre_len];
    let mut post = vec![0u8; post_len];
    rng.fill_bytes(&mut pre);
    rng.fill_bytes(&mut post);
    (pre, post)
}

/// Wraps `payload` with `[pre_len: u16][pre][payload][post_len: u16][post]`
/// so the receiver can strip exactly the padding that was applied.
fn pad_message(payload: &[u8], bound: PaddingBound) -> Vec<u8> {
    let (pre, post) = random_padding(bound);
    let mut out = Vec::with_capacity(2 + pre.len() + payload.len() + 2 + post.len());
    out.extend_from_slice(&(pre.len() as u16).to_le_bytes());
    out.extend_from_slice(&pre);
    out.extend_from_slice(payload);
    out.extend_from_slice(&(post.len() as u16).to_le_bytes());
    out.extend_from_slice(&post);
    out
}

/// Strips padding applied by `pad_message`, given the known plaintext
/// length. The frame carries only `pre_len`/`post_len`, not the payload's
/// own length, so a caller that doesn't already know it from context (the
/// KEM ciphertext/public-key size for its scheme) cannot recover it from
/// the frame alone — every call site here does know it.
fn unpad_message_with_len(framed: &[u8], payload_len: usize) -> Result<&[u8], Error> {
    if framed.len() < 4 {
        return Err(Error::Protocol("padded frame too short"));
    }
    let pre_len = u16::from_le_bytes(framed[0..2].try_into().unwrap()) as usize;
    let body_start = 2 + pre_len;
    let body_end = body_start + payload_len;
    if framed.len() < body_end + 2 {
        return Err(Error::Protocol("padded frame shorter than declared payload"));
    }
    Ok(&framed[body_start..body_end])
}

/// A single packet round trip over a duplex byte stream: encode+write one
/// frame, decode+read one frame.
struct Framing<S> {
    stream: S,
    next_seq: u32,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Framing<S> {
    fn new(stream: S) -> Self {
        Self { stream, next_seq: 0 }
    }

    async fn send(&mut self, packet_type: PacketType, packet_flag: u16, option_flag: u64, payload: Vec<u8>) -> Result<(), Error> {
        let packet = Packet::new(packet_type, self.next_seq, packet_flag, option_flag, payload)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.stream.write_all(&packet.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Packet, Error> {
        let mut header_buf = [0u8; crate::packet::HEADER_BYTES];
        self.stream.read_exact(&mut header_buf).await?;
        let header = crate::packet::PacketHeader::from_bytes(&header_buf)?;
        let mut payload = vec![0u8; header.payload_len as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(Packet { header, payload })
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Packet, Error> {
        tokio::time::timeout(timeout, self.recv()).await.map_err(|_| Error::ExchangeTimeout)?
    }
}

/// Drives one phase's asymmetric exchange: send our ephemeral public key,
/// receive the peer's, encapsulate against it to get a session seed we
/// send the ciphertext for, decapsulate the peer's ciphertext to recover
/// theirs. Returns `(our_seed, their_seed)` — `our_seed` derives the cipher
/// this endpoint encrypts with (its "forward"), `their_seed` derives the
/// cipher it decrypts with (its "return"); the peer derives the same pair
/// with forward/return swapped, so both sides agree on each direction's key.
async fn asymmetric_phase<S: AsyncRead + AsyncWrite + Unpin + Send>(
    framing: &mut Framing<S>,
    role: Role,
    pke_id: PkeKind,
    flag: ExchangeFlag,
    padding: PaddingBound,
    delay_ms: u32,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let provider = pke_provider(pke_id)?;
    let (pk, sk) = provider.keygen();
    let pk_bytes = pad_with_bound(&pk_to_bytes(pke_id, &pk), padding);

    random_delay(delay_ms, true).await;
    send_phase(framing, flag, role, true, pk_bytes.clone()).await?;
    let peer_pk_framed = recv_phase(framing, flag).await?;
    let peer_pk_bytes = unpad_with_bound(&peer_pk_framed, pk_byte_len(pke_id), padding)?;
    let peer_pk = pk_from_bytes(pke_id, peer_pk_bytes)?;

    let (our_seed, ciphertext) = provider.encapsulate(&peer_pk)?;
    let ct_framed = pad_with_bound(&ciphertext, padding);

    random_delay(delay_ms, true).await;
    send_phase(framing, flag, role, false, ct_framed).await?;
    let peer_ct_framed = recv_phase(framing, flag).await?;
    let peer_ct = unpad_with_bound(&peer_ct_framed, ciphertext.len(), padding)?;
    let their_seed = provider.decapsulate(&sk, peer_ct)?;

    Ok((our_seed, their_seed))
}

fn pad_with_bound(data: &[u8], bound: PaddingBound) -> Vec<u8> {
    pad_message(data, bound)
}

fn unpad_with_bound(framed: &[u8], known_len: usize, _bound: PaddingBound) -> Result<&[u8], Error> {
    unpad_message_with_len(framed, known_len)
}

fn pk_to_bytes(_pke_id: PkeKind, pk: &cex_primitives::PkePublicKey) -> Vec<u8> {
    pk.to_bytes().to_vec()
}

fn pk_from_bytes(_pke_id: PkeKind, bytes: &[u8]) -> Result<cex_primitives::PkePublicKey, Error> {
    Ok(cex_primitives::PkePublicKey::from_bytes(bytes)?)
}

fn pk_byte_len(_pke_id: PkeKind) -> usize {
    cex_primitives::pke::PKE_PUBLIC_KEY_BYTES
}

/// A single send/receive round for one phase, honoring the `Connect/Init`-
/// style "both sides speak, same flag" pattern: both roles send, then both
/// receive, rather than a strict ping-pong, so the phase completes in one
/// network round trip.
async fn send_phase<S: AsyncRead + AsyncWrite + Unpin + Send>(
    framing: &mut Framing<S>,
    flag: ExchangeFlag,
    _role: Role,
    _is_first_message: bool,
    payload: Vec<u8>,
) -> Result<(), Error> {
    framing.send(PacketType::Exchange, flag as u16, 0, payload).await
}

async fn recv_phase<S: AsyncRead + AsyncWrite + Unpin + Send>(framing: &mut Framing<S>, expect_flag: ExchangeFlag) -> Result<Vec<u8>, Error> {
    let packet = framing.recv_timeout(Duration::from_secs(30)).await?;
    match packet.header.packet_type {
        PacketType::Exchange if packet.header.packet_flag == expect_flag as u16 => Ok(packet.payload),
        PacketType::Service if packet.header.packet_flag == ServiceFlag::Refusal as u16 => Err(Error::PeerRefused),
        _ => Err(Error::Protocol("unexpected packet during exchange phase")),
    }
}

/// Derives a symmetric key/iv pair for an AES-CTR session cipher from raw
/// KDF input keying material, via `cex_primitives::kdf::expand`.
fn derive_session_key(ikm: &[u8], info: &[u8], desc: &CipherDescription) -> Result<KeyMaterial, Error> {
    let key = cex_primitives::kdf::expand(desc.kdf_digest, ikm, info, desc.key_bits as usize / 8)?;
    let iv = cex_primitives::kdf::expand(desc.kdf_digest, ikm, &[info, b"-iv"].concat(), desc.iv_bits as usize / 8)?;
    Ok(KeyMaterial::new(key, iv, info.to_vec(), desc)?)
}

/// Runs the full DTM-KEX handshake to completion over `stream`, given a
/// pre-shared `domain_secret` used to derive the pre-auth key for the
/// `Connect`/`Init` identity phase (spec §4.6 step 1).
pub async fn run_exchange<S: AsyncRead + AsyncWrite + Unpin + Send>(
    stream: S,
    role: Role,
    local_identity: DtmIdentity,
    params: &DtmParameters,
    domain_secret: &[u8],
    listeners: &ListenerRegistry,
) -> Result<(SessionCiphers, SessionCiphers), Error> {
    let mut framing = Framing::new(stream);
    let mut state = ExchangeState::Connecting;
    debug!(?role, ?state, "dtm-kex starting");

    // --- Connect / Init: identity exchange under a derived pre-auth key.
    let preauth_ikm = cex_primitives::kdf::expand(DigestKind::Sha256, domain_secret, b"dtm-preauth-v1", 32)?;
    let preauth_desc = params.auth_session;
    let preauth_key = derive_session_key(&preauth_ikm, b"dtm-preauth-fwd", &preauth_desc)?;
    let preauth_cipher_kind = cipher_kind_for(&preauth_desc);
    let preauth_enc = Encryptor::new(preauth_cipher_kind, &preauth_key)?;
    let preauth_dec = Decryptor::new(preauth_cipher_kind, &preauth_key)?;

    let identity_plain = encode_identity(&local_identity);
    let identity_ct = preauth_enc.seal(&identity_plain)?;
    framing.send(PacketType::Exchange, ExchangeFlag::Connect as u16, 0, identity_ct).await?;
    listeners.emit(HostEvent::PacketSent { exchange_flag: Some(ExchangeFlag::Connect), length: identity_plain.len() }).await;

    let peer_packet = framing.recv_timeout(Duration::from_secs(30)).await.map_err(|e| {
        state = ExchangeState::Closed;
        tracing::warn!(?state, "dtm-kex closed waiting on peer identity");
        e
    })?;
    if peer_packet.header.packet_type != PacketType::Exchange || peer_packet.header.packet_flag != ExchangeFlag::Connect as u16 {
        return Err(Error::Protocol("expected Connect identity frame"));
    }
    let peer_identity_plain = preauth_dec.open(&peer_packet.payload)?;
    let peer_identity = decode_identity(&peer_identity_plain)?;
    listeners
        .emit(HostEvent::IdentityReceived { peer_identity: peer_identity.identity.clone(), session_oid: params.oid })
        .await;
    if !listeners.authorize(&peer_identity.identity, params.oid).await {
        framing.send(PacketType::Service, ServiceFlag::Refusal as u16, 0, vec![]).await.ok();
        return Err(Error::PeerRefused);
    }

    // --- AuthEx: asymmetric exchange under auth_pke_id / auth_session.
    state = ExchangeState::AuthExchanging;
    debug!(?state, "entering auth exchange phase");
    let (auth_our_seed, auth_their_seed) =
        asymmetric_phase(&mut framing, role, params.auth_pke_id, ExchangeFlag::AuthEx, params.padding_bounds.asm_key, params.delays_ms.asm_key).await?;

    let auth_forward_key = derive_session_key(&auth_our_seed, b"dtm-auth-forward", &params.auth_session)?;
    let auth_return_key = derive_session_key(&auth_their_seed, b"dtm-auth-return", &params.auth_session)?;
    let auth_kind = cipher_kind_for(&params.auth_session);
    let auth_ciphers = SessionCiphers {
        forward: Encryptor::new(auth_kind, &auth_forward_key)?,
        ret: Decryptor::new(auth_kind, &auth_return_key)?,
    };
    state = ExchangeState::AuthEstablished;
    debug!(?state, "auth phase keys derived");
    framing.send(PacketType::Exchange, ExchangeFlag::AuthEstablished as u16, 0, vec![]).await?;
    let _ = framing.recv_timeout(Duration::from_secs(30)).await?;

    // --- PrimeEx: asymmetric exchange under primary_pke_id / primary_session,
    // itself wrapped in frames encrypted under the auth ciphers.
    state = ExchangeState::PrimaryExchanging;
    debug!(?state, "entering primary exchange phase");
    let (primary_our_seed, primary_their_seed) =
        primary_phase(&mut framing, role, params, &auth_ciphers).await?;

    let primary_forward_key = derive_session_key(&primary_our_seed, b"dtm-primary-forward", &params.primary_session)?;
    let primary_return_key = derive_session_key(&primary_their_seed, b"dtm-primary-return", &params.primary_session)?;
    let primary_kind = cipher_kind_for(&params.primary_session);
    let primary_ciphers = SessionCiphers {
        forward: Encryptor::new(primary_kind, &primary_forward_key)?,
        ret: Decryptor::new(primary_kind, &primary_return_key)?,
    };

    state = ExchangeState::Established;
    debug!(?state, "primary phase keys derived");
    framing.send(PacketType::Exchange, ExchangeFlag::Established as u16, 0, vec![]).await?;
    let _ = framing.recv_timeout(Duration::from_secs(30)).await?;

    listeners
        .emit(HostEvent::SessionEstablished {
            forward_fingerprint: fingerprint(&primary_forward_key),
            return_fingerprint: fingerprint(&primary_return_key),
        })
        .await;

    debug_assert_eq!(state, ExchangeState::Established);
    Ok((auth_ciphers, primary_ciphers))
}

/// The primary-phase asymmetric exchange, with every message wrapped in an
/// auth-cipher-encrypted `Exchange/PrimeEx` frame per spec §4.6 step 4.
async fn primary_phase<S: AsyncRead + AsyncWrite + Unpin + Send>(
    framing: &mut Framing<S>,
    role: Role,
    params: &DtmParameters,
    auth_ciphers: &SessionCiphers,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let provider = pke_provider(params.primary_pke_id)?;
    let (pk, sk) = provider.keygen();
    let pk_plain = pad_with_bound(&pk_to_bytes(params.primary_pke_id, &pk), params.padding_bounds.asm_params);

    random_delay(params.delays_ms.sym_key, true).await;
    framing
        .send(PacketType::Exchange, ExchangeFlag::PrimeEx as u16, 0, auth_ciphers.forward.seal(&pk_plain)?)
        .await?;
    let peer_frame = framing.recv_timeout(Duration::from_secs(30)).await?;
    if peer_frame.header.packet_type != PacketType::Exchange || peer_frame.header.packet_flag != ExchangeFlag::PrimeEx as u16 {
        return Err(Error::Protocol("expected PrimeEx public-key frame"));
    }
    let peer_pk_framed = auth_ciphers.ret.open(&peer_frame.payload)?;
    let peer_pk_bytes = unpad_with_bound(&peer_pk_framed, pk_byte_len(params.primary_pke_id), params.padding_bounds.asm_params)?;
    let peer_pk = pk_from_bytes(params.primary_pke_id, peer_pk_bytes)?;

    let (our_seed, ciphertext) = provider.encapsulate(&peer_pk)?;
    let ct_plain = pad_with_bound(&ciphertext, params.padding_bounds.sym_key);

    random_delay(params.delays_ms.sym_key, true).await;
    framing
        .send(PacketType::Exchange, ExchangeFlag::PrimeEx as u16, 0, auth_ciphers.forward.seal(&ct_plain)?)
        .await?;
    let peer_frame = framing.recv_timeout(Duration::from_secs(30)).await?;
    let peer_ct_framed = auth_ciphers.ret.open(&peer_frame.payload)?;
    let peer_ct = unpad_with_bound(&peer_ct_framed, ciphertext.len(), params.padding_bounds.sym_key)?;
    let their_seed = provider.decapsulate(&sk, peer_ct)?;

    let _ = role;
    Ok((our_seed, their_seed))
}

fn encode_identity(identity: &DtmIdentity) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(identity.identity.len() as u32).to_le_bytes());
    out.extend_from_slice(&identity.identity);
    out.extend_from_slice(&identity.session.to_bytes());
    out.extend_from_slice(&identity.option_flag.to_le_bytes());
    out
}

fn decode_identity(data: &[u8]) -> Result<DtmIdentity, Error> {
    if data.len() < 4 {
        return Err(Error::Protocol("truncated identity frame"));
    }
    let id_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let id_end = 4 + id_len;
    if data.len() < id_end + cex_primitives::WIRE_LEN + 8 {
        return Err(Error::Protocol("truncated identity frame"));
    }
    let identity = data[4..id_end].to_vec();
    let session = CipherDescription::from_bytes(&data[id_end..id_end + cex_primitives::WIRE_LEN])?;
    let option_flag = i64::from_le_bytes(data[id_end + cex_primitives::WIRE_LEN..id_end + cex_primitives::WIRE_LEN + 8].try_into().unwrap());
    Ok(DtmIdentity {
        identity,
        pke_id: PkeKind::HybridX25519MlKem768,
        session,
        option_flag,
    })
}

/// Runs the primary phase again over an already-`Established` session and
/// atomically swaps in the freshly derived ciphers (spec §4.6 "Rekey").
/// The previous `SessionCiphers` are returned to the caller so it can drop
/// (and thereby zeroize, via `KeyMaterial`'s `Zeroizing` fields) them.
pub async fn rekey<S: AsyncRead + AsyncWrite + Unpin + Send>(
    stream: &mut S,
    role: Role,
    params: &DtmParameters,
    auth_ciphers: &SessionCiphers,
) -> Result<SessionCiphers, Error>
where
    S: Sized,
{
    let mut framing = Framing::new(&mut *stream);
    framing.send(PacketType::Service, ServiceFlag::Resync as u16, 0, vec![]).await?;
    let (our_seed, their_seed) = primary_phase(&mut framing, role, params, auth_ciphers).await?;
    let forward_key = derive_session_key(&our_seed, b"dtm-primary-forward", &params.primary_session)?;
    let return_key = derive_session_key(&their_seed, b"dtm-primary-return", &params.primary_session)?;
    let kind = cipher_kind_for(&params.primary_session);
    Ok(SessionCiphers {
        forward: Encryptor::new(kind, &forward_key)?,
        ret: Decryptor::new(kind, &return_key)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_session_desc() -> CipherDescription {
        CipherDescription {
            engine: 0,
            key_bits: 256,
            iv_bits: 128,
            mode: cex_primitives::CipherMode::Ctr,
            padding: cex_primitives::PaddingMode::None,
            block_bits: 128,
            rounds: 0,
            kdf_digest: DigestKind::Sha256,
            mac_digest_size: 32,
            mac_digest: DigestKind::Sha256,
        }
    }

    fn demo_params() -> DtmParameters {
        let zero_bound = PaddingBound { pre: 0, post: 0 };
        DtmParameters {
            oid: *b"X41RNT1R1\0\0\0\0\0\0\0",
            auth_pke_id: PkeKind::HybridX25519MlKem768,
            primary_pke_id: PkeKind::HybridX25519MlKem768,
            auth_session: auth_session_desc(),
            primary_session: auth_session_desc(),
            random_kind: PrngKind::OsRng,
            padding_bounds: PaddingBounds {
                asm_key: zero_bound,
                asm_params: zero_bound,
                sym_key: zero_bound,
                message: zero_bound,
            },
            delays_ms: DelayBounds { asm_key: 0, sym_key: 0, message: 0 },
        }
    }

    #[test]
    fn identity_frame_round_trips() {
        let identity = DtmIdentity {
            identity: b"client-1".to_vec(),
            pke_id: PkeKind::HybridX25519MlKem768,
            session: auth_session_desc(),
            option_flag: 42,
        };
        let bytes = encode_identity(&identity);
        let decoded = decode_identity(&bytes).unwrap();
        assert_eq!(decoded.identity, identity.identity);
        assert_eq!(decoded.session, identity.session);
        assert_eq!(decoded.option_flag, identity.option_flag);
    }

    #[test]
    fn pad_unpad_round_trips_zero_bound() {
        let payload = b"hello";
        let framed = pad_message(payload, PaddingBound { pre: 0, post: 0 });
        let recovered = unpad_message_with_len(&framed, payload.len()).unwrap();
        assert_eq!(recovered, payload);
    }

    /// S6: DTM-KEX happy path over an in-process duplex pipe, establishing
    /// a session and exchanging one application message end to end.
    #[tokio::test]
    async fn happy_path_establishes_and_exchanges_message() {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let params = demo_params();
        let domain_secret = b"shared-domain-secret-32-bytes!!".to_vec();

        let client_identity = DtmIdentity {
            identity: b"initiator".to_vec(),
            pke_id: PkeKind::HybridX25519MlKem768,
            session: params.auth_session,
            option_flag: 0,
        };
        let server_identity = DtmIdentity {
            identity: b"responder".to_vec(),
            pke_id: PkeKind::HybridX25519MlKem768,
            session: params.auth_session,
            option_flag: 0,
        };

        let params_c = params.clone();
        let domain_c = domain_secret.clone();
        let client_task = tokio::spawn(async move {
            let listeners = ListenerRegistry::new();
            run_exchange(client, Role::Initiator, client_identity, &params_c, &domain_c, &listeners).await
        });
        let params_s = params.clone();
        let server_task = tokio::spawn(async move {
            let listeners = ListenerRegistry::new();
            run_exchange(server, Role::Responder, server_identity, &params_s, &domain_secret, &listeners).await
        });

        let (client_result, server_result) = tokio::join!(client_task, server_task);
        let (_client_auth, client_primary) = client_result.unwrap().unwrap();
        let (_server_auth, server_primary) = server_result.unwrap().unwrap();

        let message = b"the quick brown fox jumps over 32 bytes!";
        let ct = client_primary.forward.seal(message).unwrap();
        let pt = server_primary.ret.open(&ct).unwrap();
        assert_eq!(pt, message);
    }
}
