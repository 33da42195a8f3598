//! Block-mode engine (spec §4.3 / C3): CTR, CBC, CFB, OFB over any
//! `BlockCipher` from the primitive registry, with a parallel decomposition
//! for CTR, CBC-decrypt, and CFB-decrypt.
//!
//! Parallel work is spawned with `rayon::scope` over contiguous block
//! ranges (not round-robin), one freshly initialized cipher instance per
//! thread — grounded in `oferchen-rsync`/`abitofhelp-adaptive_pipeline`'s
//! use of `rayon` for chunked, CPU-bound byte-range processing, and in
//! spec §5's "parallel engine holds one instance per thread, cloned from
//! the initialized master."

use std::sync::Mutex;

use cex_primitives::{BlockCipher, BlockCipherKind, CipherMode, Error as PrimError, KeyMaterial};

use crate::ctr;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Ready,
    Transforming,
}

pub struct BlockMode {
    mode: CipherMode,
    cipher_kind: BlockCipherKind,
    block_size: usize,
    state: EngineState,
    is_encrypt: bool,
    /// IV as given at `init` — the fixed starting point for whole-buffer
    /// `transform`/`transform_serial`/`transform_parallel` calls.
    iv: Vec<u8>,
    /// Running chain value for the block-at-a-time `transform_block` API.
    chain_state: Vec<u8>,
    key_material: Option<KeyMaterial>,
    master_cipher: Option<Box<dyn BlockCipher>>,
    thread_count: usize,
    parallel_min_size: usize,
    parallel_max_size: usize,
    parallel_block_size: usize,
    is_parallel: bool,
}

const DEFAULT_PARALLEL_MAX: usize = 100 * 1024 * 1024;
/// Near-L2-resident working set per thread.
const DEFAULT_PARALLEL_TARGET: usize = 256 * 1024;

impl BlockMode {
    pub fn new(mode: CipherMode, cipher_kind: BlockCipherKind) -> Result<Self, Error> {
        let probe = cex_primitives::block_cipher(cipher_kind)?;
        let block_size = probe.block_size();
        let thread_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let parallel_min_size = block_size * thread_count;
        let parallel_block_size = {
            let rounded = ((DEFAULT_PARALLEL_TARGET + parallel_min_size - 1) / parallel_min_size) * parallel_min_size;
            rounded.clamp(parallel_min_size, DEFAULT_PARALLEL_MAX)
        };
        Ok(Self {
            mode,
            cipher_kind,
            block_size,
            state: EngineState::Init,
            is_encrypt: true,
            iv: Vec::new(),
            chain_state: Vec::new(),
            key_material: None,
            master_cipher: None,
            thread_count,
            parallel_min_size,
            parallel_max_size: DEFAULT_PARALLEL_MAX,
            parallel_block_size,
            is_parallel: false,
        })
    }

    /// Must precede any `transform*` call.
    pub fn init(&mut self, is_encrypt: bool, key: &KeyMaterial) -> Result<(), Error> {
        // CTR/CFB/OFB only ever run the cipher in its forward direction to
        // build a keystream; only CBC applies the cipher's own direction.
        let forward_direction = match self.mode {
            CipherMode::Cbc => is_encrypt,
            CipherMode::Ctr | CipherMode::Cfb | CipherMode::Ofb => true,
        };
        let mut cipher = cex_primitives::block_cipher(self.cipher_kind)?;
        cipher.init(forward_direction, key)?;

        self.is_encrypt = is_encrypt;
        self.iv = key.iv().to_vec();
        self.chain_state = key.iv().to_vec();
        self.key_material = Some(key.clone());
        self.master_cipher = Some(cipher);
        self.state = EngineState::Ready;
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The key material given to `init`, if any — lets callers holding an
    /// initialized engine derive further keys from the same secret.
    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.key_material.as_ref()
    }

    pub fn parallel_min_size(&self) -> usize {
        self.parallel_min_size
    }

    pub fn parallel_max_size(&self) -> usize {
        self.parallel_max_size
    }

    pub fn parallel_block_size(&self) -> usize {
        self.parallel_block_size
    }

    pub fn set_parallel_block_size(&mut self, size: usize) -> Result<(), Error> {
        if size % self.parallel_min_size != 0 || size < self.parallel_min_size || size > self.parallel_max_size {
            return Err(PrimError::InvalidParameter("parallel_block_size must be a multiple of parallel_min_size within [min, max]").into());
        }
        self.parallel_block_size = size;
        Ok(())
    }

    pub fn is_parallel(&self) -> bool {
        self.is_parallel
    }

    pub fn set_parallel(&mut self, enabled: bool) {
        self.is_parallel = enabled;
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if self.state == EngineState::Init {
            return Err(PrimError::NotInitialized.into());
        }
        Ok(())
    }

    /// Whether `(mode, direction)` has a parallel decomposition (spec §4.3).
    fn mode_is_parallelizable(&self) -> bool {
        match self.mode {
            CipherMode::Ctr => true,
            CipherMode::Cbc | CipherMode::Cfb => !self.is_encrypt,
            CipherMode::Ofb => false,
        }
    }

    /// Single-block, stateful call advancing `chain_state` — the low-level
    /// streaming API. `NotInitialized` while not `Ready`.
    pub fn transform_block(&mut self, in_buf: &[u8], in_off: usize, out_buf: &mut [u8], out_off: usize) -> Result<(), Error> {
        self.ensure_ready()?;
        self.state = EngineState::Transforming;
        let bs = self.block_size;
        let result = (|| {
            let input = in_buf.get(in_off..in_off + bs).ok_or(PrimError::InvalidParameter("input block out of bounds"))?;
            let output = out_buf
                .get_mut(out_off..out_off + bs)
                .ok_or(PrimError::InvalidParameter("output block out of bounds"))?;
            let cipher = self.master_cipher.as_ref().ok_or(PrimError::NotInitialized)?;

            match self.mode {
                CipherMode::Ctr => {
                    let mut ks = vec![0u8; bs];
                    cipher.transform_block(&self.chain_state, &mut ks)?;
                    for i in 0..bs {
                        output[i] = input[i] ^ ks[i];
                    }
                    self.chain_state = ctr::add(&self.chain_state, 1);
                }
                CipherMode::Cbc if self.is_encrypt => {
                    let mut xored = vec![0u8; bs];
                    for i in 0..bs {
                        xored[i] = input[i] ^ self.chain_state[i];
                    }
                    cipher.transform_block(&xored, output)?;
                    self.chain_state = output.to_vec();
                }
                CipherMode::Cbc => {
                    cipher.transform_block(input, output)?;
                    for i in 0..bs {
                        output[i] ^= self.chain_state[i];
                    }
                    self.chain_state = input.to_vec();
                }
                CipherMode::Cfb if self.is_encrypt => {
                    let mut ks = vec![0u8; bs];
                    cipher.transform_block(&self.chain_state, &mut ks)?;
                    for i in 0..bs {
                        output[i] = input[i] ^ ks[i];
                    }
                    self.chain_state = output.to_vec();
                }
                CipherMode::Cfb => {
                    let mut ks = vec![0u8; bs];
                    cipher.transform_block(&self.chain_state, &mut ks)?;
                    for i in 0..bs {
                        output[i] = input[i] ^ ks[i];
                    }
                    self.chain_state = input.to_vec();
                }
                CipherMode::Ofb => {
                    let mut ks = vec![0u8; bs];
                    cipher.transform_block(&self.chain_state, &mut ks)?;
                    for i in 0..bs {
                        output[i] = input[i] ^ ks[i];
                    }
                    self.chain_state = ks;
                }
            }
            Ok(())
        })();
        self.state = EngineState::Ready;
        result
    }

    /// One-shot whole-buffer transform, always starting from the IV given
    /// at `init` (not `chain_state`). Picks parallel or serial based on
    /// `is_parallel`, mode/direction eligibility, and `parallel_min_size`.
    pub fn transform(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        if self.is_parallel && self.mode_is_parallelizable() && input.len() >= self.parallel_min_size {
            self.transform_parallel(input)
        } else {
            self.transform_serial(input)
        }
    }

    pub fn transform_serial(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        self.ensure_ready()?;
        let bs = self.block_size;
        let cipher = self.master_cipher.as_ref().ok_or(PrimError::NotInitialized)?;

        match self.mode {
            CipherMode::Ctr => Ok(ctr_serial(cipher.as_ref(), &self.iv, input)?),
            CipherMode::Cbc if self.is_encrypt => Ok(cbc_encrypt_serial(cipher.as_ref(), &self.iv, input)?),
            CipherMode::Cbc => Ok(cbc_decrypt_serial(cipher.as_ref(), &self.iv, input)?),
            CipherMode::Cfb if self.is_encrypt => Ok(cfb_encrypt_serial(cipher.as_ref(), &self.iv, input)?),
            CipherMode::Cfb => Ok(cfb_decrypt_serial(cipher.as_ref(), &self.iv, input)?),
            CipherMode::Ofb => Ok(ofb_serial(cipher.as_ref(), &self.iv, input)?),
        }
    }

    /// Only CTR, CBC-decrypt, and CFB-decrypt actually fan out; other
    /// mode/direction combinations fall back to `transform_serial`
    /// transparently (documented in spec §4.3: "CBC/CFB encrypt is
    /// serial").
    ///
    /// The buffer is walked in `parallel_block_size`-sized "parallel
    /// blocks" (P): each full P is itself split into `thread_count`
    /// contiguous sub-ranges and run on `rayon` workers, one freshly
    /// initialized cipher instance per worker. CTR tolerates a trailing
    /// remainder shorter than a full block size (spec §4.3 S1); that tail,
    /// plus anything left over after the last full P, is processed
    /// serially at the updated counter/chain position. CBC-decrypt and
    /// CFB-decrypt require block-aligned input overall, so their remainder
    /// is always a whole number of blocks.
    pub fn transform_parallel(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        self.ensure_ready()?;
        if !self.mode_is_parallelizable() {
            return self.transform_serial(input);
        }
        let bs = self.block_size;
        let p = self.parallel_block_size;
        let blocks_per_group = p / bs;
        let cipher = self.master_cipher.as_ref().ok_or(PrimError::NotInitialized)?;
        let mut out = vec![0u8; input.len()];

        // Each arm clones the IV into an owned, plain-data closure capture
        // so the spawned workers never need a `Sync` bound on `BlockMode`
        // itself (it holds a `Box<dyn BlockCipher>`, which is `Send` only).
        match self.mode {
            CipherMode::Ctr => {
                let iv = &self.iv;
                let group_bytes = blocks_per_group * bs;
                let mut offset = 0usize;
                let mut start_block = 0usize;
                while offset + group_bytes <= input.len() {
                    self.run_parallel_blocks(start_block, blocks_per_group, &mut out[offset..offset + group_bytes], |kind, km, sb, out_chunk| {
                        let cipher = init_cipher(kind, km, true)?;
                        let base = ctr::add(iv, sb as u64);
                        ctr_chunk(cipher.as_ref(), &base, &input[sb * bs..sb * bs + out_chunk.len()], out_chunk)
                    })?;
                    offset += group_bytes;
                    start_block += blocks_per_group;
                }
                if offset < input.len() {
                    let base = ctr::add(iv, start_block as u64);
                    ctr_chunk(cipher.as_ref(), &base, &input[offset..], &mut out[offset..])?;
                }
            }
            CipherMode::Cbc => {
                if input.len() % bs != 0 {
                    return Err(PrimError::InvalidParameter("parallel transform requires block-aligned input").into());
                }
                let iv = &self.iv;
                let total_blocks = input.len() / bs;
                let mut start_block = 0usize;
                while start_block + blocks_per_group <= total_blocks {
                    self.run_parallel_blocks(
                        start_block,
                        blocks_per_group,
                        &mut out[start_block * bs..(start_block + blocks_per_group) * bs],
                        |kind, km, sb, out_chunk| {
                            let cipher = init_cipher(kind, km, false)?;
                            cbc_decrypt_chunk(cipher.as_ref(), input, iv, bs, sb, out_chunk)
                        },
                    )?;
                    start_block += blocks_per_group;
                }
                if start_block < total_blocks {
                    cbc_decrypt_chunk(cipher.as_ref(), input, iv, bs, start_block, &mut out[start_block * bs..])?;
                }
            }
            CipherMode::Cfb => {
                if input.len() % bs != 0 {
                    return Err(PrimError::InvalidParameter("parallel transform requires block-aligned input").into());
                }
                let iv = &self.iv;
                let total_blocks = input.len() / bs;
                let mut start_block = 0usize;
                while start_block + blocks_per_group <= total_blocks {
                    self.run_parallel_blocks(
                        start_block,
                        blocks_per_group,
                        &mut out[start_block * bs..(start_block + blocks_per_group) * bs],
                        |kind, km, sb, out_chunk| {
                            let cipher = init_cipher(kind, km, true)?;
                            cfb_decrypt_chunk(cipher.as_ref(), input, iv, bs, sb, out_chunk)
                        },
                    )?;
                    start_block += blocks_per_group;
                }
                if start_block < total_blocks {
                    cfb_decrypt_chunk(cipher.as_ref(), input, iv, bs, start_block, &mut out[start_block * bs..])?;
                }
            }
            CipherMode::Ofb => unreachable!("ofb is never parallelizable"),
        }
        Ok(out)
    }

    /// Splits `out` into `thread_count` contiguous block ranges, starting
    /// at global block index `start_block` (remainder absorbed by the last
    /// range), and runs `f` for each on a `rayon` worker, each building its
    /// own freshly initialized cipher instance.
    fn run_parallel_blocks<F>(&self, start_block: usize, block_count: usize, out: &mut [u8], f: F) -> Result<(), Error>
    where
        F: Fn(BlockCipherKind, &KeyMaterial, usize, &mut [u8]) -> Result<(), Error> + Sync,
    {
        let bs = self.block_size;
        let thread_count = self.thread_count.max(1);
        let base_chunk = block_count / thread_count;
        let remainder = block_count % thread_count;
        let kind = self.cipher_kind;
        let key_material = self.key_material.as_ref().ok_or(Error::from(PrimError::NotInitialized))?;
        let first_err: Mutex<Option<Error>> = Mutex::new(None);

        rayon::scope(|scope| {
            let mut rest = out;
            let mut block_cursor = start_block;
            for t in 0..thread_count {
                let this_blocks = base_chunk + if t == thread_count - 1 { remainder } else { 0 };
                let this_bytes = this_blocks * bs;
                let (chunk, tail) = rest.split_at_mut(this_bytes);
                rest = tail;
                let sb = block_cursor;
                block_cursor += this_blocks;
                let f = &f;
                let err_slot = &first_err;
                scope.spawn(move |_| {
                    if let Err(e) = f(kind, key_material, sb, chunk) {
                        let mut slot = err_slot.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
        });

        if let Some(e) = first_err.into_inner().unwrap() {
            return Err(e);
        }
        Ok(())
    }
}

fn init_cipher(kind: BlockCipherKind, key_material: &KeyMaterial, is_encrypt: bool) -> Result<Box<dyn BlockCipher>, Error> {
    let mut cipher = cex_primitives::block_cipher(kind)?;
    cipher.init(is_encrypt, key_material)?;
    Ok(cipher)
}

// ---------------------------------------------------------------------------
// Serial mode implementations
// ---------------------------------------------------------------------------

fn require_aligned(bs: usize, len: usize) -> Result<(), Error> {
    if len % bs != 0 {
        return Err(PrimError::InvalidParameter("input must be a multiple of the block size").into());
    }
    Ok(())
}

fn ctr_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    let mut out = vec![0u8; input.len()];
    let mut counter = iv.to_vec();
    for (cin, cout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        let mut ks = vec![0u8; bs];
        cipher.transform_block(&counter, &mut ks)?;
        for i in 0..cin.len() {
            cout[i] = cin[i] ^ ks[i];
        }
        counter = ctr::add(&counter, 1);
    }
    Ok(out)
}

fn ctr_chunk(cipher: &dyn BlockCipher, base_counter: &[u8], in_chunk: &[u8], out_chunk: &mut [u8]) -> Result<(), Error> {
    let bs = cipher.block_size();
    let mut counter = base_counter.to_vec();
    for (cin, cout) in in_chunk.chunks(bs).zip(out_chunk.chunks_mut(bs)) {
        let mut ks = vec![0u8; bs];
        cipher.transform_block(&counter, &mut ks)?;
        for i in 0..cin.len() {
            cout[i] = cin[i] ^ ks[i];
        }
        counter = ctr::add(&counter, 1);
    }
    Ok(())
}

fn cbc_encrypt_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    require_aligned(bs, input.len())?;
    let mut out = vec![0u8; input.len()];
    let mut prev = iv.to_vec();
    for (pin, pout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        let mut xored = vec![0u8; bs];
        for i in 0..bs {
            xored[i] = pin[i] ^ prev[i];
        }
        cipher.transform_block(&xored, pout)?;
        prev = pout.to_vec();
    }
    Ok(out)
}

fn cbc_decrypt_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    require_aligned(bs, input.len())?;
    let mut out = vec![0u8; input.len()];
    let mut prev = iv.to_vec();
    for (cin, pout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        cipher.transform_block(cin, pout)?;
        for i in 0..bs {
            pout[i] ^= prev[i];
        }
        prev = cin.to_vec();
    }
    Ok(out)
}

fn cbc_decrypt_chunk(cipher: &dyn BlockCipher, full_input: &[u8], iv: &[u8], bs: usize, start_block: usize, out_chunk: &mut [u8]) -> Result<(), Error> {
    for (local_i, pout) in out_chunk.chunks_mut(bs).enumerate() {
        let i = start_block + local_i;
        let cur = &full_input[i * bs..i * bs + bs];
        cipher.transform_block(cur, pout)?;
        let prev: &[u8] = if i == 0 { iv } else { &full_input[(i - 1) * bs..i * bs] };
        for b in 0..bs {
            pout[b] ^= prev[b];
        }
    }
    Ok(())
}

fn cfb_encrypt_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    require_aligned(bs, input.len())?;
    let mut out = vec![0u8; input.len()];
    let mut prev = iv.to_vec();
    for (pin, pout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        let mut ks = vec![0u8; bs];
        cipher.transform_block(&prev, &mut ks)?;
        for i in 0..bs {
            pout[i] = pin[i] ^ ks[i];
        }
        prev = pout.to_vec();
    }
    Ok(out)
}

fn cfb_decrypt_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    require_aligned(bs, input.len())?;
    let mut out = vec![0u8; input.len()];
    let mut prev = iv.to_vec();
    for (cin, pout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        let mut ks = vec![0u8; bs];
        cipher.transform_block(&prev, &mut ks)?;
        for i in 0..bs {
            pout[i] = cin[i] ^ ks[i];
        }
        prev = cin.to_vec();
    }
    Ok(out)
}

fn cfb_decrypt_chunk(cipher: &dyn BlockCipher, full_input: &[u8], iv: &[u8], bs: usize, start_block: usize, out_chunk: &mut [u8]) -> Result<(), Error> {
    for (local_i, pout) in out_chunk.chunks_mut(bs).enumerate() {
        let i = start_block + local_i;
        let prev: &[u8] = if i == 0 { iv } else { &full_input[(i - 1) * bs..i * bs] };
        let mut ks = vec![0u8; bs];
        cipher.transform_block(prev, &mut ks)?;
        let cur = &full_input[i * bs..i * bs + bs];
        for b in 0..bs {
            pout[b] = ks[b] ^ cur[b];
        }
    }
    Ok(())
}

fn ofb_serial(cipher: &dyn BlockCipher, iv: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let bs = cipher.block_size();
    let mut out = vec![0u8; input.len()];
    let mut keystream = iv.to_vec();
    for (cin, cout) in input.chunks(bs).zip(out.chunks_mut(bs)) {
        let mut ks = vec![0u8; bs];
        cipher.transform_block(&keystream, &mut ks)?;
        for i in 0..cin.len() {
            cout[i] = cin[i] ^ ks[i];
        }
        keystream = ks;
    }
    Ok(out)
}
