//! Stream processor (spec §4.4 / C4): drives a `Digest`, `Mac`, or
//! `BlockMode` over a long byte sequence, sequentially or via a bounded
//! reader/consumer pipeline.
//!
//! The teacher-analog bug called out in spec §9 — `ConcurrentStream`'s
//! unbounded queue growing without limit when the consumer stalls — is
//! fixed here by construction: `crossbeam_channel::bounded(2)` caps the
//! pipeline at two in-flight buffers regardless of how slow the primitive
//! is, the same crate family already introduced for the block-mode
//! engine's parallel path.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cex_primitives::{Digest, Mac};

use crate::blockmode::BlockMode;
use crate::error::Error;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub processed: u64,
    pub total: u64,
    pub done: bool,
}

/// Cooperative cancellation flag, checked at each buffer boundary (spec
/// §4.4: "implementers SHOULD add a cooperative cancel token").
#[derive(Clone)]
pub struct StreamCancelToken(Arc<AtomicBool>);

impl StreamCancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for StreamCancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks sources the concurrent pipeline is allowed to run over. Only
/// `File` qualifies — an arbitrary `Read` might be a pipe or socket where
/// a second buffer-ahead read could block indefinitely with nothing to
/// hand the consumer.
pub trait SeekableHint {
    fn is_seekable_file_like(&self) -> bool;
}

impl SeekableHint for std::fs::File {
    fn is_seekable_file_like(&self) -> bool {
        true
    }
}

pub fn concurrent_eligible(seekable: bool, total_len: u64, buffer_size: usize) -> bool {
    seekable && total_len >= buffer_size as u64
}

fn progress_cadence(total_len: u64, block_size: usize) -> u64 {
    let raw = (total_len + 99) / 100;
    let bs = block_size.max(1) as u64;
    ((raw / bs).max(1)) * bs
}

/// Reads into `buf` until it is full or the source is exhausted, returning
/// the number of bytes actually read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn emit_progress_crossings(processed: u64, total_len: u64, cadence: u64, next_emit: &mut u64, mut progress: impl FnMut(ProgressEvent)) {
    while *next_emit <= processed && *next_emit < total_len {
        progress(ProgressEvent { processed: *next_emit, total: total_len, done: false });
        *next_emit += cadence;
    }
}

/// Single-threaded read/sink loop, used directly when the concurrent
/// pipeline is inhibited and as the consumer side of `run_concurrent`.
pub fn run_sequential<R: Read>(
    mut reader: R,
    total_len: u64,
    buffer_size: usize,
    block_size: usize,
    cancel: Option<&StreamCancelToken>,
    mut progress: impl FnMut(ProgressEvent),
    mut sink: impl FnMut(&[u8]) -> Result<(), Error>,
) -> Result<(), Error> {
    let cadence = progress_cadence(total_len, block_size);
    let mut next_emit = cadence;
    let mut processed = 0u64;
    let mut buf = vec![0u8; buffer_size];

    while processed < total_len {
        if cancel.map(StreamCancelToken::is_cancelled).unwrap_or(false) {
            break;
        }
        let remaining = total_len - processed;
        let want = remaining.min(buffer_size as u64) as usize;
        let n = read_up_to(&mut reader, &mut buf[..want])?;
        if n < want {
            return Err(Error::UnexpectedEof);
        }
        sink(&buf[..n])?;
        processed += n as u64;
        emit_progress_crossings(processed, total_len, cadence, &mut next_emit, &mut progress);
    }
    progress(ProgressEvent { processed, total: total_len, done: true });
    Ok(())
}

/// Reader thread fills bounded-queue buffers; this (the calling) thread is
/// the consumer, draining strictly in FIFO order and applying `sink`.
pub fn run_concurrent<R: Read + Send + 'static>(
    mut reader: R,
    total_len: u64,
    buffer_size: usize,
    block_size: usize,
    cancel: Option<StreamCancelToken>,
    mut progress: impl FnMut(ProgressEvent),
    mut sink: impl FnMut(&[u8]) -> Result<(), Error>,
) -> Result<(), Error> {
    tracing::debug!(total_len, buffer_size, "starting concurrent stream pipeline");
    let (tx, rx) = crossbeam_channel::bounded::<Result<Vec<u8>, Error>>(2);
    let reader_cancel = cancel.clone();

    let reader_handle = std::thread::spawn(move || {
        let mut sent = 0u64;
        while sent < total_len {
            if reader_cancel.as_ref().map(StreamCancelToken::is_cancelled).unwrap_or(false) {
                tracing::debug!(sent, total_len, "reader thread observed cancellation");
                break;
            }
            let remaining = total_len - sent;
            let want = remaining.min(buffer_size as u64) as usize;
            let mut buf = vec![0u8; want];
            match read_up_to(&mut reader, &mut buf) {
                Ok(n) if n < want => {
                    let _ = tx.send(Err(Error::UnexpectedEof));
                    return;
                }
                Ok(n) => {
                    buf.truncate(n);
                    sent += n as u64;
                    if tx.send(Ok(buf)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
    });

    let cadence = progress_cadence(total_len, block_size);
    let mut next_emit = cadence;
    let mut processed = 0u64;
    let mut pipeline_err = None;

    for msg in rx.iter() {
        match msg {
            Ok(buf) => {
                if let Err(e) = sink(&buf) {
                    pipeline_err = Some(e);
                    break;
                }
                processed += buf.len() as u64;
                emit_progress_crossings(processed, total_len, cadence, &mut next_emit, &mut progress);
            }
            Err(e) => {
                pipeline_err = Some(e);
                break;
            }
        }
    }

    let _ = reader_handle.join();
    if let Some(e) = pipeline_err {
        tracing::debug!(processed, total_len, %e, "concurrent stream pipeline failed");
        return Err(e);
    }
    progress(ProgressEvent { processed, total: total_len, done: true });
    Ok(())
}

// ---------------------------------------------------------------------------
// Digest / MAC drivers
// ---------------------------------------------------------------------------

pub fn digest_reader<R: Read + Send + 'static>(
    reader: R,
    total_len: u64,
    digest: &mut dyn Digest,
    seekable: bool,
    cancel: Option<StreamCancelToken>,
    progress: impl FnMut(ProgressEvent),
) -> Result<(), Error> {
    let buffer_size = DEFAULT_BUFFER_SIZE;
    let block_size = digest.block_size();
    if concurrent_eligible(seekable, total_len, buffer_size) {
        run_concurrent(reader, total_len, buffer_size, block_size, cancel, progress, |chunk| {
            digest.update(chunk);
            Ok(())
        })
    } else {
        run_sequential(reader, total_len, buffer_size, block_size, cancel.as_ref(), progress, |chunk| {
            digest.update(chunk);
            Ok(())
        })
    }
}

pub fn mac_reader<R: Read + Send + 'static>(
    reader: R,
    total_len: u64,
    mac: &mut dyn Mac,
    seekable: bool,
    cancel: Option<StreamCancelToken>,
    progress: impl FnMut(ProgressEvent),
) -> Result<(), Error> {
    let buffer_size = DEFAULT_BUFFER_SIZE;
    let block_size = mac.block_size();
    if concurrent_eligible(seekable, total_len, buffer_size) {
        run_concurrent(reader, total_len, buffer_size, block_size, cancel, progress, |chunk| {
            mac.update(chunk);
            Ok(())
        })
    } else {
        run_sequential(reader, total_len, buffer_size, block_size, cancel.as_ref(), progress, |chunk| {
            mac.update(chunk);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Cipher-mode driver
// ---------------------------------------------------------------------------

/// Drives `total_len` bytes through an initialized `BlockMode`, one block
/// at a time, writing transformed output as it goes. `total_len` must be a
/// multiple of the engine's block size.
pub fn cipher_stream<R: Read + Send + 'static, W: Write>(
    reader: R,
    mut writer: W,
    engine: &mut BlockMode,
    total_len: u64,
    seekable: bool,
    cancel: Option<StreamCancelToken>,
    progress: impl FnMut(ProgressEvent),
) -> Result<(), Error> {
    let bs = engine.block_size();
    if total_len % bs as u64 != 0 {
        return Err(cex_primitives::Error::InvalidParameter("stream cipher requires block-aligned total length").into());
    }
    let buffer_size = DEFAULT_BUFFER_SIZE - (DEFAULT_BUFFER_SIZE % bs);
    let sink = |chunk: &[u8]| -> Result<(), Error> {
        let mut out = vec![0u8; chunk.len()];
        for (block_in, block_out) in chunk.chunks(bs).zip(out.chunks_mut(bs)) {
            engine.transform_block(block_in, 0, block_out, 0)?;
        }
        writer.write_all(&out)?;
        Ok(())
    };
    if concurrent_eligible(seekable, total_len, buffer_size) {
        run_concurrent(reader, total_len, buffer_size, bs, cancel, progress, sink)
    } else {
        run_sequential(reader, total_len, buffer_size, bs, cancel.as_ref(), progress, sink)
    }
}
