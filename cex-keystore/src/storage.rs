//! On-disk reader/writer for the key-package container's single-file
//! layout (spec §6.4).
//!
//! `citadel-keystore::storage::FileBackend` persists one JSON file per key;
//! a `PackageKey` is instead one file holding an authority header plus `N`
//! subkey blobs, so this module is a bespoke positional binary
//! reader/writer rather than an adaptation of `FileBackend`'s per-key JSON
//! model. The one idiom carried over verbatim is the atomic
//! write-to-`.tmp`-then-`rename` pattern `FileBackend::put` uses for whole-
//! file creation; in-place subkey overwrites (the `PostOverwrite` zero step)
//! instead seek-write-fsync directly, since the spec's crash-recovery
//! argument (§4.8: "a crash between (b) and (c) is recoverable because (c)
//! is inferred from all-zero blob") depends on that specific blob's bytes
//! being the recovery signal, not a whole-file swap.
//!
//! ```text
//! [authority: 144 B][description: 32 B][created: 8 B i64][subkey_count: 4 B u32]
//! [per subkey i: { policy: 8 B u64, id: 16 B u128, state: 1 B }]
//! [extension: 16 B][subkey_blob_size: 4 B u32]
//! [per subkey i: blob of subkey_blob_size]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use cex_primitives::{CipherDescription, WIRE_LEN as DESCRIPTION_WIRE_LEN};

use crate::error::KeystoreError;
use crate::types::{KeyAuthority, SubkeyId, SubkeyState, AUTHORITY_WIRE_LEN};

/// Bytes per subkey table entry: `policy(8) + id(16) + state(1)`.
pub const SUBKEY_ENTRY_LEN: usize = 8 + 16 + 1;

const CREATED_LEN: usize = 8;
const SUBKEY_COUNT_LEN: usize = 4;
const EXTENSION_LEN: usize = 16;
const BLOB_SIZE_LEN: usize = 4;

/// One row of the subkey table.
#[derive(Clone, Copy)]
pub struct SubkeyEntry {
    pub policy: u64,
    pub id: SubkeyId,
    pub state: SubkeyState,
}

impl SubkeyEntry {
    fn to_bytes(self) -> [u8; SUBKEY_ENTRY_LEN] {
        let mut out = [0u8; SUBKEY_ENTRY_LEN];
        out[0..8].copy_from_slice(&self.policy.to_le_bytes());
        out[8..24].copy_from_slice(&self.id.0.to_le_bytes());
        out[24] = self.state.0;
        out
    }

    fn from_bytes(data: &[u8; SUBKEY_ENTRY_LEN]) -> Self {
        let policy = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let id = SubkeyId(u128::from_le_bytes(data[8..24].try_into().unwrap()));
        let state = SubkeyState(data[24]);
        Self { policy, id, state }
    }
}

/// Byte offsets into the package file, computed once from `subkey_count`
/// and `subkey_blob_size` (both fixed for the file's lifetime).
#[derive(Clone, Copy)]
pub struct PackageLayout {
    pub subkey_count: u32,
    pub subkey_blob_size: u32,
}

impl PackageLayout {
    pub const AUTHORITY_OFFSET: u64 = 0;
    pub const DESCRIPTION_OFFSET: u64 = Self::AUTHORITY_OFFSET + AUTHORITY_WIRE_LEN as u64;
    pub const CREATED_OFFSET: u64 = Self::DESCRIPTION_OFFSET + DESCRIPTION_WIRE_LEN as u64;
    pub const SUBKEY_COUNT_OFFSET: u64 = Self::CREATED_OFFSET + CREATED_LEN as u64;
    pub const SUBKEY_TABLE_OFFSET: u64 = Self::SUBKEY_COUNT_OFFSET + SUBKEY_COUNT_LEN as u64;

    fn extension_offset(self) -> u64 {
        Self::SUBKEY_TABLE_OFFSET + self.subkey_count as u64 * SUBKEY_ENTRY_LEN as u64
    }

    fn blob_size_offset(self) -> u64 {
        self.extension_offset() + EXTENSION_LEN as u64
    }

    fn blobs_offset(self) -> u64 {
        self.blob_size_offset() + BLOB_SIZE_LEN as u64
    }

    pub fn blob_offset(self, index: u32) -> u64 {
        self.blobs_offset() + index as u64 * self.subkey_blob_size as u64
    }

    fn entry_offset(index: u32) -> u64 {
        Self::SUBKEY_TABLE_OFFSET + index as u64 * SUBKEY_ENTRY_LEN as u64
    }
}

/// The fully decoded, in-memory package header (everything except the
/// subkey blobs themselves, which are read/written positionally).
pub struct PackageHeader {
    pub authority: KeyAuthority,
    pub description: CipherDescription,
    pub created: i64,
    pub extension: [u8; EXTENSION_LEN],
    pub entries: Vec<SubkeyEntry>,
    pub layout: PackageLayout,
}

/// Create a new package file from scratch (spec §4.8 `create`). Writes to a
/// `.tmp` sibling then renames into place, same idiom as
/// `citadel-keystore::storage::FileBackend::put`.
pub fn write_new(
    path: &Path,
    authority: &KeyAuthority,
    description: &CipherDescription,
    created: i64,
    entries: &[SubkeyEntry],
    extension: &[u8; EXTENSION_LEN],
    blobs: &[Vec<u8>],
) -> Result<(), KeystoreError> {
    let subkey_count = entries.len() as u32;
    let subkey_blob_size = blobs.first().map(|b| b.len()).unwrap_or(0) as u32;
    if blobs.iter().any(|b| b.len() as u32 != subkey_blob_size) {
        return Err(KeystoreError::Corrupt("subkey blobs must share one size"));
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&authority.to_bytes());
    buf.extend_from_slice(&description.to_bytes());
    buf.extend_from_slice(&created.to_le_bytes());
    buf.extend_from_slice(&subkey_count.to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.to_bytes());
    }
    buf.extend_from_slice(extension);
    buf.extend_from_slice(&subkey_blob_size.to_le_bytes());
    for blob in blobs {
        buf.extend_from_slice(blob);
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Open an existing package file for read/write positional access.
pub fn open(path: &Path) -> Result<File, KeystoreError> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

/// Decode the header (authority, description, subkey table, extension).
pub fn read_header(file: &mut File) -> Result<PackageHeader, KeystoreError> {
    file.seek(SeekFrom::Start(0))?;

    let mut authority_buf = [0u8; AUTHORITY_WIRE_LEN];
    file.read_exact(&mut authority_buf)?;
    let authority = KeyAuthority::from_bytes(&authority_buf);

    let mut desc_buf = [0u8; DESCRIPTION_WIRE_LEN];
    file.read_exact(&mut desc_buf)?;
    let description = CipherDescription::from_bytes(&desc_buf)?;

    let mut created_buf = [0u8; CREATED_LEN];
    file.read_exact(&mut created_buf)?;
    let created = i64::from_le_bytes(created_buf);

    let mut count_buf = [0u8; SUBKEY_COUNT_LEN];
    file.read_exact(&mut count_buf)?;
    let subkey_count = u32::from_le_bytes(count_buf);

    let mut entries = Vec::with_capacity(subkey_count as usize);
    for _ in 0..subkey_count {
        let mut entry_buf = [0u8; SUBKEY_ENTRY_LEN];
        file.read_exact(&mut entry_buf)?;
        entries.push(SubkeyEntry::from_bytes(&entry_buf));
    }

    let mut extension = [0u8; EXTENSION_LEN];
    file.read_exact(&mut extension)?;

    let mut blob_size_buf = [0u8; BLOB_SIZE_LEN];
    file.read_exact(&mut blob_size_buf)?;
    let subkey_blob_size = u32::from_le_bytes(blob_size_buf);

    Ok(PackageHeader {
        authority,
        description,
        created,
        extension,
        entries,
        layout: PackageLayout { subkey_count, subkey_blob_size },
    })
}

/// Read a subkey's blob at its table index.
pub fn read_blob(file: &mut File, layout: PackageLayout, index: u32) -> Result<Vec<u8>, KeystoreError> {
    file.seek(SeekFrom::Start(layout.blob_offset(index)))?;
    let mut blob = vec![0u8; layout.subkey_blob_size as usize];
    file.read_exact(&mut blob)?;
    Ok(blob)
}

/// Overwrite a subkey's blob with zeroes in place and fsync — step (b) of
/// the `PostOverwrite` sequence (spec §4.8).
pub fn zero_blob(file: &mut File, layout: PackageLayout, index: u32) -> Result<(), KeystoreError> {
    file.seek(SeekFrom::Start(layout.blob_offset(index)))?;
    let zeroes = vec![0u8; layout.subkey_blob_size as usize];
    file.write_all(&zeroes)?;
    file.sync_all()?;
    Ok(())
}

/// A blob is all-zero, the crash-recovery signal for an interrupted
/// `PostOverwrite` (spec §4.8: step (c) is inferable from step (b)).
pub fn blob_is_zero(blob: &[u8]) -> bool {
    blob.iter().all(|&b| b == 0)
}

/// Rewrite one subkey table entry's state byte and fsync — step (c).
pub fn write_state(file: &mut File, index: u32, state: SubkeyState) -> Result<(), KeystoreError> {
    let offset = PackageLayout::entry_offset(index) + 8 + 16; // past policy + id
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&[state.0])?;
    file.sync_all()?;
    Ok(())
}
