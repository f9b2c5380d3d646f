//! Binary encoding of [`WorldSnapshot`].

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    engine_state::voxels::{
        block::BlockType,
        chunk::{ChunkDiff, DiffEntry, CHUNK_VOLUME},
        generation::Theme,
    },
    error::SnapshotError,
};

use super::{WorldSnapshot, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC};

// magic + version + theme + seed length + timestamp + sequence + chunk count
const HEADER_FIXED_LEN: usize = 4 + 1 + 1 + 4 + 8 + 4 + 4;
// cx + cz + entry count
const CHUNK_HEADER_LEN: usize = 4 + 4 + 4;
// local index + block type
const ENTRY_LEN: usize = 2 + 1;

/// Exact encoded size of a snapshot in bytes.
pub fn serialized_len(snapshot: &WorldSnapshot) -> usize {
    HEADER_FIXED_LEN
        + snapshot.seed.len()
        + snapshot
            .chunks
            .iter()
            .map(|diff| CHUNK_HEADER_LEN + diff.entries.len() * ENTRY_LEN)
            .sum::<usize>()
}

fn length_u32(len: usize, field: &'static str) -> Result<u32, SnapshotError> {
    u32::try_from(len).map_err(|_| SnapshotError::TooLarge(field))
}

/// Encodes a snapshot.
///
/// The output buffer is allocated once at its exact final size.
///
/// # Returns
/// The encoded bytes, or an error if the format version is not one this
/// codec reads back, a length overflows its field or a diff entry is not a
/// valid voxel write.
pub fn serialize_snapshot(snapshot: &WorldSnapshot) -> Result<Vec<u8>, SnapshotError> {
    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.format_version));
    }
    let size = serialized_len(snapshot);
    let mut buf = Vec::with_capacity(size);

    buf.write_u32::<BigEndian>(SNAPSHOT_MAGIC)?;
    buf.write_u8(snapshot.format_version)?;
    buf.write_u8(snapshot.theme.index())?;
    buf.write_u32::<BigEndian>(length_u32(snapshot.seed.len(), "seed")?)?;
    buf.extend_from_slice(snapshot.seed.as_bytes());
    buf.write_f64::<BigEndian>(snapshot.timestamp_ms)?;
    buf.write_u32::<BigEndian>(snapshot.sequence)?;
    buf.write_u32::<BigEndian>(length_u32(snapshot.chunks.len(), "chunk count")?)?;

    for diff in &snapshot.chunks {
        if !diff.is_well_formed() {
            return Err(SnapshotError::InvalidEntry);
        }
        buf.write_i32::<BigEndian>(diff.cx)?;
        buf.write_i32::<BigEndian>(diff.cz)?;
        buf.write_u32::<BigEndian>(length_u32(diff.entries.len(), "entry count")?)?;
        for entry in &diff.entries {
            buf.write_u16::<BigEndian>(entry.local_index)?;
            buf.write_u8(entry.block_type)?;
        }
    }

    debug_assert_eq!(buf.len(), size);
    Ok(buf)
}

fn ensure_remaining(reader: &Cursor<&[u8]>, needed: usize) -> Result<(), SnapshotError> {
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if remaining < needed {
        Err(SnapshotError::Truncated)
    } else {
        Ok(())
    }
}

/// Decodes a snapshot.
///
/// Magic and version are checked before any other field is read. Nothing is
/// returned unless the whole buffer decodes cleanly.
///
/// # Errors
/// * `BadMagic`, `UnsupportedVersion`, `UnknownTheme` on header mismatch
/// * `Truncated` when the buffer ends early
/// * `InvalidSeed`, `InvalidEntry` on bad payload values
/// * `TrailingBytes` when data follows the last chunk record
pub fn deserialize_snapshot(bytes: &[u8]) -> Result<WorldSnapshot, SnapshotError> {
    let mut reader = Cursor::new(bytes);

    let magic = reader.read_u32::<BigEndian>()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }
    let version = reader.read_u8()?;
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let theme_index = reader.read_u8()?;
    let theme = Theme::from_index(theme_index).ok_or(SnapshotError::UnknownTheme(theme_index))?;

    let seed_len = reader.read_u32::<BigEndian>()? as usize;
    ensure_remaining(&reader, seed_len)?;
    let mut seed_bytes = vec![0u8; seed_len];
    reader.read_exact(&mut seed_bytes)?;
    let seed = String::from_utf8(seed_bytes).map_err(|_| SnapshotError::InvalidSeed)?;

    let timestamp_ms = reader.read_f64::<BigEndian>()?;
    let sequence = reader.read_u32::<BigEndian>()?;
    let chunk_count = reader.read_u32::<BigEndian>()? as usize;
    ensure_remaining(&reader, chunk_count.saturating_mul(CHUNK_HEADER_LEN))?;

    let mut chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        let cx = reader.read_i32::<BigEndian>()?;
        let cz = reader.read_i32::<BigEndian>()?;
        let entry_count = reader.read_u32::<BigEndian>()? as usize;
        ensure_remaining(&reader, entry_count.saturating_mul(ENTRY_LEN))?;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let local_index = reader.read_u16::<BigEndian>()?;
            let block_type = reader.read_u8()?;
            if local_index as usize >= CHUNK_VOLUME || BlockType::from_id(block_type).is_none() {
                return Err(SnapshotError::InvalidEntry);
            }
            entries.push(DiffEntry { local_index, block_type });
        }
        chunks.push(ChunkDiff { cx, cz, entries });
    }

    let trailing = bytes.len() - reader.position() as usize;
    if trailing > 0 {
        return Err(SnapshotError::TrailingBytes(trailing));
    }

    Ok(WorldSnapshot {
        format_version: version,
        theme,
        seed,
        timestamp_ms,
        sequence,
        chunks,
    })
}
