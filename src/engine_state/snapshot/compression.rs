//! Gzip wrapping for encoded snapshots, the form handed to the save service.

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::error::SnapshotError;

use super::{codec, WorldSnapshot, MAX_SNAPSHOT_BYTES};

/// Encodes and gzips a snapshot.
pub fn compress_snapshot(snapshot: &WorldSnapshot) -> Result<Vec<u8>, SnapshotError> {
    let raw = codec::serialize_snapshot(snapshot)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::default());
    encoder.write_all(&raw).map_err(SnapshotError::Compression)?;
    encoder.finish().map_err(SnapshotError::Compression)
}

/// Gunzips and decodes a snapshot.
///
/// Inflation stops at [`MAX_SNAPSHOT_BYTES`]; anything larger is rejected
/// as `TooLarge`.
pub fn decompress_snapshot(bytes: &[u8]) -> Result<WorldSnapshot, SnapshotError> {
    decompress_with_limit(bytes, MAX_SNAPSHOT_BYTES)
}

fn decompress_with_limit(bytes: &[u8], limit: usize) -> Result<WorldSnapshot, SnapshotError> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(SnapshotError::Compression)?;
    if raw.len() > limit {
        return Err(SnapshotError::TooLarge("decompressed snapshot"));
    }
    codec::deserialize_snapshot(&raw)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::engine_state::voxels::{
        chunk::{ChunkDiff, DiffEntry},
        generation::Theme,
    };

    #[test]
    fn compressed_snapshot_round_trips() {
        let entries = (0..4096u16)
            .map(|local_index| DiffEntry {
                local_index,
                block_type: 3,
            })
            .collect();
        let snapshot = WorldSnapshot::new(Theme::Snow, "frost", 9.0, 3, vec![ChunkDiff { cx: 2, cz: -2, entries }]);
        let packed = compress_snapshot(&snapshot).unwrap();
        assert!(packed.len() < codec::serialized_len(&snapshot));
        assert_eq!(decompress_snapshot(&packed).unwrap(), snapshot);
    }

    #[test]
    fn inflation_is_capped() {
        let entries = (0..4096u16)
            .map(|local_index| DiffEntry {
                local_index,
                block_type: 1,
            })
            .collect();
        let snapshot = WorldSnapshot::new(Theme::Forest, "big", 0.0, 0, vec![ChunkDiff { cx: 0, cz: 0, entries }]);
        let packed = compress_snapshot(&snapshot).unwrap();
        let raw_len = codec::serialized_len(&snapshot);

        assert_matches!(
            decompress_with_limit(&packed, raw_len - 1),
            Err(SnapshotError::TooLarge(_))
        );
        assert_eq!(decompress_with_limit(&packed, raw_len).unwrap(), snapshot);
    }

    #[test]
    fn garbage_is_a_compression_error() {
        assert_matches!(decompress_snapshot(b"not gzip"), Err(SnapshotError::Compression(_)));
    }
}
