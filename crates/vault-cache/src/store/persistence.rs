//! Record store persistence - snapshot read/write operations.
//!
//! The snapshot is a postcard-encoded header followed by the record list,
//! compressed with zstd. Writes go to a temporary file in the destination
//! directory that is renamed over the previous snapshot, so readers never
//! observe a partially written file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use super::record::FileRecord;
use crate::error::{CacheError, Result};
use crate::types::unix_now_secs;

/// Snapshot format version - increment when `FileRecord` changes shape or
/// derivation rules change. A mismatch discards the snapshot so every
/// document is derived again once.
pub const RECORD_STORE_VERSION: u32 = 1;

/// File name of the snapshot inside the cache directory.
pub const SNAPSHOT_FILENAME: &str = "records.bin.zst";

const SNAPSHOT_ZSTD_LEVEL: i32 = 6;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    saved_at: u64,
    record_count: u64,
}

/// Records recovered from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub records: FnvHashMap<String, FileRecord>,
    pub saved_at: u64,
}

/// Writes all records to `path` atomically.
pub fn write_snapshot(path: &Path, records: &FnvHashMap<String, FileRecord>) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|error| {
        CacheError::snapshot(
            path,
            format!("failed to create cache directory {}: {error}", parent.display()),
        )
    })?;

    let mut entries: Vec<(&str, &FileRecord)> = records
        .iter()
        .map(|(path, record)| (path.as_str(), record))
        .collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let header = SnapshotHeader {
        version: RECORD_STORE_VERSION,
        saved_at: unix_now_secs(),
        record_count: entries.len() as u64,
    };

    let temp = tempfile::NamedTempFile::new_in(parent).map_err(|error| {
        CacheError::snapshot(path, format!("failed to create temp file: {error}"))
    })?;

    {
        let encoder = zstd::Encoder::new(BufWriter::new(temp.as_file()), SNAPSHOT_ZSTD_LEVEL)
            .map_err(|error| {
                CacheError::snapshot(path, format!("failed to create zstd encoder: {error}"))
            })?;
        let encoder = postcard::to_io(&header, encoder).map_err(|error| {
            CacheError::snapshot(path, format!("failed to encode header: {error}"))
        })?;
        let encoder = postcard::to_io(&entries, encoder).map_err(|error| {
            CacheError::snapshot(path, format!("failed to encode records: {error}"))
        })?;
        let mut output = encoder.finish().map_err(|error| {
            CacheError::snapshot(path, format!("failed to finish zstd stream: {error}"))
        })?;
        output.flush()?;
    }
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|error| {
        CacheError::snapshot(path, format!("failed to finalize snapshot: {}", error.error))
    })?;

    tracing::debug!(
        "wrote record snapshot to {} ({} records)",
        path.display(),
        header.record_count
    );
    Ok(())
}

/// Loads the snapshot at `path`.
///
/// Returns `Ok(None)` when there is no snapshot or it was written by a
/// different format version, and an error when the file exists but cannot
/// be decoded.
pub fn load_snapshot(path: &Path) -> Result<Option<LoadedSnapshot>> {
    let input = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    let bytes = {
        let _span = tracing::info_span!("snapshot_decompress", path = %path.display()).entered();
        zstd::decode_all(BufReader::new(input)).map_err(|error| {
            CacheError::snapshot(path, format!("failed to decompress snapshot: {error}"))
        })?
    };

    let (header, rest): (SnapshotHeader, &[u8]) =
        postcard::take_from_bytes(&bytes).map_err(|error| {
            CacheError::snapshot(path, format!("failed to decode header: {error}"))
        })?;

    if header.version != RECORD_STORE_VERSION {
        tracing::debug!(
            "record snapshot version mismatch: {} != {}",
            header.version,
            RECORD_STORE_VERSION
        );
        return Ok(None);
    }

    let entries: Vec<(String, FileRecord)> = {
        let _span = tracing::info_span!("snapshot_decode", path = %path.display()).entered();
        postcard::from_bytes(rest).map_err(|error| {
            CacheError::snapshot(path, format!("failed to decode records: {error}"))
        })?
    };

    if entries.len() as u64 != header.record_count {
        return Err(CacheError::snapshot(
            path,
            format!(
                "record count mismatch: header {} != decoded {}",
                header.record_count,
                entries.len()
            ),
        ));
    }

    tracing::debug!(
        "loaded record snapshot from {} ({} records)",
        path.display(),
        entries.len()
    );

    Ok(Some(LoadedSnapshot {
        records: entries.into_iter().collect(),
        saved_at: header.saved_at,
    }))
}
