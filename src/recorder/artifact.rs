//! Finalized incident output and content hashing.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const HASH_CHUNK_BYTES: usize = 8192;

/// Immutable record of one finalized incident video.
///
/// Only built after the file is fully written and hashed.
#[derive(Clone, Debug, Serialize)]
pub struct IncidentArtifact {
    pub path: PathBuf,
    /// `0x`-prefixed lowercase hex SHA-256 of the file as written.
    pub content_hash: String,
    pub frame_count: usize,
    pub pre_roll_frames: usize,
    /// `frame_count / fps`, in seconds.
    pub duration_secs: f64,
    pub camera_id: String,
    pub label: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 over the file contents, streamed in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; HASH_CHUNK_BYTES];
    loop {
        let read = file
            .read(&mut chunk)
            .with_context(|| format!("read {} for hashing", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

/// Labels become part of a file name; keep `[A-Za-z0-9_-]`.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "incident".to_string()
    } else {
        cleaned
    }
}

/// `<dir>/<label>_<YYYYmmdd_HHMMSS>.<ext>`, with a `_N` suffix when taken.
pub fn artifact_path(dir: &Path, label: &str, at: DateTime<Local>, extension: &str) -> PathBuf {
    let stem = format!("{}_{}", sanitize_label(label), at.format("%Y%m%d_%H%M%S"));
    let mut candidate = dir.join(format!("{}.{}", stem, extension));
    let mut n = 1;
    while candidate.exists() || partial_path(&candidate).exists() {
        candidate = dir.join(format!("{}_{}.{}", stem, n, extension));
        n += 1;
    }
    candidate
}

/// Scratch name used while the encoder is still writing.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}
