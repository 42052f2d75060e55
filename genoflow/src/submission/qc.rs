//! Per-file quality-control report for uploads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::core::{InputKind, JobInputs};

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of the upload checks for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcStatus {
    /// Stored with content.
    Uploaded,
    /// Stored, but zero bytes long.
    Empty,
}

/// Quality-control facts about one stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQc {
    /// Sanitised file name.
    pub file_name: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Hex-encoded SHA-256, when it was computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Check outcome.
    pub status: QcStatus,
}

/// QC facts keyed by part name.
pub type QcReport = BTreeMap<InputKind, FileQc>;

/// Builds the QC report for stored inputs.
#[must_use]
pub fn qc_report(inputs: &JobInputs) -> QcReport {
    inputs
        .iter()
        .map(|(kind, file)| {
            let status = if file.size_bytes == 0 {
                QcStatus::Empty
            } else {
                QcStatus::Uploaded
            };
            (
                *kind,
                FileQc {
                    file_name: file.file_name.clone(),
                    file_size: file.size_bytes,
                    sha256: file.sha256.clone(),
                    status,
                },
            )
        })
        .collect()
}

/// Incremental size and SHA-256 over streamed upload chunks.
#[derive(Clone, Default)]
pub struct UploadDigest {
    hasher: Sha256,
    size: u64,
}

impl std::fmt::Debug for UploadDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadDigest")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl UploadDigest {
    /// Starts an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes seen so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the total size and the hex digest.
    #[must_use]
    pub fn finish(self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

/// Size and SHA-256 of a file already on disk.
pub async fn digest_file(path: impl AsRef<Path>) -> std::io::Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = UploadDigest::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finish())
}
