//! Run identifiers and submitted job inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh random 128-bit run id.
    #[must_use]
    pub fn new() -> Self {
        Self(crate::utils::generate_uuid())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for RunId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Whether an input part carries a genome or a transcriptome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputCategory {
    /// Assemblies and annotations.
    Genome,
    /// RNA-Seq reads or count tables.
    Transcriptome,
}

impl InputCategory {
    /// File extensions accepted for this category.
    #[must_use]
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Genome => &["fasta", "fa", "gff", "gtf"],
            Self::Transcriptome => &["fastq", "fq", "csv", "tsv"],
        }
    }
}

/// The named parts a job submission may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    /// Host organism genome.
    HostGenome,
    /// Parasite organism genome.
    ParasiteGenome,
    /// Host RNA-Seq data.
    HostTranscriptome,
    /// Parasite RNA-Seq data.
    ParasiteTranscriptome,
}

impl InputKind {
    /// Every kind, in submission order.
    pub const ALL: [Self; 4] = [
        Self::HostGenome,
        Self::ParasiteGenome,
        Self::HostTranscriptome,
        Self::ParasiteTranscriptome,
    ];

    /// The multipart field name.
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::HostGenome => "hostGenome",
            Self::ParasiteGenome => "parasiteGenome",
            Self::HostTranscriptome => "hostTranscriptome",
            Self::ParasiteTranscriptome => "parasiteTranscriptome",
        }
    }

    /// Looks up a kind by its multipart field name.
    #[must_use]
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.field_name() == name)
    }

    /// The category that determines accepted extensions.
    #[must_use]
    pub fn category(&self) -> InputCategory {
        match self {
            Self::HostGenome | Self::ParasiteGenome => InputCategory::Genome,
            Self::HostTranscriptome | Self::ParasiteTranscriptome => InputCategory::Transcriptome,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// A stored upload referenced by handle, never by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    /// Sanitised original file name.
    pub file_name: String,
    /// Where the upload is stored (path or URI).
    pub location: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the content, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl InputFile {
    /// Creates a file reference.
    #[must_use]
    pub fn new(file_name: impl Into<String>, location: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            location: location.into(),
            size_bytes,
            sha256: None,
        }
    }

    /// Attaches a content digest.
    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// Lower-cased extension of the file name, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.file_name)
    }
}

/// Returns the lower-cased extension of a file name.
#[must_use]
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// The validated files of one job submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobInputs {
    files: BTreeMap<InputKind, InputFile>,
}

impl JobInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file for the given kind.
    #[must_use]
    pub fn with_file(mut self, kind: InputKind, file: InputFile) -> Self {
        self.files.insert(kind, file);
        self
    }

    /// Inserts a file, replacing any previous one of the same kind.
    pub fn insert(&mut self, kind: InputKind, file: InputFile) {
        self.files.insert(kind, file);
    }

    /// Returns the file of the given kind.
    #[must_use]
    pub fn get(&self, kind: InputKind) -> Option<&InputFile> {
        self.files.get(&kind)
    }

    /// Resolves an input key (a field name) to a stored location.
    #[must_use]
    pub fn location_of(&self, key: &str) -> Option<&str> {
        InputKind::from_field_name(key)
            .and_then(|kind| self.files.get(&kind))
            .map(|f| f.location.as_str())
    }

    /// Iterates over the submitted files.
    pub fn iter(&self) -> impl Iterator<Item = (&InputKind, &InputFile)> {
        self.files.iter()
    }

    /// Number of submitted files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing was submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
