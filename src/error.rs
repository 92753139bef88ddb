use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolyglotError {
    // ── Caller input ─────────────────────────────────────────────────────────
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Directory contains no files: {}", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("Payload is empty: {}", .0.display())]
    EmptyPayload(PathBuf),

    #[error("Invalid part size: {0}. Must be at least 1 byte")]
    InvalidPartSize(u64),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Duplicate archive entry name: {0}")]
    DuplicateEntry(String),

    #[error("Not a recognised archive (no known signature at offset 0): {}", .0.display())]
    NotAnArchive(PathBuf),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Output would overwrite an input file: {}", .0.display())]
    OutputOverlapsInput(PathBuf),

    // ── Environment ──────────────────────────────────────────────────────────
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op:     &'static str,
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    // ── Extraction ───────────────────────────────────────────────────────────
    #[error("No payload signature found in {}", .0.display())]
    NoPayloadSignature(PathBuf),

    #[error("Malformed payload in {}: {reason}", path.display())]
    MalformedPayload { path: PathBuf, reason: String },

    #[error("Found {} candidate parts; confirm the set or pass an explicit part list", .0.len())]
    UnconfirmedParts(Vec<PathBuf>),

    #[error("Part {number} of {base} is missing")]
    MissingPart { base: String, number: usize },

    #[error("Part {} is {len} bytes, shorter than the {container_size}-byte container prefix", path.display())]
    TruncatedPart { path: PathBuf, len: u64, container_size: u64 },

    // ── Metadata ─────────────────────────────────────────────────────────────
    #[error("Recovery metadata error in {}: {source}", path.display())]
    Metadata {
        path:   PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Inconsistent recovery metadata: {0}")]
    InconsistentMetadata(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PolyglotError {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        PolyglotError::Io { op, path: path.as_ref().to_owned(), source }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PolyglotError::InvalidInput(_)
                | PolyglotError::InputNotFound(_)
                | PolyglotError::EmptyDirectory(_)
                | PolyglotError::EmptyPayload(_)
                | PolyglotError::InvalidPartSize(_)
                | PolyglotError::UnknownMode(_)
                | PolyglotError::DuplicateEntry(_)
                | PolyglotError::NotAnArchive(_)
                | PolyglotError::InvalidSignature(_)
                | PolyglotError::UnsupportedAlgorithm(_)
                | PolyglotError::InvalidSize(_)
                | PolyglotError::OutputOverlapsInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PolyglotError>;

/// Attach the failed operation and path to a raw `io::Result`.
pub trait IoContext<T> {
    fn io_context(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| PolyglotError::io(op, path, e))
    }
}
