pub mod discover;
pub mod scanner;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, PolyglotError, Result};
use crate::integrity::Checksum;
use crate::io_stream::writer::{persist, staging_file};
use crate::recovery::scanner::Signature;

pub const METADATA_VERSION: u32 = 1;

/// Appended to the output stem to name the metadata file.
pub const METADATA_SUFFIX: &str = "_recovery.json";

/// Everything an extraction run needs to rebuild a payload without
/// re-deriving any value.  Written once after a successful create.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecoveryMetadata {
    pub version:              u32,
    /// Unix seconds, UTC.
    pub created_at:           i64,
    pub payload_checksum:     Checksum,
    /// One per part in part order; empty for single-file outputs.
    pub part_checksums:       Vec<Checksum>,
    /// Bare file names, resolved against the metadata file's directory.
    pub part_file_names:      Vec<String>,
    pub is_direct_embed:      bool,
    pub embedded_name:        String,
    pub container_size_bytes: u64,
    pub payload_size_bytes:   u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size_bytes:      Option<u64>,
    /// Hex payload signature, if the payload format has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature:            Option<String>,
    /// Names of the files wrapped into the payload archive.
    #[serde(default)]
    pub entries:              Vec<String>,
}

impl RecoveryMetadata {
    pub fn is_split(&self) -> bool { !self.part_checksums.is_empty() }

    pub fn signature(&self) -> Result<Option<Signature>> {
        self.signature.as_deref().map(Signature::from_hex).transpose()
    }

    /// Output files in part order, resolved against `dir`.
    pub fn part_paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.part_file_names.iter().map(|n| dir.join(n)).collect()
    }

    /// Check the invariants tying counts, sizes and names together.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(PolyglotError::InconsistentMetadata(msg));

        if self.version == 0 || self.version > METADATA_VERSION {
            return bad(format!("unsupported version {}", self.version));
        }
        if self.payload_size_bytes == 0 {
            return bad("payload size is zero".into());
        }
        if self.part_file_names.is_empty() {
            return bad("no output files listed".into());
        }
        for name in &self.part_file_names {
            let p = Path::new(name);
            if name.is_empty() || p.file_name().map(|f| f != p.as_os_str()).unwrap_or(true) {
                return bad(format!("file name {name:?} is not a bare file name"));
            }
        }
        if self.is_split() {
            if self.part_checksums.len() != self.part_file_names.len() {
                return bad(format!(
                    "{} part checksums for {} part files",
                    self.part_checksums.len(),
                    self.part_file_names.len()
                ));
            }
            if let Some(size) = self.part_size_bytes {
                let expected = self.payload_size_bytes.div_ceil(size.max(1));
                if size == 0 || expected != self.part_checksums.len() as u64 {
                    return bad(format!(
                        "{} parts recorded, {expected} expected for part size {size}",
                        self.part_checksums.len()
                    ));
                }
            }
            let alg = self.payload_checksum.algorithm();
            if let Some(c) = self.part_checksums.iter().find(|c| c.algorithm() != alg) {
                return bad(format!("part checksum {c} does not use {alg}"));
            }
        } else if self.part_file_names.len() != 1 {
            return bad(format!("single output lists {} files", self.part_file_names.len()));
        }
        self.signature()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Write pretty JSON to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self
            .to_bytes()
            .map_err(|source| PolyglotError::Metadata { path: path.to_owned(), source })?;
        let mut tmp = staging_file(path)?;
        tmp.write_all(&bytes).io_context("write", path)?;
        tmp.write_all(b"\n").io_context("write", path)?;
        persist(tmp.into_temp_path(), path)?;
        Ok(())
    }

    /// Read, parse and validate.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PolyglotError::InputNotFound(path.to_owned()));
        }
        let bytes = std::fs::read(path).io_context("read", path)?;
        let meta = Self::from_bytes(&bytes)
            .map_err(|source| PolyglotError::Metadata { path: path.to_owned(), source })?;
        meta.validate()?;
        Ok(meta)
    }

    /// `dir/stem.ext` → `dir/stem_recovery.json`.
    pub fn path_for(output: &Path) -> PathBuf {
        let stem = output.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        output.with_file_name(format!("{stem}{METADATA_SUFFIX}"))
    }
}
