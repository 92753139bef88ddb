//! High-level operations: create, extract, inspect and verify polyglots.
//!
//! These tie the payload builder, writer, reader and recovery metadata
//! together.  Each takes plain option structs and a [`ProgressTracker`] and
//! returns a report; the binary is a thin layer over them.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, ArchiveKind, EntryCompression};
use crate::container::ContainerTemplate;
use crate::error::{IoContext, PolyglotError, Result};
use crate::integrity::{self, Checksum, HashAlgorithm, IntegrityStatus};
use crate::io_stream::reader::{ExtractedPayload, PolyglotReader, ReaderOptions};
use crate::io_stream::writer::{parent_dir, PolyglotFile, PolyglotWriter};
use crate::io_stream::{CancelFlag, ProgressTracker, SliceReader, DEFAULT_CHUNK_SIZE};
use crate::payload::{self, BuildOptions, PayloadInput, PayloadMode};
use crate::recovery::discover::{discover_parts, Discovery};
use crate::recovery::scanner::{self, Fallback, Signature};
use crate::recovery::{RecoveryMetadata, METADATA_VERSION};

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub mode:            PayloadMode,
    pub bypass_wrapping: bool,
    pub compression:     EntryCompression,
    /// Split into parts of at most this many payload bytes.
    pub part_size:       Option<u64>,
    pub algorithm:       HashAlgorithm,
    pub chunk_size:      usize,
    pub write_metadata:  bool,
    pub cancel:          CancelFlag,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            mode:            PayloadMode::default(),
            bypass_wrapping: false,
            compression:     EntryCompression::default(),
            part_size:       None,
            algorithm:       HashAlgorithm::default(),
            chunk_size:      DEFAULT_CHUNK_SIZE,
            write_metadata:  true,
            cancel:          CancelFlag::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateReport {
    pub outputs:       Vec<PolyglotFile>,
    pub metadata:      RecoveryMetadata,
    /// `None` when metadata writing was disabled.
    pub metadata_path: Option<PathBuf>,
}

impl CreateReport {
    pub fn payload_checksum(&self) -> &Checksum { &self.metadata.payload_checksum }
}

/// Hide `inputs` after `container`, writing `output` (or its numbered parts).
///
/// When `output` has no extension the container's extension is appended.
pub fn create(
    container: &Path,
    inputs:    &[PayloadInput],
    output:    &Path,
    opts:      &CreateOptions,
    progress:  &mut ProgressTracker<'_>,
) -> Result<CreateReport> {
    let template = ContainerTemplate::open(container)?;
    let output = resolve_output(output, &template);

    let build = BuildOptions {
        mode:            opts.mode,
        bypass_wrapping: opts.bypass_wrapping,
        compression:     opts.compression,
        staging_dir:     Some(parent_dir(&output).to_owned()),
    };
    let payload = payload::build(inputs, &build)?;
    info!(
        mode    = %opts.mode,
        bytes   = payload.total_len(),
        direct  = payload.is_direct_embed(),
        "payload ready"
    );

    let mut writer = PolyglotWriter::new(opts.chunk_size, opts.algorithm).with_cancel(opts.cancel.clone());
    let report = match opts.part_size {
        Some(size) => writer.write_split(&template, payload.path(), &output, size, progress)?,
        None       => writer.write_single(&template, payload.path(), &output, progress)?,
    };

    let metadata = RecoveryMetadata {
        version:              METADATA_VERSION,
        created_at:           Utc::now().timestamp(),
        payload_checksum:     report.payload_checksum.clone(),
        part_checksums:       match opts.part_size {
            Some(_) => report.files.iter().map(|f| f.checksum.clone()).collect(),
            None    => Vec::new(),
        },
        part_file_names:      report.files.iter().map(|f| bare_name(&f.path)).collect(),
        is_direct_embed:      payload.is_direct_embed(),
        embedded_name:        payload.embedded_name(),
        container_size_bytes: template.size(),
        payload_size_bytes:   payload.total_len(),
        part_size_bytes:      opts.part_size,
        signature:            payload.signature().map(|s| s.to_hex()),
        entries:              payload.entries().to_vec(),
    };

    let metadata_path = if opts.write_metadata {
        let path = RecoveryMetadata::path_for(&output);
        if let Err(e) = metadata.save(&path) {
            for f in &report.files {
                if let Err(rm) = std::fs::remove_file(&f.path) {
                    warn!(path = %f.path.display(), error = %rm, "could not remove output after metadata failure");
                }
            }
            return Err(e);
        }
        Some(path)
    } else {
        None
    };

    info!(
        outputs  = report.files.len(),
        checksum = %metadata.payload_checksum,
        "polyglot created"
    );
    Ok(CreateReport { outputs: report.files, metadata, metadata_path })
}

fn resolve_output(output: &Path, template: &ContainerTemplate) -> PathBuf {
    match (output.extension(), template.extension()) {
        (None, Some(ext)) => output.with_extension(ext),
        _ => output.to_owned(),
    }
}

fn bare_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

// ── Extract ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSelection {
    /// One polyglot file.
    Single(PathBuf),
    /// Parts in the given order.
    Explicit(Vec<PathBuf>),
    /// Siblings of this part; combined only when `confirmed`.
    Discover { from: PathBuf, confirmed: bool },
    /// The files listed in the recovery metadata.
    Recorded,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Recovery metadata; supplies container size, signature and checksum.
    pub metadata:   Option<PathBuf>,
    /// Overrides the metadata signature (or the ZIP default).
    pub signature:  Option<Signature>,
    pub fallback:   Fallback,
    /// Used only without metadata.
    pub algorithm:  HashAlgorithm,
    pub chunk_size: usize,
    /// Unpack the recovered ZIP payload into this directory.
    pub unpack_to:  Option<PathBuf>,
    pub cancel:     CancelFlag,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            metadata:   None,
            signature:  None,
            fallback:   Fallback::default(),
            algorithm:  HashAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            unpack_to:  None,
            cancel:     CancelFlag::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveContents {
    /// Payload parsed as ZIP; entry names in archive order.
    Entries(Vec<String>),
    /// Payload is not a ZIP archive (direct embed of another format).
    Raw,
    /// Payload starts like a ZIP archive but does not parse as one.
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub output:    PathBuf,
    pub payload:   ExtractedPayload,
    pub integrity: IntegrityStatus,
    pub contents:  ArchiveContents,
    pub unpacked:  Option<PathBuf>,
}

impl ExtractReport {
    /// The payload was written but cannot be trusted as-is.
    pub fn is_unconfirmed(&self) -> bool {
        self.integrity.is_mismatch() || self.payload.is_degraded()
    }
}

/// Recover the payload selected by `selection` into the file `dest`.
pub fn extract(
    selection: &PartSelection,
    dest:      &Path,
    opts:      &ExtractOptions,
    progress:  &mut ProgressTracker<'_>,
) -> Result<ExtractReport> {
    let metadata = opts.metadata.as_deref().map(RecoveryMetadata::load).transpose()?;

    let signature = match (&opts.signature, &metadata) {
        (Some(sig), _)   => Some(sig.clone()),
        (None, Some(m))  => m.signature()?,
        (None, None)     => Some(Signature::zip()),
    };
    let algorithm = metadata.as_ref().map(|m| m.payload_checksum.algorithm()).unwrap_or(opts.algorithm);
    let mut reader = PolyglotReader::new(ReaderOptions {
        signature,
        container_size: metadata.as_ref().map(|m| m.container_size_bytes),
        fallback:       opts.fallback,
        chunk_size:     opts.chunk_size,
        algorithm,
        cancel:         opts.cancel.clone(),
    });

    let parts = resolve_parts(selection, metadata.as_ref(), opts.metadata.as_deref())?;
    let extracted = match parts.as_slice() {
        [one] => reader.extract_single_to(one, dest, progress)?,
        many  => reader.extract_and_combine_to(many, dest, progress)?,
    };

    let integrity = IntegrityStatus::compare(
        metadata.as_ref().map(|m| &m.payload_checksum),
        extracted.checksum.clone(),
    );
    match &integrity {
        IntegrityStatus::Verified(c) => info!(checksum = %c, "payload checksum verified"),
        IntegrityStatus::Mismatch { expected, actual } => {
            warn!(%expected, %actual, "payload checksum mismatch; output must not be trusted")
        }
        IntegrityStatus::Unchecked(c) => info!(checksum = %c, "no recorded checksum to compare"),
    }

    let contents = archive_contents(dest)?;
    let unpacked = match &opts.unpack_to {
        Some(dir) => {
            if let ArchiveContents::Malformed(reason) = &contents {
                return Err(PolyglotError::MalformedPayload { path: dest.to_owned(), reason: reason.clone() });
            }
            if contents == ArchiveContents::Raw {
                return Err(PolyglotError::MalformedPayload {
                    path:   dest.to_owned(),
                    reason: "payload is not a ZIP archive".into(),
                });
            }
            let f = File::open(dest).io_context("open", dest)?;
            archive::unpack(f, dir, dest)?;
            info!(dir = %dir.display(), "payload unpacked");
            Some(dir.clone())
        }
        None => None,
    };

    Ok(ExtractReport { output: dest.to_owned(), payload: extracted, integrity, contents, unpacked })
}

fn resolve_parts(
    selection:     &PartSelection,
    metadata:      Option<&RecoveryMetadata>,
    metadata_path: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    Ok(match selection {
        PartSelection::Single(p) => vec![p.clone()],
        PartSelection::Explicit(v) if v.is_empty() => {
            return Err(PolyglotError::InvalidInput("no parts given".into()));
        }
        PartSelection::Explicit(v) => v.clone(),
        PartSelection::Discover { from, confirmed } => match discover_parts(from)? {
            Discovery::Single(p) => vec![p],
            Discovery::Candidates(v) if *confirmed => v,
            Discovery::Candidates(v) => return Err(PolyglotError::UnconfirmedParts(v)),
        },
        PartSelection::Recorded => {
            let (Some(m), Some(path)) = (metadata, metadata_path) else {
                return Err(PolyglotError::InvalidInput("recorded parts need recovery metadata".into()));
            };
            m.part_paths(parent_dir(path))
        }
    })
}

/// Classify a recovered payload file by its leading bytes.
fn archive_contents(path: &Path) -> Result<ArchiveContents> {
    if ArchiveKind::detect_file(path)? != Some(ArchiveKind::Zip) {
        return Ok(ArchiveContents::Raw);
    }
    let f = File::open(path).io_context("open", path)?;
    match archive::list_entries(f, path) {
        Ok(names) => Ok(ArchiveContents::Entries(names)),
        Err(PolyglotError::MalformedPayload { reason, .. }) => Ok(ArchiveContents::Malformed(reason)),
        Err(e) => Err(e),
    }
}

// ── Inspect ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InspectReport {
    pub path:      PathBuf,
    pub size:      u64,
    pub checksum:  Checksum,
    pub signature: Signature,
    /// First signature occurrence, if any.
    pub offset:    Option<u64>,
    /// Archive entries when the bytes from `offset` parse as ZIP.
    pub contents:  Option<ArchiveContents>,
}

/// Report what a single file looks like without extracting anything.
pub fn inspect(path: &Path, signature: &Signature, algorithm: HashAlgorithm) -> Result<InspectReport> {
    if !path.exists() {
        return Err(PolyglotError::InputNotFound(path.to_owned()));
    }
    let size = std::fs::metadata(path).io_context("stat", path)?.len();
    let checksum = integrity::digest_file(algorithm, path)?;
    let offset = scanner::scan_file(path, signature)?.offset();

    let contents = match offset {
        Some(o) if signature.as_bytes().starts_with(b"PK") => {
            let f = File::open(path).io_context("open", path)?;
            let window = SliceReader::new(f, o, size - o).io_context("seek", path)?;
            Some(match archive::list_entries(window, path) {
                Ok(names) => ArchiveContents::Entries(names),
                Err(PolyglotError::MalformedPayload { reason, .. }) => ArchiveContents::Malformed(reason),
                Err(e) => return Err(e),
            })
        }
        Some(_) => Some(ArchiveContents::Raw),
        None    => None,
    };

    Ok(InspectReport { path: path.to_owned(), size, checksum, signature: signature.clone(), offset, contents })
}

// ── Verify parts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartStatus {
    Checked(IntegrityStatus),
    Missing,
    /// Shorter than the recorded container size.
    Truncated { len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCheck {
    pub path:   PathBuf,
    pub status: PartStatus,
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub metadata: RecoveryMetadata,
    pub parts:    Vec<PartCheck>,
}

impl VerifyReport {
    pub fn all_verified(&self) -> bool {
        self.parts
            .iter()
            .all(|p| matches!(&p.status, PartStatus::Checked(s) if s.is_verified()))
    }
}

/// Re-hash every output listed in the metadata at `metadata_path` without
/// reconstructing the payload.  Part slices start at the recorded container
/// size.  Single outputs are checked against the payload checksum.
pub fn verify_parts(metadata_path: &Path, chunk_size: usize) -> Result<VerifyReport> {
    let metadata = RecoveryMetadata::load(metadata_path)?;
    let container = metadata.container_size_bytes;
    let paths = metadata.part_paths(parent_dir(metadata_path));

    let mut parts = Vec::with_capacity(paths.len());
    for (i, path) in paths.into_iter().enumerate() {
        let expected = if metadata.is_split() {
            &metadata.part_checksums[i]
        } else {
            &metadata.payload_checksum
        };
        let status = if !path.is_file() {
            PartStatus::Missing
        } else {
            let len = std::fs::metadata(&path).io_context("stat", &path)?.len();
            if len < container {
                PartStatus::Truncated { len }
            } else {
                let f = File::open(&path).io_context("open", &path)?;
                let mut window = SliceReader::new(f, container, len - container).io_context("seek", &path)?;
                let actual = integrity::digest_reader(expected.algorithm(), &mut window, chunk_size)
                    .io_context("read", &path)?;
                PartStatus::Checked(IntegrityStatus::compare(Some(expected), actual))
            }
        };
        match &status {
            PartStatus::Checked(s) if s.is_verified() => info!(path = %path.display(), "part verified"),
            other => warn!(path = %path.display(), status = ?other, "part failed verification"),
        }
        parts.push(PartCheck { path, status });
    }
    Ok(VerifyReport { metadata, parts })
}
