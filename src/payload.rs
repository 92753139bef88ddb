//! Payload builder: decide what bytes get hidden and how long they are.
//!
//! Inputs are either wrapped into a ZIP archive staged in a temporary file
//! (`Packed`) or used verbatim (`Direct`).  Either way the payload is a file
//! on disk with a known length before any output is written, so split
//! planning and streaming never need the payload in memory.
//!
//! All input validation happens here, before an output file exists.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::{self, ArchiveKind, EntryCompression, PackEntry};
use crate::error::{IoContext, PolyglotError, Result};
use crate::recovery::scanner::Signature;

/// Archive name recorded for packed payloads holding more than one entry.
pub const DEFAULT_ARCHIVE_NAME: &str = "hidden_archive.zip";

// ── Mode ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadMode {
    /// One file; wrapped unless it already is an archive and wrapping is bypassed.
    #[default]
    SingleFile,
    /// Directories (recursive) and/or several files, always wrapped.
    FolderOrMultiple,
    /// An existing archive, embedded unchanged; must carry a known signature.
    ExistingArchive,
    /// Any file embedded unchanged.
    DirectEmbedArchive,
}

impl PayloadMode {
    pub fn name(self) -> &'static str {
        match self {
            PayloadMode::SingleFile         => "single",
            PayloadMode::FolderOrMultiple   => "folder",
            PayloadMode::ExistingArchive    => "archive",
            PayloadMode::DirectEmbedArchive => "direct",
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PayloadMode {
    type Err = PolyglotError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "single" | "file"              => Ok(Self::SingleFile),
            "folder" | "multiple" | "dir"  => Ok(Self::FolderOrMultiple),
            "archive" | "existing"         => Ok(Self::ExistingArchive),
            "direct"                       => Ok(Self::DirectEmbedArchive),
            _ => Err(PolyglotError::UnknownMode(s.to_owned())),
        }
    }
}

// ── Inputs & options ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadInput {
    pub path:       PathBuf,
    /// Name inside the archive; defaults to the file name.
    pub entry_name: Option<String>,
}

impl PayloadInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entry_name: None }
    }

    pub fn named(path: impl Into<PathBuf>, entry_name: impl Into<String>) -> Self {
        Self { path: path.into(), entry_name: Some(entry_name.into()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode:            PayloadMode,
    /// In `SingleFile` mode, embed files with a known archive extension as-is.
    pub bypass_wrapping: bool,
    pub compression:     EntryCompression,
    /// Where the staged archive is written; system temp dir when `None`.
    pub staging_dir:     Option<PathBuf>,
}

// ── PayloadSource ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DirectPayload {
    pub path: PathBuf,
    pub len:  u64,
    pub kind: Option<ArchiveKind>,
}

/// Archive staged in a temporary file, deleted when this value drops.
#[derive(Debug)]
pub struct PackedPayload {
    staged:      NamedTempFile,
    pub len:     u64,
    pub entries: Vec<String>,
    pub name:    String,
}

#[derive(Debug)]
pub enum PayloadSource {
    Direct(DirectPayload),
    Packed(PackedPayload),
}

impl PayloadSource {
    pub fn total_len(&self) -> u64 {
        match self {
            PayloadSource::Direct(d) => d.len,
            PayloadSource::Packed(p) => p.len,
        }
    }

    /// File holding the payload bytes.
    pub fn path(&self) -> &Path {
        match self {
            PayloadSource::Direct(d) => &d.path,
            PayloadSource::Packed(p) => p.staged.path(),
        }
    }

    pub fn open(&self) -> Result<File> {
        File::open(self.path()).io_context("open", self.path())
    }

    pub fn is_direct_embed(&self) -> bool {
        matches!(self, PayloadSource::Direct(_))
    }

    pub fn kind(&self) -> Option<ArchiveKind> {
        match self {
            PayloadSource::Direct(d) => d.kind,
            PayloadSource::Packed(_) => Some(ArchiveKind::Zip),
        }
    }

    /// Signature marking the payload start, when the format has one.
    pub fn signature(&self) -> Option<Signature> {
        self.kind().and_then(|k| Signature::new(k.signature().to_vec()).ok())
    }

    /// Archive file name for direct payloads, the sole entry name or
    /// [`DEFAULT_ARCHIVE_NAME`] for packed ones.
    pub fn embedded_name(&self) -> String {
        match self {
            PayloadSource::Direct(d) => d
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            PayloadSource::Packed(p) => p.name.clone(),
        }
    }

    /// Entry names wrapped into a packed payload (empty for direct ones).
    pub fn entries(&self) -> &[String] {
        match self {
            PayloadSource::Direct(_) => &[],
            PayloadSource::Packed(p) => &p.entries,
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub fn build(inputs: &[PayloadInput], opts: &BuildOptions) -> Result<PayloadSource> {
    if inputs.is_empty() {
        return Err(PolyglotError::InvalidInput("no payload inputs given".into()));
    }
    for input in inputs {
        if !input.path.exists() {
            return Err(PolyglotError::InputNotFound(input.path.clone()));
        }
    }

    match opts.mode {
        PayloadMode::SingleFile => {
            let input = single_file(inputs, opts.mode)?;
            if opts.bypass_wrapping {
                if let Some(kind) = ArchiveKind::from_extension(&input.path) {
                    info!(path = %input.path.display(), %kind, "embedding archive without re-wrapping");
                    return direct(&input.path, Some(kind));
                }
            }
            let name = input.entry_name.clone().unwrap_or_else(|| file_name(&input.path));
            pack_entries(vec![PackEntry::new(&input.path, name)], opts)
        }
        PayloadMode::FolderOrMultiple => {
            let mut entries = Vec::new();
            for input in inputs {
                if input.path.is_dir() {
                    entries.extend(collect_dir_entries(&input.path)?);
                } else {
                    let name = input.entry_name.clone().unwrap_or_else(|| file_name(&input.path));
                    entries.push(PackEntry::new(&input.path, name));
                }
            }
            pack_entries(entries, opts)
        }
        PayloadMode::ExistingArchive => {
            let input = single_file(inputs, opts.mode)?;
            match ArchiveKind::detect_file(&input.path)? {
                Some(kind) => direct(&input.path, Some(kind)),
                None => {
                    if std::fs::metadata(&input.path).io_context("stat", &input.path)?.len() == 0 {
                        return Err(PolyglotError::EmptyPayload(input.path.clone()));
                    }
                    Err(PolyglotError::NotAnArchive(input.path.clone()))
                }
            }
        }
        PayloadMode::DirectEmbedArchive => {
            let input = single_file(inputs, opts.mode)?;
            let kind = match ArchiveKind::detect_file(&input.path)? {
                Some(k) => Some(k),
                None    => ArchiveKind::from_extension(&input.path),
            };
            direct(&input.path, kind)
        }
    }
}

/// Every regular file under `root` (recursive, sorted), named by its path
/// relative to `root` with `/` separators on every platform.
pub fn collect_dir_entries(root: &Path) -> Result<Vec<PackEntry>> {
    let mut entries = Vec::new();
    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_owned());
            PolyglotError::io("walk directory", path, e.into())
        })?;
        if !item.file_type().is_file() {
            continue;
        }
        let rel = item.path().strip_prefix(root).unwrap_or(item.path());
        entries.push(PackEntry::new(item.path(), relative_name(rel)));
    }
    if entries.is_empty() {
        return Err(PolyglotError::EmptyDirectory(root.to_owned()));
    }
    debug!(root = %root.display(), files = entries.len(), "collected directory");
    Ok(entries)
}

fn relative_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn single_file(inputs: &[PayloadInput], mode: PayloadMode) -> Result<&PayloadInput> {
    if inputs.len() != 1 {
        return Err(PolyglotError::InvalidInput(format!(
            "{mode} mode takes exactly one input, got {}",
            inputs.len()
        )));
    }
    let input = &inputs[0];
    if !input.path.is_file() {
        return Err(PolyglotError::InvalidInput(format!(
            "{mode} mode needs a file, {} is not one",
            input.path.display()
        )));
    }
    Ok(input)
}

fn direct(path: &Path, kind: Option<ArchiveKind>) -> Result<PayloadSource> {
    let len = std::fs::metadata(path).io_context("stat", path)?.len();
    if len == 0 {
        return Err(PolyglotError::EmptyPayload(path.to_owned()));
    }
    Ok(PayloadSource::Direct(DirectPayload { path: path.to_owned(), len, kind }))
}

fn pack_entries(entries: Vec<PackEntry>, opts: &BuildOptions) -> Result<PayloadSource> {
    archive::check_unique(&entries)?;

    let dir = opts.staging_dir.clone().unwrap_or_else(std::env::temp_dir);
    let mut staged = tempfile::Builder::new()
        .prefix(".polyglot-payload-")
        .suffix(".zip")
        .tempfile_in(&dir)
        .io_context("create staging file", &dir)?;
    let staged_path = staged.path().to_owned();

    let file = archive::pack(&entries, staged.as_file_mut(), opts.compression, &staged_path)?;
    file.flush().io_context("flush", &staged_path)?;
    let len = staged.as_file().metadata().io_context("stat", &staged_path)?.len();

    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
    let name = match names.as_slice() {
        [only] => only.clone(),
        _      => DEFAULT_ARCHIVE_NAME.to_owned(),
    };
    info!(entries = names.len(), bytes = len, "staged packed payload");
    Ok(PayloadSource::Packed(PackedPayload { staged, len, entries: names, name }))
}
