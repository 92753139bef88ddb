//! Archive collaborator: wrap files into a ZIP payload and read one back.
//!
//! ```no_run
//! use polyglot::archive::{pack, list_entries, EntryCompression, PackEntry};
//!
//! let entries = vec![PackEntry::new("notes/readme.txt", "readme.txt")];
//! let file = std::fs::File::create("payload.zip")?;
//! pack(&entries, file, EntryCompression::Deflated, "payload.zip".as_ref())?;
//!
//! let names = list_entries(std::fs::File::open("payload.zip")?, "payload.zip".as_ref())?;
//! assert_eq!(names, ["readme.txt"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only ZIP is produced and parsed here.  7z and RAR files are recognised by
//! extension and signature so they can be embedded verbatim, but their
//! contents are never read.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{IoContext, PolyglotError, Result};

// ── ArchiveKind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 3] = [ArchiveKind::Zip, ArchiveKind::SevenZip, ArchiveKind::Rar];

    pub fn name(self) -> &'static str {
        match self {
            ArchiveKind::Zip      => "zip",
            ArchiveKind::SevenZip => "7z",
            ArchiveKind::Rar      => "rar",
        }
    }

    /// Magic bytes at the start of an archive of this kind.
    pub fn signature(self) -> &'static [u8] {
        match self {
            ArchiveKind::Zip      => b"PK\x03\x04",
            ArchiveKind::SevenZip => &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
            ArchiveKind::Rar      => b"Rar!\x1A\x07",
        }
    }

    /// Whether this crate can list and unpack the format.
    pub fn is_readable(self) -> bool { self == ArchiveKind::Zip }

    /// Look up the kind from a file extension (case-insensitive).
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Self::ALL.into_iter().find(|k| k.name() == ext)
    }

    /// Identify an archive from its leading bytes.
    pub fn detect(header: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|k| header.starts_with(k.signature()))
    }

    pub fn detect_file(path: &Path) -> Result<Option<Self>> {
        let mut f = File::open(path).io_context("open", path)?;
        let mut header = Vec::with_capacity(8);
        (&mut f).take(8).read_to_end(&mut header).io_context("read", path)?;
        Ok(Self::detect(&header))
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Packing ───────────────────────────────────────────────────────────────────

/// One file to wrap: where it is on disk and what it is called inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub source: PathBuf,
    pub name:   String,
}

impl PackEntry {
    pub fn new(source: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { source: source.into(), name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryCompression {
    /// No compression; best for already-compressed media.
    Stored,
    #[default]
    Deflated,
}

impl FromStr for EntryCompression {
    type Err = PolyglotError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "store" | "stored"     => Ok(Self::Stored),
            "deflate" | "deflated" => Ok(Self::Deflated),
            _ => Err(PolyglotError::UnsupportedAlgorithm(format!("compression: {s}"))),
        }
    }
}

impl From<EntryCompression> for CompressionMethod {
    fn from(c: EntryCompression) -> Self {
        match c {
            EntryCompression::Stored   => CompressionMethod::Stored,
            EntryCompression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Reject entry lists that would produce two entries with the same name.
pub fn check_unique(entries: &[PackEntry]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for e in entries {
        if !seen.insert(e.name.as_str()) {
            return Err(PolyglotError::DuplicateEntry(e.name.clone()));
        }
    }
    Ok(())
}

/// Write `entries` as a ZIP archive into `out`, in order, streaming each
/// source file.  Returns the writer after the central directory is written.
/// `label` names the destination in error messages.
pub fn pack<W: Write + Seek>(
    entries:     &[PackEntry],
    out:         W,
    compression: EntryCompression,
    label:       &Path,
) -> Result<W> {
    check_unique(entries)?;

    let mut zip = ZipWriter::new(out);
    for entry in entries {
        let mut src = File::open(&entry.source).io_context("open", &entry.source)?;
        let len = src.metadata().io_context("stat", &entry.source)?.len();
        let options = SimpleFileOptions::default()
            .compression_method(compression.into())
            .large_file(len >= u32::MAX as u64);

        zip.start_file(entry.name.as_str(), options)
            .map_err(|e| zip_io("pack", &entry.source, e))?;
        io::copy(&mut src, &mut zip).io_context("pack", &entry.source)?;
        debug!(name = %entry.name, bytes = len, "packed entry");
    }
    zip.finish().map_err(|e| zip_io("finish archive", label, e))
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Entry names in central-directory order.  `label` names the payload in
/// error messages.
pub fn list_entries<R: Read + Seek>(reader: R, label: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(reader).map_err(|e| malformed(label, e))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| malformed(label, e))?;
        names.push(entry.name().to_owned());
    }
    Ok(names)
}

/// Extract every entry into `dest` (created if missing).  Entry paths that
/// would escape `dest` are rejected by the ZIP reader.
pub fn unpack<R: Read + Seek>(reader: R, dest: &Path, label: &Path) -> Result<Vec<String>> {
    std::fs::create_dir_all(dest).io_context("create directory", dest)?;
    let mut archive = ZipArchive::new(reader).map_err(|e| malformed(label, e))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index_raw(i).map_err(|e| malformed(label, e))?.name().to_owned());
    }
    archive.extract(dest).map_err(|e| match e {
        ZipError::Io(io) => PolyglotError::io("unpack", dest, io),
        other => malformed(label, other),
    })?;
    Ok(names)
}

fn malformed(path: &Path, e: ZipError) -> PolyglotError {
    PolyglotError::MalformedPayload { path: path.to_owned(), reason: e.to_string() }
}

fn zip_io(op: &'static str, path: &Path, e: ZipError) -> PolyglotError {
    match e {
        ZipError::Io(io) => PolyglotError::io(op, path, io),
        other => PolyglotError::io(op, path, io::Error::new(io::ErrorKind::Other, other)),
    }
}
