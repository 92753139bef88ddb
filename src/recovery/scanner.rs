//! Signature scanner: find where a payload starts inside a polyglot file.
//!
//! # How it works
//!
//! A payload that begins with a known magic sequence (e.g. the ZIP local file
//! header `PK\x03\x04`) is located by searching for the first occurrence of
//! that sequence.  The search runs over an in-memory buffer ([`scan`]) or a
//! stream read in bounded chunks ([`scan_reader`]); the streaming form keeps
//! the last `signature.len() - 1` bytes of each chunk so matches that straddle
//! a chunk boundary are still found.
//!
//! ## Outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `Found(offset)` | Signature occurs at `offset`; confirmed |
//! | `Estimated(offset)` | Signature absent; offset guessed from the length |
//! | `NotFound` | Signature absent and no estimate was requested |
//!
//! An estimate is lossy by construction.  Callers must surface it as a
//! degraded result and never treat it as a confirmed boundary.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use memchr::memmem::Finder;

use crate::archive::ArchiveKind;
use crate::error::{IoContext, PolyglotError, Result};
use crate::io_stream::DEFAULT_CHUNK_SIZE;

// ── Signature ─────────────────────────────────────────────────────────────────

/// A non-empty magic byte sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(PolyglotError::InvalidSignature("signature must not be empty".into()));
        }
        Ok(Self(bytes))
    }

    /// ZIP local file header, `PK\x03\x04`.
    pub fn zip() -> Self { Self(ArchiveKind::Zip.signature().to_vec()) }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| PolyglotError::InvalidSignature(format!("{s}: {e}")))?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn to_hex(&self) -> String { hex::encode(&self.0) }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = PolyglotError;

    /// Accepts a preset name (`zip`, `7z`, `rar`, `pk`) or a hex string.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zip" => Ok(Self::zip()),
            "7z"  => Ok(Self(ArchiveKind::SevenZip.signature().to_vec())),
            "rar" => Ok(Self(ArchiveKind::Rar.signature().to_vec())),
            "pk"  => Ok(Self(b"PK".to_vec())),
            _ => Self::from_hex(s),
        }
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Plain search result; `offset` is meaningful only when `found` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub found:  bool,
    pub offset: u64,
}

impl ScanResult {
    pub fn found(offset: u64) -> Self { Self { found: true, offset } }
    pub fn not_found() -> Self { Self { found: false, offset: 0 } }

    pub fn offset(&self) -> Option<u64> {
        self.found.then_some(self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(u64),
    Estimated(u64),
    NotFound,
}

impl ScanOutcome {
    pub fn offset(&self) -> Option<u64> {
        match *self {
            ScanOutcome::Found(o) | ScanOutcome::Estimated(o) => Some(o),
            ScanOutcome::NotFound => None,
        }
    }

    pub fn is_confirmed(&self) -> bool { matches!(self, ScanOutcome::Found(_)) }
}

/// Ratio used to guess a payload offset when the signature is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
    /// `len / 2`.  Split parts are sized so the payload slice is at most as
    /// large as the container in the common case.
    #[default]
    Half,
    /// `len / 10`.  For payloads much larger than their container.
    Tenth,
}

impl FromStr for Fallback {
    type Err = PolyglotError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "half"  => Ok(Self::Half),
            "tenth" => Ok(Self::Tenth),
            _ => Err(PolyglotError::InvalidInput(format!("fallback must be half or tenth, got {s}"))),
        }
    }
}

/// Floor-division guess of the payload start for a `data_len`-byte file.
pub fn estimate_offset(data_len: u64, fallback: Fallback) -> u64 {
    match fallback {
        Fallback::Half  => data_len / 2,
        Fallback::Tenth => data_len / 10,
    }
}

// ── Scanning ──────────────────────────────────────────────────────────────────

/// First occurrence of `signature` in `data`.
pub fn scan(data: &[u8], signature: &Signature) -> ScanResult {
    match Finder::new(signature.as_bytes()).find(data) {
        Some(pos) => ScanResult::found(pos as u64),
        None      => ScanResult::not_found(),
    }
}

/// First occurrence of `signature` in everything `reader` yields.
///
/// Offsets are relative to the reader's position on entry.  Memory use is
/// bounded by `chunk_size + signature.len() - 1`.
pub fn scan_reader<R: Read>(
    reader:     &mut R,
    signature:  &Signature,
    chunk_size: usize,
) -> io::Result<ScanResult> {
    let finder = Finder::new(signature.as_bytes());
    let keep   = signature.len() - 1;
    let mut buf   = vec![0u8; keep + chunk_size.max(1)];
    let mut carry = 0usize;
    // Absolute offset of buf[0].
    let mut base  = 0u64;

    loop {
        let n = match reader.read(&mut buf[carry..]) {
            Ok(0) => return Ok(ScanResult::not_found()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let filled = carry + n;
        if let Some(pos) = finder.find(&buf[..filled]) {
            return Ok(ScanResult::found(base + pos as u64));
        }
        let tail = keep.min(filled);
        buf.copy_within(filled - tail..filled, 0);
        base += (filled - tail) as u64;
        carry = tail;
    }
}

/// Scan a file from its first byte.
pub fn scan_file(path: &Path, signature: &Signature) -> Result<ScanResult> {
    let mut f = File::open(path).io_context("open", path)?;
    scan_reader(&mut f, signature, DEFAULT_CHUNK_SIZE).io_context("scan", path)
}

/// Scan for `signature`.  When it is absent, estimate an offset from
/// `data_len` if a `fallback` is given, otherwise report `NotFound`.
pub fn locate<R: Read>(
    reader:     &mut R,
    data_len:   u64,
    signature:  &Signature,
    fallback:   Option<Fallback>,
    chunk_size: usize,
) -> io::Result<ScanOutcome> {
    let result = scan_reader(reader, signature, chunk_size)?;
    Ok(match (result.offset(), fallback) {
        (Some(o), _)     => ScanOutcome::Found(o),
        (None, Some(fb)) => ScanOutcome::Estimated(estimate_offset(data_len, fb)),
        (None, None)     => ScanOutcome::NotFound,
    })
}
