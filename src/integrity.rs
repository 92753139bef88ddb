//! Checksums for payloads, part slices and whole files.
//!
//! The hash primitive is a parameter ([`HashAlgorithm`]); BLAKE3 is the
//! default.  Checksums carry their algorithm so a value recorded on one
//! machine is never compared against a digest produced by another algorithm.
//!
//! Digests are computed in the same pass that writes the bytes: wrap the
//! destination in a [`HashingWriter`] and every byte forwarded to it is also
//! fed to one or more [`Hasher`]s.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, PolyglotError, Result};
use crate::io_stream::DEFAULT_CHUNK_SIZE;

// ── HashAlgorithm ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
    Crc32,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Crc32  => "crc32",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Crc32  => 4,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PolyglotError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            "crc32"  => Ok(Self::Crc32),
            _ => Err(PolyglotError::UnsupportedAlgorithm(format!("hash: {s}"))),
        }
    }
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// A digest tagged with the algorithm that produced it.
///
/// Rendered and serialized as `"<algorithm>:<lowercase hex>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: HashAlgorithm,
    digest:    Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self> {
        if digest.len() != algorithm.digest_len() {
            return Err(PolyglotError::UnsupportedAlgorithm(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.digest_len(),
                digest.len()
            )));
        }
        Ok(Self { algorithm, digest })
    }

    pub fn algorithm(&self) -> HashAlgorithm { self.algorithm }
    pub fn as_bytes(&self) -> &[u8] { &self.digest }
    pub fn to_hex(&self) -> String { hex::encode(&self.digest) }

    /// First 12 hex digits, for compact display.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        hex[..hex.len().min(12)].to_owned()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = PolyglotError;
    fn from_str(s: &str) -> Result<Self> {
        let (alg, hex_digest) = s
            .split_once(':')
            .ok_or_else(|| PolyglotError::UnsupportedAlgorithm(format!("checksum: {s}")))?;
        let algorithm: HashAlgorithm = alg.parse()?;
        let digest = hex::decode(hex_digest)
            .map_err(|e| PolyglotError::UnsupportedAlgorithm(format!("checksum hex: {e}")))?;
        Checksum::new(algorithm, digest)
    }
}

impl TryFrom<String> for Checksum {
    type Error = PolyglotError;
    fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> String { c.to_string() }
}

// ── Hasher ────────────────────────────────────────────────────────────────────

/// Incremental hasher over any supported algorithm.
pub enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
    Crc32(crc32fast::Hasher),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Hasher::Sha256(<sha2::Sha256 as sha2::Digest>::new()),
            HashAlgorithm::Crc32  => Hasher::Crc32(crc32fast::Hasher::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Hasher::Blake3(_) => HashAlgorithm::Blake3,
            Hasher::Sha256(_) => HashAlgorithm::Sha256,
            Hasher::Crc32(_)  => HashAlgorithm::Crc32,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(h) => { h.update(data); }
            Hasher::Sha256(h) => sha2::Digest::update(h, data),
            Hasher::Crc32(h)  => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        let (algorithm, digest) = match self {
            Hasher::Blake3(h) => (HashAlgorithm::Blake3, h.finalize().as_bytes().to_vec()),
            Hasher::Sha256(h) => (HashAlgorithm::Sha256, sha2::Digest::finalize(h).to_vec()),
            Hasher::Crc32(h)  => (HashAlgorithm::Crc32, h.finalize().to_be_bytes().to_vec()),
        };
        Checksum { algorithm, digest }
    }
}

// ── HashingWriter ─────────────────────────────────────────────────────────────

/// Forwards writes to `inner` and feeds every accepted byte to each hasher.
pub struct HashingWriter<'h, W: Write> {
    inner:   W,
    hashers: Vec<&'h mut Hasher>,
}

impl<'h, W: Write> HashingWriter<'h, W> {
    pub fn new(inner: W, hashers: Vec<&'h mut Hasher>) -> Self {
        Self { inner, hashers }
    }

    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        for h in self.hashers.iter_mut() {
            h.update(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Digest helpers ────────────────────────────────────────────────────────────

pub fn digest_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut h = Hasher::new(algorithm);
    h.update(data);
    h.finalize()
}

/// Digest everything `reader` yields, holding at most one chunk in memory.
pub fn digest_reader<R: Read>(
    algorithm:  HashAlgorithm,
    reader:     &mut R,
    chunk_size: usize,
) -> io::Result<Checksum> {
    let mut h   = Hasher::new(algorithm);
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => h.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(h.finalize())
}

/// Digest a whole file with streamed reads.
pub fn digest_file(algorithm: HashAlgorithm, path: &Path) -> Result<Checksum> {
    let mut f = File::open(path).io_context("open", path)?;
    digest_reader(algorithm, &mut f, DEFAULT_CHUNK_SIZE).io_context("read", path)
}

/// Exact comparison; checksums from different algorithms never match.
pub fn verify(expected: &Checksum, actual: &Checksum) -> bool {
    expected == actual
}

// ── IntegrityStatus ───────────────────────────────────────────────────────────

/// Verdict on a reconstructed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Recorded checksum matches.
    Verified(Checksum),
    /// Recorded checksum differs; output written but must not be trusted.
    Mismatch { expected: Checksum, actual: Checksum },
    /// Nothing recorded to compare against.
    Unchecked(Checksum),
}

impl IntegrityStatus {
    pub fn compare(expected: Option<&Checksum>, actual: Checksum) -> Self {
        match expected {
            Some(e) if verify(e, &actual) => IntegrityStatus::Verified(actual),
            Some(e) => IntegrityStatus::Mismatch { expected: e.clone(), actual },
            None    => IntegrityStatus::Unchecked(actual),
        }
    }

    pub fn is_verified(&self) -> bool { matches!(self, IntegrityStatus::Verified(_)) }
    pub fn is_mismatch(&self) -> bool { matches!(self, IntegrityStatus::Mismatch { .. }) }

    pub fn actual(&self) -> &Checksum {
        match self {
            IntegrityStatus::Verified(c) | IntegrityStatus::Unchecked(c) => c,
            IntegrityStatus::Mismatch { actual, .. } => actual,
        }
    }
}
