//! Polyglot reader: locate the payload inside one file or a set of parts and
//! stream it back out.
//!
//! # Offsets
//!
//! | Source | When |
//! |--------|------|
//! | `Recorded` | container size taken from recovery metadata |
//! | `Signature` | first occurrence of the payload signature |
//! | `SharedPrefix` | later part whose leading bytes equal part 1's container prefix |
//! | `Estimated` | nothing else worked; `len / 2` (or `len / 10`) guess |
//!
//! Continuation parts begin mid-payload, so their own signature scan usually
//! finds nothing.  Since every part carries the same container template, a
//! part whose first `offset` bytes match part 1 shares part 1's offset.  An
//! estimated offset marks the whole extraction as degraded.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::writer::{copy_error, persist, short_read, staging_file};
use super::{CancelFlag, CopyRange, ProgressTracker, StreamCopier, DEFAULT_CHUNK_SIZE};
use crate::error::{IoContext, PolyglotError, Result};
use crate::integrity::{Checksum, HashAlgorithm, Hasher, HashingWriter};
use crate::recovery::scanner::{self, estimate_offset, Fallback, ScanOutcome, Signature};

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Marks the payload start; `None` for payloads without a magic.
    pub signature:      Option<Signature>,
    /// Known container size; overrides scanning when set.
    pub container_size: Option<u64>,
    pub fallback:       Fallback,
    pub chunk_size:     usize,
    pub algorithm:      HashAlgorithm,
    pub cancel:         CancelFlag,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            signature:      Some(Signature::zip()),
            container_size: None,
            fallback:       Fallback::default(),
            chunk_size:     DEFAULT_CHUNK_SIZE,
            algorithm:      HashAlgorithm::default(),
            cancel:         CancelFlag::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSource {
    Recorded,
    Signature,
    SharedPrefix,
    Estimated,
}

impl OffsetSource {
    pub fn is_confirmed(self) -> bool { self != OffsetSource::Estimated }

    pub fn name(self) -> &'static str {
        match self {
            OffsetSource::Recorded     => "recorded",
            OffsetSource::Signature    => "signature",
            OffsetSource::SharedPrefix => "shared-prefix",
            OffsetSource::Estimated    => "estimated",
        }
    }
}

/// Payload bytes `[offset, offset + len)` of one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSlice {
    pub path:   PathBuf,
    pub offset: u64,
    pub len:    u64,
    pub source: OffsetSource,
}

#[derive(Debug, Clone)]
pub struct ExtractedPayload {
    pub parts:         Vec<PartSlice>,
    pub bytes_written: u64,
    pub checksum:      Checksum,
}

impl ExtractedPayload {
    /// True when any slice boundary was guessed rather than confirmed.
    pub fn is_degraded(&self) -> bool {
        self.parts.iter().any(|p| !p.source.is_confirmed())
    }
}

pub struct PolyglotReader {
    copier: StreamCopier,
    opts:   ReaderOptions,
}

impl PolyglotReader {
    pub fn new(opts: ReaderOptions) -> Self {
        let copier = StreamCopier::new(opts.chunk_size).with_cancel(opts.cancel.clone());
        Self { copier, opts }
    }

    pub fn options(&self) -> &ReaderOptions { &self.opts }

    // ── Locating ─────────────────────────────────────────────────────────────

    /// Payload slice of a single polyglot.  Never estimates: without a
    /// recorded container size the signature must be present.
    pub fn locate_single(&self, path: &Path) -> Result<PartSlice> {
        let len = file_len(path)?;
        if let Some(size) = self.opts.container_size {
            return recorded(path, len, size);
        }
        let outcome = self.scan(path, len, None)?;
        slice_for(path, len, outcome)
    }

    /// Payload slices of `parts`, in the order given.
    pub fn locate_parts(&self, parts: &[PathBuf]) -> Result<Vec<PartSlice>> {
        let Some(first) = parts.first() else {
            return Err(PolyglotError::InvalidInput("no parts to combine".into()));
        };

        if let Some(size) = self.opts.container_size {
            return parts.iter().map(|p| recorded(p, file_len(p)?, size)).collect();
        }

        let head = self.scan_own(first)?;
        let anchor = (head.source == OffsetSource::Signature).then_some(head.offset);
        let mut slices = vec![head];

        for path in &parts[1..] {
            let len = file_len(path)?;
            let shared = match anchor {
                Some(a) if len >= a => same_prefix(first, path, a, self.opts.chunk_size)?.then_some(a),
                _ => None,
            };
            let s = match shared {
                Some(a) => slice(path, a, len, OffsetSource::SharedPrefix),
                None    => self.scan_own(path)?,
            };
            slices.push(s);
        }

        for s in &slices {
            if s.source == OffsetSource::Estimated {
                warn!(path = %s.path.display(), offset = s.offset, "payload offset estimated; output may be corrupt");
            } else {
                debug!(path = %s.path.display(), offset = s.offset, source = s.source.name(), "part located");
            }
        }
        Ok(slices)
    }

    fn scan_own(&self, path: &Path) -> Result<PartSlice> {
        let len = file_len(path)?;
        let outcome = self.scan(path, len, Some(self.opts.fallback))?;
        slice_for(path, len, outcome)
    }

    /// Signature scan of `path`; absent signatures are estimated only when
    /// `fallback` is given.
    fn scan(&self, path: &Path, len: u64, fallback: Option<Fallback>) -> Result<ScanOutcome> {
        match (&self.opts.signature, fallback) {
            (Some(sig), _) => {
                let mut f = File::open(path).io_context("open", path)?;
                scanner::locate(&mut f, len, sig, fallback, self.opts.chunk_size).io_context("scan", path)
            }
            (None, Some(fb)) => Ok(ScanOutcome::Estimated(estimate_offset(len, fb))),
            (None, None)     => Ok(ScanOutcome::NotFound),
        }
    }

    // ── Extraction ───────────────────────────────────────────────────────────

    /// Stream the payload of one polyglot into `out`.
    pub fn extract_single<W: Write>(
        &mut self,
        path:     &Path,
        out:      &mut W,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        let s = self.locate_single(path)?;
        self.copy_slices(vec![s], out, Path::new("<output>"), progress)
    }

    /// Concatenate the payload slices of `parts`, in the order given, into `out`.
    pub fn extract_and_combine<W: Write>(
        &mut self,
        parts:    &[PathBuf],
        out:      &mut W,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        let slices = self.locate_parts(parts)?;
        self.copy_slices(slices, out, Path::new("<output>"), progress)
    }

    /// [`extract_single`](Self::extract_single) into a file that appears
    /// under `dest` only once complete.
    pub fn extract_single_to(
        &mut self,
        path:     &Path,
        dest:     &Path,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        let s = self.locate_single(path)?;
        self.copy_to_file(vec![s], dest, progress)
    }

    /// [`extract_and_combine`](Self::extract_and_combine) into a file that
    /// appears under `dest` only once complete.
    pub fn extract_and_combine_to(
        &mut self,
        parts:    &[PathBuf],
        dest:     &Path,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        let slices = self.locate_parts(parts)?;
        self.copy_to_file(slices, dest, progress)
    }

    fn copy_to_file(
        &mut self,
        slices:   Vec<PartSlice>,
        dest:     &Path,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        for s in &slices {
            super::writer::ensure_distinct(dest, &[s.path.as_path()])?;
        }
        let mut tmp = staging_file(dest)?;
        let extracted = self.copy_slices(slices, tmp.as_file_mut(), dest, progress)?;
        tmp.as_file().sync_all().io_context("sync", tmp.path())?;
        persist(tmp.into_temp_path(), dest)?;
        info!(path = %dest.display(), bytes = extracted.bytes_written, "payload written");
        Ok(extracted)
    }

    fn copy_slices<W: Write>(
        &mut self,
        slices:   Vec<PartSlice>,
        out:      &mut W,
        label:    &Path,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<ExtractedPayload> {
        progress.set_total(slices.iter().map(|s| s.len).sum());
        let mut hasher = Hasher::new(self.opts.algorithm);
        let mut written = 0u64;
        {
            let mut sink = HashingWriter::new(&mut *out, vec![&mut hasher]);
            for s in &slices {
                let mut f = File::open(&s.path).io_context("open", &s.path)?;
                let n = self
                    .copier
                    .copy(&mut f, &mut sink, CopyRange::bounded(s.offset, s.len), progress)
                    .map_err(|e| copy_error(e, &s.path, label))?;
                if n != s.len {
                    return Err(short_read(&s.path, s.len, n));
                }
                written += n;
            }
            sink.flush().io_context("flush", label)?;
        }
        Ok(ExtractedPayload { parts: slices, bytes_written: written, checksum: hasher.finalize() })
    }
}

impl Default for PolyglotReader {
    fn default() -> Self { Self::new(ReaderOptions::default()) }
}

fn file_len(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Err(PolyglotError::InputNotFound(path.to_owned()));
    }
    Ok(std::fs::metadata(path).io_context("stat", path)?.len())
}

fn slice(path: &Path, offset: u64, len: u64, source: OffsetSource) -> PartSlice {
    let offset = offset.min(len);
    PartSlice { path: path.to_owned(), offset, len: len - offset, source }
}

fn slice_for(path: &Path, len: u64, outcome: ScanOutcome) -> Result<PartSlice> {
    match outcome {
        ScanOutcome::Found(o)     => Ok(slice(path, o, len, OffsetSource::Signature)),
        ScanOutcome::Estimated(o) => Ok(slice(path, o, len, OffsetSource::Estimated)),
        ScanOutcome::NotFound     => Err(PolyglotError::NoPayloadSignature(path.to_owned())),
    }
}

fn recorded(path: &Path, len: u64, container_size: u64) -> Result<PartSlice> {
    if len < container_size {
        return Err(PolyglotError::TruncatedPart { path: path.to_owned(), len, container_size });
    }
    Ok(slice(path, container_size, len, OffsetSource::Recorded))
}

/// Whether the first `len` bytes of `a` and `b` are identical.
fn same_prefix(a: &Path, b: &Path, len: u64, chunk_size: usize) -> Result<bool> {
    let mut fa = File::open(a).io_context("open", a)?;
    let mut fb = File::open(b).io_context("open", b)?;
    let chunk = chunk_size.clamp(1, 1 << 20);
    let mut ba = vec![0u8; chunk];
    let mut bb = vec![0u8; chunk];
    let mut remaining = len;
    while remaining > 0 {
        let n = (chunk as u64).min(remaining) as usize;
        fa.read_exact(&mut ba[..n]).io_context("read", a)?;
        fb.read_exact(&mut bb[..n]).io_context("read", b)?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
        remaining -= n as u64;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerTemplate;
    use crate::integrity::digest_bytes;
    use crate::io_stream::writer::PolyglotWriter;
    use tempfile::tempdir;

    fn pk_opts() -> ReaderOptions {
        ReaderOptions { signature: Some(Signature::new(b"PK".to_vec()).unwrap()), chunk_size: 8, ..Default::default() }
    }

    fn write_parts(dir: &Path, container: &[u8], payload: &[u8], part_size: u64) -> Vec<PathBuf> {
        let c = dir.join("clip.mp4");
        let p = dir.join("payload.bin");
        std::fs::write(&c, container).unwrap();
        std::fs::write(&p, payload).unwrap();
        let template = ContainerTemplate::open(&c).unwrap();
        let report = PolyglotWriter::new(8, HashAlgorithm::Blake3)
            .write_split(&template, &p, &dir.join("out.mp4"), part_size, &mut ProgressTracker::new(0))
            .unwrap();
        report.files.into_iter().map(|f| f.path).collect()
    }

    #[test]
    fn single_polyglot_roundtrip() {
        let dir = tempdir().unwrap();
        let poly = dir.path().join("poly.mp4");
        let mut bytes = vec![0xAAu8; 100];
        bytes.extend_from_slice(b"PKxxxxxxxx");
        std::fs::write(&poly, &bytes).unwrap();

        let mut out = Vec::new();
        let got = PolyglotReader::new(pk_opts())
            .extract_single(&poly, &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        assert_eq!(out, b"PKxxxxxxxx");
        assert_eq!(got.parts[0].offset, 100);
        assert_eq!(got.parts[0].source, OffsetSource::Signature);
        assert!(!got.is_degraded());
    }

    #[test]
    fn single_without_signature_fails() {
        let dir = tempdir().unwrap();
        let poly = dir.path().join("plain.mp4");
        std::fs::write(&poly, vec![0u8; 50]).unwrap();
        let err = PolyglotReader::new(pk_opts())
            .extract_single(&poly, &mut Vec::new(), &mut ProgressTracker::new(0))
            .unwrap_err();
        assert!(matches!(err, PolyglotError::NoPayloadSignature(_)));

        let err = PolyglotReader::new(ReaderOptions { signature: None, ..Default::default() })
            .locate_single(&poly)
            .unwrap_err();
        assert!(matches!(err, PolyglotError::NoPayloadSignature(_)));
    }

    #[test]
    fn recorded_size_skips_scanning() {
        let dir = tempdir().unwrap();
        let poly = dir.path().join("poly.mp4");
        std::fs::write(&poly, b"PKcontainerRAW").unwrap();
        let opts = ReaderOptions { container_size: Some(11), ..pk_opts() };
        let mut out = Vec::new();
        let got = PolyglotReader::new(opts)
            .extract_single(&poly, &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        assert_eq!(out, b"RAW");
        assert_eq!(got.parts[0].source, OffsetSource::Recorded);
    }

    #[test]
    fn recorded_size_larger_than_part_is_truncation() {
        let dir = tempdir().unwrap();
        let poly = dir.path().join("short.mp4");
        std::fs::write(&poly, b"tiny").unwrap();
        let opts = ReaderOptions { container_size: Some(100), ..pk_opts() };
        let err = PolyglotReader::new(opts).locate_single(&poly).unwrap_err();
        assert!(matches!(err, PolyglotError::TruncatedPart { len: 4, container_size: 100, .. }));
    }

    #[test]
    fn split_roundtrip_uses_shared_prefix() {
        let dir = tempdir().unwrap();
        let mut payload = b"PK".to_vec();
        payload.extend((0..23u8).map(|b| b.wrapping_mul(3) | 0x80));
        let parts = write_parts(dir.path(), &[0x11; 40], &payload, 10);
        assert_eq!(parts.len(), 3);

        let mut out = Vec::new();
        let got = PolyglotReader::new(pk_opts())
            .extract_and_combine(&parts, &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        assert_eq!(out, payload);
        let sources: Vec<_> = got.parts.iter().map(|p| p.source).collect();
        assert_eq!(sources, [OffsetSource::Signature, OffsetSource::SharedPrefix, OffsetSource::SharedPrefix]);
        assert_eq!(got.checksum, digest_bytes(HashAlgorithm::Blake3, &payload));
        assert!(!got.is_degraded());
    }

    #[test]
    fn swapped_parts_change_the_checksum() {
        let dir = tempdir().unwrap();
        let mut payload = b"PK".to_vec();
        payload.extend(std::iter::repeat(0x42u8).take(10).chain(std::iter::repeat(0x43u8).take(8)));
        let mut parts = write_parts(dir.path(), &[0x11; 40], &payload, 10);
        parts.swap(0, 1);

        let opts = ReaderOptions { container_size: Some(40), ..pk_opts() };
        let mut out = Vec::new();
        let got = PolyglotReader::new(opts)
            .extract_and_combine(&parts, &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        assert_eq!(out.len(), payload.len());
        assert_ne!(got.checksum, digest_bytes(HashAlgorithm::Blake3, &payload));
    }

    #[test]
    fn missing_signature_in_parts_is_degraded_not_fatal() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("x_part1.mp4");
        let b = dir.path().join("x_part2.mp4");
        std::fs::write(&a, vec![0u8; 20]).unwrap();
        std::fs::write(&b, vec![1u8; 30]).unwrap();

        let mut out = Vec::new();
        let got = PolyglotReader::new(pk_opts())
            .extract_and_combine(&[a, b], &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        assert!(got.is_degraded());
        assert_eq!(got.parts[0].offset, 10);
        assert_eq!(got.parts[1].offset, 15);
        assert_eq!(out.len(), 10 + 15);
    }

    #[test]
    fn extract_to_file_is_atomic_on_failure() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("payload.zip");
        let missing = dir.path().join("gone_part1.mp4");
        let err = PolyglotReader::new(pk_opts())
            .extract_and_combine_to(&[missing], &dest, &mut ProgressTracker::new(0))
            .unwrap_err();
        assert!(matches!(err, PolyglotError::InputNotFound(_)));
        assert!(!dest.exists());
    }
}
