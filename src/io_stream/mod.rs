//! Bounded-chunk streaming between files, plus the polyglot writer and reader.
//!
//! # Copier
//! [`StreamCopier`] moves bytes from a seekable source to any writer in
//! chunks of at most `chunk_size` bytes (16 MiB by default), optionally
//! restricted to a byte range.  Exactly one chunk buffer is allocated per
//! copier and reused for every call; files are never loaded whole.
//!
//! # Progress
//! A [`ProgressTracker`] accumulates bytes across any number of copies (e.g.
//! every part of a split write) and reports [`Progress`] snapshots to an
//! optional observer after each chunk.  Progress is observational only.
//!
//! # Cancellation
//! A [`CancelFlag`] is polled before every chunk.  Once raised, the copy
//! stops with [`CopyError::Cancelled`] and no further bytes are written.

pub mod reader;
pub mod writer;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

/// Default chunk size: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub bytes_copied:   u64,
    pub total_expected: u64,
    pub elapsed:        Duration,
}

impl Progress {
    /// Bytes per second since the tracker started (0 before any time elapsed).
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 { 0.0 } else { self.bytes_copied as f64 / secs }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_expected == 0 { return 1.0; }
        (self.bytes_copied as f64 / self.total_expected as f64).min(1.0)
    }
}

pub type ProgressFn<'a> = dyn FnMut(&Progress) + 'a;

/// Running byte count shared by every copy belonging to one operation.
pub struct ProgressTracker<'a> {
    total_expected: u64,
    bytes_copied:   u64,
    started:        Instant,
    observer:       Option<&'a mut ProgressFn<'a>>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total_expected: u64) -> Self {
        Self { total_expected, bytes_copied: 0, started: Instant::now(), observer: None }
    }

    pub fn with_observer(total_expected: u64, observer: &'a mut ProgressFn<'a>) -> Self {
        Self { observer: Some(observer), ..Self::new(total_expected) }
    }

    pub fn bytes_copied(&self) -> u64 { self.bytes_copied }

    /// Replace the expected total once it is known (e.g. after locating parts).
    pub fn set_total(&mut self, total_expected: u64) {
        self.total_expected = total_expected;
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            bytes_copied:   self.bytes_copied,
            total_expected: self.total_expected,
            elapsed:        self.started.elapsed(),
        }
    }

    pub fn advance(&mut self, n: u64) {
        self.bytes_copied += n;
        let snap = self.snapshot();
        if let Some(cb) = self.observer.as_mut() {
            cb(&snap);
        }
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Shared abort switch; cheap to clone, safe to raise from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

// ── Copier ───────────────────────────────────────────────────────────────────

/// Which side of a copy failed.
#[derive(Debug)]
pub enum CopyError {
    Read(io::Error),
    Write(io::Error),
    Cancelled,
}

/// Half-open source window for one copy; `max_bytes = None` means to EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyRange {
    pub start_offset: u64,
    pub max_bytes:    Option<u64>,
}

impl CopyRange {
    pub fn all() -> Self { Self::default() }

    pub fn bounded(start_offset: u64, max_bytes: u64) -> Self {
        Self { start_offset, max_bytes: Some(max_bytes) }
    }

    pub fn from_offset(start_offset: u64) -> Self {
        Self { start_offset, max_bytes: None }
    }
}

pub struct StreamCopier {
    buf:    Vec<u8>,
    cancel: CancelFlag,
}

impl StreamCopier {
    pub fn new(chunk_size: usize) -> Self {
        Self { buf: vec![0u8; chunk_size.max(1)], cancel: CancelFlag::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn chunk_size(&self) -> usize { self.buf.len() }

    pub fn cancel_flag(&self) -> &CancelFlag { &self.cancel }

    /// Copy `range` of `source` into `destination`.
    ///
    /// Stops when `range.max_bytes` have been copied or `source` is exhausted,
    /// whichever comes first.  Returns the number of bytes copied.  I/O errors
    /// are returned as-is, tagged with the failing side; nothing is retried.
    pub fn copy<R, W>(
        &mut self,
        source:      &mut R,
        destination: &mut W,
        range:       CopyRange,
        progress:    &mut ProgressTracker<'_>,
    ) -> Result<u64, CopyError>
    where
        R: Read + Seek,
        W: Write,
    {
        source.seek(SeekFrom::Start(range.start_offset)).map_err(CopyError::Read)?;

        let mut remaining = range.max_bytes.unwrap_or(u64::MAX);
        let mut copied    = 0u64;

        while remaining > 0 {
            if self.cancel.is_cancelled() {
                return Err(CopyError::Cancelled);
            }
            let want = (self.buf.len() as u64).min(remaining) as usize;
            let n = match source.read(&mut self.buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CopyError::Read(e)),
            };
            destination.write_all(&self.buf[..n]).map_err(CopyError::Write)?;
            copied    += n as u64;
            remaining -= n as u64;
            progress.advance(n as u64);
        }

        trace!(start = range.start_offset, copied, "copy finished");
        Ok(copied)
    }
}

impl Default for StreamCopier {
    fn default() -> Self { Self::new(DEFAULT_CHUNK_SIZE) }
}

// ── SliceReader ──────────────────────────────────────────────────────────────

/// `Read + Seek` view of `len` bytes starting at `start` of `inner`, with
/// positions relative to the window.  Lets the archive reader parse an
/// embedded payload in place.
pub struct SliceReader<R> {
    inner: R,
    start: u64,
    len:   u64,
    pos:   u64,
}

impl<R: Read + Seek> SliceReader<R> {
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start, len, pos: 0 })
    }

    pub fn len(&self) -> u64 { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }
    pub fn into_inner(self) -> R { self.inner }
}

impl<R: Read + Seek> Read for SliceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.len.saturating_sub(self.pos);
        if left == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(left) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SliceReader<R> {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let target = match to {
            SeekFrom::Start(n)   => Some(n),
            SeekFrom::End(d)     => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of slice")
        })?;
        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}
