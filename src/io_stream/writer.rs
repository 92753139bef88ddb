//! Polyglot writer: container bytes followed by one payload range per output.
//!
//! Every output is staged as a hidden temporary file in its destination
//! directory.  Nothing appears under a final name until every output of the
//! operation has been written completely; then the staged files are renamed
//! into place in part order.  A failure or cancellation before that point
//! drops the staged files, which deletes them.  A staged part keeps only its
//! path once written, so the number of open descriptors does not grow with
//! the part count.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use super::{CancelFlag, CopyError, CopyRange, ProgressTracker, StreamCopier, DEFAULT_CHUNK_SIZE};
use crate::container::ContainerTemplate;
use crate::error::{IoContext, PolyglotError, Result};
use crate::integrity::{Checksum, HashAlgorithm, Hasher, HashingWriter};
use crate::split::{part_number_width, part_path, PartRange, SplitPlan};

/// One finished output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyglotFile {
    pub path:           PathBuf,
    /// 1-based; always 1 in single mode.
    pub part_number:    usize,
    pub container_size: u64,
    /// Payload bytes carried by this file.
    pub range:          PartRange,
    /// Digest of the payload slice only, never the container prefix.
    pub checksum:       Checksum,
}

impl PolyglotFile {
    /// `container_size + range.len()`.
    pub fn total_len(&self) -> u64 { self.container_size + self.range.len() }
}

#[derive(Debug, Clone)]
pub struct WriteReport {
    pub files:            Vec<PolyglotFile>,
    pub payload_checksum: Checksum,
    pub plan:             SplitPlan,
}

pub struct PolyglotWriter {
    copier:    StreamCopier,
    algorithm: HashAlgorithm,
}

impl PolyglotWriter {
    pub fn new(chunk_size: usize, algorithm: HashAlgorithm) -> Self {
        Self { copier: StreamCopier::new(chunk_size), algorithm }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.copier = self.copier.with_cancel(cancel);
        self
    }

    /// Write `container` then the whole of `payload` to `output`.
    pub fn write_single(
        &mut self,
        container: &ContainerTemplate,
        payload:   &Path,
        output:    &Path,
        progress:  &mut ProgressTracker<'_>,
    ) -> Result<WriteReport> {
        let plan = SplitPlan::whole(payload_len(payload)?)?;
        self.write_parts(container, payload, &plan, |_| output.to_owned(), progress)
    }

    /// Write one part per [`SplitPlan`] range, named after `output_base`
    /// with a zero-padded 1-based part number.
    pub fn write_split(
        &mut self,
        container:   &ContainerTemplate,
        payload:     &Path,
        output_base: &Path,
        part_size:   u64,
        progress:    &mut ProgressTracker<'_>,
    ) -> Result<WriteReport> {
        let plan  = SplitPlan::new(payload_len(payload)?, part_size)?;
        let width = part_number_width(plan.part_count());
        self.write_parts(container, payload, &plan, |r| part_path(output_base, r.number(), width), progress)
    }

    fn write_parts<F>(
        &mut self,
        container: &ContainerTemplate,
        payload:   &Path,
        plan:      &SplitPlan,
        name_for:  F,
        progress:  &mut ProgressTracker<'_>,
    ) -> Result<WriteReport>
    where
        F: Fn(&PartRange) -> PathBuf,
    {
        let targets: Vec<(PartRange, PathBuf)> = plan.ranges().map(|r| (r, name_for(&r))).collect();
        for (_, path) in &targets {
            ensure_distinct(path, &[container.path(), payload])?;
        }

        progress.set_total(expected_bytes(container.size(), plan));
        let mut container_file = container.reader()?;
        let mut payload_file   = File::open(payload).io_context("open", payload)?;
        let mut payload_hasher = Hasher::new(self.algorithm);
        let mut staged: Vec<(TempPath, PolyglotFile)> = Vec::with_capacity(targets.len());

        for (range, path) in targets {
            let mut tmp = staging_file(&path)?;

            let prefix = self
                .copier
                .copy(&mut container_file, tmp.as_file_mut(), CopyRange::all(), progress)
                .map_err(|e| copy_error(e, container.path(), &path))?;
            if prefix != container.size() {
                return Err(short_read(container.path(), container.size(), prefix));
            }

            let mut part_hasher = Hasher::new(self.algorithm);
            let copied = {
                let mut sink = HashingWriter::new(
                    tmp.as_file_mut(),
                    vec![&mut part_hasher, &mut payload_hasher],
                );
                self.copier
                    .copy(&mut payload_file, &mut sink, CopyRange::bounded(range.start, range.len()), progress)
                    .map_err(|e| copy_error(e, payload, &path))?
            };
            if copied != range.len() {
                return Err(short_read(payload, range.len(), copied));
            }
            tmp.as_file().sync_all().io_context("sync", tmp.path())?;

            let checksum = part_hasher.finalize();
            info!(
                part  = range.number(),
                of    = plan.part_count(),
                path  = %path.display(),
                bytes = range.len(),
                checksum = %checksum.short(),
                "part staged"
            );
            staged.push((tmp.into_temp_path(), PolyglotFile {
                path,
                part_number:    range.number(),
                container_size: container.size(),
                range,
                checksum,
            }));
        }

        let files = persist_all(staged)?;
        Ok(WriteReport { files, payload_checksum: payload_hasher.finalize(), plan: *plan })
    }
}

impl Default for PolyglotWriter {
    fn default() -> Self { Self::new(DEFAULT_CHUNK_SIZE, HashAlgorithm::default()) }
}

/// Bytes a write of `plan` produces: one container copy per part plus the payload.
pub fn expected_bytes(container_size: u64, plan: &SplitPlan) -> u64 {
    container_size * plan.part_count() as u64 + plan.payload_len()
}

// ── Staging helpers ───────────────────────────────────────────────────────────

/// Hidden temporary file next to `dest`, so the final rename stays on one
/// filesystem.
pub fn staging_file(dest: &Path) -> Result<NamedTempFile> {
    let dir = parent_dir(dest);
    tempfile::Builder::new()
        .prefix(".polyglot-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .io_context("create temporary file", dir)
}

/// Rename a closed staged file onto `dest`.
pub fn persist(tmp: TempPath, dest: &Path) -> Result<()> {
    tmp.persist(dest).map_err(|e| PolyglotError::io("rename into place", dest, e.error))
}

/// Rename staged outputs in order.  If one rename fails, outputs already
/// renamed by this call are removed and the rest are dropped unrenamed.
fn persist_all(staged: Vec<(TempPath, PolyglotFile)>) -> Result<Vec<PolyglotFile>> {
    let mut done: Vec<PolyglotFile> = Vec::with_capacity(staged.len());
    for (tmp, file) in staged {
        if let Err(e) = persist(tmp, &file.path) {
            for f in &done {
                if let Err(rm) = std::fs::remove_file(&f.path) {
                    warn!(path = %f.path.display(), error = %rm, "could not remove partial output");
                }
            }
            return Err(e);
        }
        debug!(path = %file.path.display(), "output in place");
        done.push(file);
    }
    Ok(done)
}

/// Fail if `output` names an existing file that is also one of `inputs`.
pub fn ensure_distinct(output: &Path, inputs: &[&Path]) -> Result<()> {
    let Ok(out) = output.canonicalize() else { return Ok(()) };
    for input in inputs {
        if input.canonicalize().map(|i| i == out).unwrap_or(false) {
            return Err(PolyglotError::OutputOverlapsInput(output.to_owned()));
        }
    }
    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

pub(crate) fn copy_error(e: CopyError, source: &Path, dest: &Path) -> PolyglotError {
    match e {
        CopyError::Read(io)  => PolyglotError::io("read", source, io),
        CopyError::Write(io) => PolyglotError::io("write", dest, io),
        CopyError::Cancelled => PolyglotError::Cancelled,
    }
}

pub(crate) fn short_read(path: &Path, expected: u64, got: u64) -> PolyglotError {
    PolyglotError::io(
        "read",
        path,
        io::Error::new(io::ErrorKind::UnexpectedEof, format!("expected {expected} bytes, got {got}")),
    )
}

fn payload_len(payload: &Path) -> Result<u64> {
    let len = std::fs::metadata(payload).io_context("stat", payload)?.len();
    if len == 0 {
        return Err(PolyglotError::EmptyPayload(payload.to_owned()));
    }
    Ok(len)
}

/// Read `len` bytes at `offset` of `path`; test and inspection helper.
pub fn read_range(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
    let mut f = File::open(path).io_context("open", path)?;
    f.seek(io::SeekFrom::Start(offset)).io_context("seek", path)?;
    let mut buf = Vec::with_capacity(len as usize);
    f.take(len).read_to_end(&mut buf).io_context("read", path)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::digest_bytes;
    use tempfile::tempdir;

    fn fixture(dir: &Path, container: &[u8], payload: &[u8]) -> (ContainerTemplate, PathBuf) {
        let c = dir.join("clip.mp4");
        let p = dir.join("payload.bin");
        std::fs::write(&c, container).unwrap();
        std::fs::write(&p, payload).unwrap();
        (ContainerTemplate::open(&c).unwrap(), p)
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".polyglot-"))
            .collect()
    }

    #[test]
    fn single_output_is_container_then_payload() {
        let dir = tempdir().unwrap();
        let (container, payload) = fixture(dir.path(), &[0xAA; 100], b"PKxxxxxxxx");
        let out = dir.path().join("out.mp4");

        let mut w = PolyglotWriter::new(16, HashAlgorithm::Blake3);
        let report = w.write_single(&container, &payload, &out, &mut ProgressTracker::new(0)).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(bytes.len(), 110);
        assert_eq!(&bytes[..100], &[0xAA; 100][..]);
        assert_eq!(&bytes[100..], b"PKxxxxxxxx");
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].total_len(), 110);
        assert_eq!(report.payload_checksum, digest_bytes(HashAlgorithm::Blake3, b"PKxxxxxxxx"));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn split_parts_carry_their_own_slice_checksums() {
        let dir = tempdir().unwrap();
        let payload_bytes: Vec<u8> = (0..25u8).collect();
        let (container, payload) = fixture(dir.path(), b"HEADER", &payload_bytes);
        let base = dir.path().join("hidden.mp4");

        let mut w = PolyglotWriter::new(4, HashAlgorithm::Sha256);
        let mut tracker = ProgressTracker::new(0);
        let report = w.write_split(&container, &payload, &base, 10, &mut tracker).unwrap();

        assert_eq!(report.files.len(), 3);
        assert_eq!(tracker.bytes_copied(), 3 * 6 + 25);
        let names: Vec<String> = report
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["hidden_part1.mp4", "hidden_part2.mp4", "hidden_part3.mp4"]);

        for (file, expected) in report.files.iter().zip(payload_bytes.chunks(10)) {
            let bytes = std::fs::read(&file.path).unwrap();
            assert_eq!(&bytes[..6], b"HEADER");
            assert_eq!(&bytes[6..], expected);
            assert_eq!(file.checksum, digest_bytes(HashAlgorithm::Sha256, expected));
        }
        assert_eq!(report.payload_checksum, digest_bytes(HashAlgorithm::Sha256, &payload_bytes));
    }

    #[test]
    fn cancelled_write_leaves_no_outputs() {
        let dir = tempdir().unwrap();
        let (container, payload) = fixture(dir.path(), &[1; 64], &[2; 64]);
        let base = dir.path().join("gone.mp4");
        let flag = CancelFlag::new();
        flag.cancel();

        let mut w = PolyglotWriter::new(8, HashAlgorithm::Crc32).with_cancel(flag);
        let err = w.write_split(&container, &payload, &base, 16, &mut ProgressTracker::new(0)).unwrap_err();
        assert!(matches!(err, PolyglotError::Cancelled));
        assert!(leftovers(dir.path()).is_empty());
        assert!(!dir.path().join("gone_part1.mp4").exists());
    }

    #[test]
    fn refuses_to_overwrite_the_container() {
        let dir = tempdir().unwrap();
        let (container, payload) = fixture(dir.path(), &[1; 8], &[2; 8]);
        let mut w = PolyglotWriter::default();
        let err = w
            .write_single(&container, &payload, container.path(), &mut ProgressTracker::new(0))
            .unwrap_err();
        assert!(matches!(err, PolyglotError::OutputOverlapsInput(_)));
        assert_eq!(std::fs::read(container.path()).unwrap(), vec![1; 8]);
    }

    #[test]
    fn empty_payload_rejected_before_output() {
        let dir = tempdir().unwrap();
        let (container, payload) = fixture(dir.path(), &[1; 8], b"");
        let out = dir.path().join("never.mp4");
        let err = PolyglotWriter::default()
            .write_single(&container, &payload, &out, &mut ProgressTracker::new(0))
            .unwrap_err();
        assert!(matches!(err, PolyglotError::EmptyPayload(_)));
        assert!(!out.exists());
    }

    #[test]
    fn read_range_reads_slice() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("r.bin");
        std::fs::write(&p, b"0123456789").unwrap();
        assert_eq!(read_range(&p, 3, 4).unwrap(), b"3456");
        assert_eq!(read_range(&p, 8, 10).unwrap(), b"89");
    }
}
