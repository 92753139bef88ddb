//! Deterministic partition of a payload across output parts, and the file
//! names those parts receive.

use std::path::{Path, PathBuf};

use crate::error::{PolyglotError, Result};

/// Marker inserted between the output stem and the part number.
pub const PART_MARKER: &str = "_part";

/// Half-open payload byte range `[start, end)` owned by one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub index: usize,
    pub start: u64,
    pub end:   u64,
}

impl PartRange {
    pub fn len(&self) -> u64 { self.end - self.start }
    pub fn is_empty(&self) -> bool { self.end == self.start }
    /// 1-based part number used in file names.
    pub fn number(&self) -> usize { self.index + 1 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    payload_len: u64,
    part_size:   u64,
    part_count:  usize,
}

impl SplitPlan {
    /// `part_count = ceil(payload_len / part_size)`.
    pub fn new(payload_len: u64, part_size: u64) -> Result<Self> {
        if part_size == 0 {
            return Err(PolyglotError::InvalidPartSize(part_size));
        }
        if payload_len == 0 {
            return Err(PolyglotError::EmptyPayload(PathBuf::from("<payload>")));
        }
        let part_count = payload_len.div_ceil(part_size) as usize;
        Ok(Self { payload_len, part_size, part_count })
    }

    /// One part covering the whole payload.
    pub fn whole(payload_len: u64) -> Result<Self> {
        Self::new(payload_len, payload_len.max(1))
    }

    pub fn payload_len(&self) -> u64 { self.payload_len }
    pub fn part_size(&self) -> u64 { self.part_size }
    pub fn part_count(&self) -> usize { self.part_count }

    pub fn range(&self, index: usize) -> Option<PartRange> {
        if index >= self.part_count {
            return None;
        }
        let start = index as u64 * self.part_size;
        let end   = (start + self.part_size).min(self.payload_len);
        Some(PartRange { index, start, end })
    }

    pub fn ranges(&self) -> impl Iterator<Item = PartRange> + '_ {
        (0..self.part_count).filter_map(move |i| self.range(i))
    }
}

// ── Naming ────────────────────────────────────────────────────────────────────

/// Zero-pad width that keeps `part_count` names in lexicographic order.
pub fn part_number_width(part_count: usize) -> usize {
    part_count.max(1).to_string().len()
}

/// `dir/stem.ext` → `dir/stem_part<number>.ext`, number zero-padded to `width`.
pub fn part_path(base: &Path, number: usize, width: usize) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}{PART_MARKER}{number:0width$}.{}", ext.to_string_lossy()),
        None      => format!("{stem}{PART_MARKER}{number:0width$}"),
    };
    base.with_file_name(name)
}

/// Components of a part file name produced by [`part_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartName {
    /// Stem before the part marker.
    pub base:      String,
    pub number:    usize,
    pub extension: Option<String>,
}

/// Parse `stem_part<digits>[.ext]`; `None` for names without the marker.
pub fn parse_part_name(path: &Path) -> Option<PartName> {
    let stem = path.file_stem()?.to_str()?;
    let (base, digits) = stem.rsplit_once(PART_MARKER)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(PartName {
        base:      base.to_owned(),
        number:    digits.parse().ok()?,
        extension: path.extension().and_then(|e| e.to_str()).map(str::to_owned),
    })
}
