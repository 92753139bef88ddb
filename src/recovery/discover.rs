//! Sibling-part discovery from a single part path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::container::is_container_extension;
use crate::error::{IoContext, PolyglotError, Result};
use crate::split::parse_part_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// No siblings; extract this file on its own.
    Single(PathBuf),
    /// Two or more parts in ascending part-number order.  Must be confirmed
    /// before they are combined.
    Candidates(Vec<PathBuf>),
}

/// Find every `<base>_part<N>.<container ext>` next to `path`.
///
/// Numbering must run from 1 without gaps; the first missing number is
/// reported as [`PolyglotError::MissingPart`].
pub fn discover_parts(path: &Path) -> Result<Discovery> {
    let Some(name) = parse_part_name(path) else {
        return Ok(Discovery::Single(path.to_owned()));
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut found: BTreeMap<usize, PathBuf> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).io_context("read directory", dir)? {
        let entry = entry.io_context("read directory", dir)?;
        let candidate = entry.path();
        if !candidate.is_file() {
            continue;
        }
        let Some(other) = parse_part_name(&candidate) else { continue };
        let ext_ok = other.extension.as_deref().map(is_container_extension).unwrap_or(false)
            || other.extension == name.extension;
        if other.base != name.base || !ext_ok {
            continue;
        }
        if let Some(prev) = found.insert(other.number, candidate.clone()) {
            return Err(PolyglotError::InvalidInput(format!(
                "part {} of {} is ambiguous: {} and {}",
                other.number,
                name.base,
                prev.display(),
                candidate.display()
            )));
        }
    }

    for (expected, number) in (1..).zip(found.keys()) {
        if *number != expected {
            return Err(PolyglotError::MissingPart { base: name.base, number: expected });
        }
    }
    debug!(base = %name.base, parts = found.len(), "discovered parts");

    let mut parts: Vec<PathBuf> = found.into_values().collect();
    match parts.len() {
        0 | 1 => Ok(Discovery::Single(parts.pop().unwrap_or_else(|| path.to_owned()))),
        _ => Ok(Discovery::Candidates(parts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, b"x").unwrap();
        p
    }

    #[test]
    fn plain_file_is_single() {
        let dir = tempdir().unwrap();
        let p = touch(dir.path(), "movie.mp4");
        assert_eq!(discover_parts(&p).unwrap(), Discovery::Single(p));
    }

    #[test]
    fn lone_part_is_single() {
        let dir = tempdir().unwrap();
        let p = touch(dir.path(), "movie_part1.mp4");
        assert_eq!(discover_parts(&p).unwrap(), Discovery::Single(p));
    }

    #[test]
    fn siblings_sorted_by_number() {
        let dir = tempdir().unwrap();
        let names = ["v_part10.mp4", "v_part02.mp4", "v_part1.mp4", "v_part3.mov"];
        let paths: Vec<_> = names.iter().map(|n| touch(dir.path(), n)).collect();
        for n in 4..=9 {
            touch(dir.path(), &format!("v_part{n}.mp4"));
        }
        touch(dir.path(), "other_part1.mp4");
        touch(dir.path(), "v_part11.txt");

        let Discovery::Candidates(found) = discover_parts(&paths[0]).unwrap() else {
            panic!("expected candidates");
        };
        assert_eq!(found.len(), 10);
        assert_eq!(found[0], paths[2]);
        assert_eq!(found[1], paths[1]);
        assert_eq!(found[2], paths[3]);
        assert_eq!(found[9], paths[0]);
    }

    #[test]
    fn gap_reports_missing_part() {
        let dir = tempdir().unwrap();
        let p = touch(dir.path(), "clip_part1.mp4");
        touch(dir.path(), "clip_part3.mp4");
        let err = discover_parts(&p).unwrap_err();
        assert!(matches!(err, PolyglotError::MissingPart { number: 2, ref base } if base == "clip"));
    }

    #[test]
    fn duplicate_numbers_are_ambiguous() {
        let dir = tempdir().unwrap();
        let p = touch(dir.path(), "clip_part1.mp4");
        touch(dir.path(), "clip_part01.mov");
        assert!(matches!(discover_parts(&p), Err(PolyglotError::InvalidInput(_))));
    }
}
