use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, PolyglotError, Result};

/// File extensions treated as media containers when discovering parts.
pub const CONTAINER_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

/// Read-only media file whose bytes prefix every polyglot output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTemplate {
    path: PathBuf,
    size: u64,
}

impl ContainerTemplate {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PolyglotError::InputNotFound(path.to_owned()));
        }
        let meta = std::fs::metadata(path).io_context("stat", path)?;
        if !meta.is_file() {
            return Err(PolyglotError::InputNotFound(path.to_owned()));
        }
        Ok(Self { path: path.to_owned(), size: meta.len() })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn size(&self) -> u64 { self.size }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub fn reader(&self) -> Result<File> {
        File::open(&self.path).io_context("open", &self.path)
    }
}

pub fn is_container_extension(ext: &str) -> bool {
    CONTAINER_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_records_size() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("clip.mp4");
        std::fs::write(&p, [0xAAu8; 100]).unwrap();
        let t = ContainerTemplate::open(&p).unwrap();
        assert_eq!(t.size(), 100);
        assert_eq!(t.extension(), Some("mp4"));
    }

    #[test]
    fn missing_or_directory_is_input_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ContainerTemplate::open(dir.path().join("nope.mp4")),
            Err(PolyglotError::InputNotFound(_))
        ));
        assert!(matches!(ContainerTemplate::open(dir.path()), Err(PolyglotError::InputNotFound(_))));
    }

    #[test]
    fn container_extensions() {
        assert!(is_container_extension("MKV"));
        assert!(!is_container_extension("zip"));
    }
}
