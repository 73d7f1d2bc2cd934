//! Device family adapters
//!
//! Each adapter reads one vendor's card layout from disk and maps it onto the
//! family-agnostic [`ImportedSession`] contract consumed by the pipeline.

pub mod prs1;
pub mod resmed;

pub use prs1::Prs1Adapter;
pub use resmed::ResmedAdapter;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ImportConfig;
use crate::error::{ErrorClass, ImportError};
use crate::pipeline::CancellationToken;
use crate::types::{DeviceFamily, DeviceInfo, ImportedSession};

/// A file left out of the import because it could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Everything an adapter loaded from a card
#[derive(Debug, Clone)]
pub struct DeviceImport {
    pub device: Option<DeviceInfo>,
    pub sessions: Vec<ImportedSession>,
    pub skipped: Vec<SkippedFile>,
}

/// Settings and cancellation shared by a load
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub config: &'a ImportConfig,
    pub cancel: &'a CancellationToken,
}

impl LoadContext<'_> {
    /// Decide whether a failed file aborts the import or is recorded and
    /// skipped.
    pub fn skip_or_fail(
        &self,
        path: &Path,
        err: ImportError,
        skipped: &mut Vec<SkippedFile>,
    ) -> Result<(), ImportError> {
        let err = err.in_file(path.display().to_string());
        if err.class() == ErrorClass::Corrupt && self.config.skip_corrupt_files {
            tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
            skipped.push(SkippedFile {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Trait for device family adapters
pub trait DeviceAdapter: Sync {
    fn family(&self) -> DeviceFamily;

    /// Whether `root` looks like a card written by this family
    fn detect(&self, root: &Path) -> bool;

    /// Decode every session on the card
    fn load(&self, root: &Path, ctx: &LoadContext<'_>) -> Result<DeviceImport, ImportError>;
}

/// Pick the adapter that recognises the card at `root`.
pub fn detect_adapter(root: &Path) -> Option<Box<dyn DeviceAdapter>> {
    let candidates: [Box<dyn DeviceAdapter>; 2] = [Box::new(Prs1Adapter), Box::new(ResmedAdapter)];
    candidates.into_iter().find(|adapter| adapter.detect(root))
}

/// Every regular file below `root`, sorted by path.
pub(crate) fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IntegrityError, ProtocolError};

    #[test]
    fn test_collect_files_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("p1")).unwrap();
        std::fs::write(dir.path().join("p1/0000000002.001"), b"").unwrap();
        std::fs::write(dir.path().join("PROP.TXT"), b"").unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["PROP.TXT", "p1/0000000002.001"]);
    }

    #[test]
    fn test_skip_policy() {
        let cancel = CancellationToken::new();
        let config = ImportConfig::default();
        let ctx = LoadContext {
            config: &config,
            cancel: &cancel,
        };
        let mut skipped = Vec::new();

        let corrupt = ImportError::from(IntegrityError::BlockCrc {
            expected: 1,
            actual: 2,
        });
        assert!(ctx.skip_or_fail(Path::new("a.002"), corrupt, &mut skipped).is_ok());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].path, "a.002");

        let protocol = ImportError::from(ProtocolError::EmptySignalLayout);
        assert!(ctx.skip_or_fail(Path::new("b.005"), protocol, &mut skipped).is_err());

        let strict = ImportConfig {
            skip_corrupt_files: false,
            ..ImportConfig::default()
        };
        let ctx = LoadContext {
            config: &strict,
            cancel: &cancel,
        };
        let corrupt = ImportError::from(IntegrityError::MissingTerminator(3));
        assert!(ctx.skip_or_fail(Path::new("c.005"), corrupt, &mut skipped).is_err());
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn test_detect_nothing_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_adapter(dir.path()).is_none());
    }
}
