//! Philips Respironics System One ("PRS1") chunked binary format

pub mod checksum;
pub mod chunk;
pub mod cursor;
pub mod events;
pub mod header;
pub mod loader;
pub mod properties;
pub mod settings;
pub mod summary;
pub mod waveform;

pub use chunk::DataChunk;
pub use cursor::ByteCursor;
pub use header::{FileKind, HeaderKind, HeaderRecord, SignalLayout};

use std::path::Path;

use super::{collect_files, DeviceAdapter, DeviceImport, LoadContext};
use crate::error::ImportError;
use crate::types::DeviceFamily;

/// Adapter for PRS1 SD cards
#[derive(Debug, Clone, Copy, Default)]
pub struct Prs1Adapter;

impl DeviceAdapter for Prs1Adapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Prs1
    }

    fn detect(&self, root: &Path) -> bool {
        let Ok(files) = collect_files(root) else {
            return false;
        };
        files.iter().any(|path| {
            let is_properties = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(properties::PROPERTIES_FILE));
            is_properties || loader::classify(path).is_some()
        })
    }

    fn load(&self, root: &Path, ctx: &LoadContext<'_>) -> Result<DeviceImport, ImportError> {
        loader::load_card(root, ctx)
    }
}

/// Decode the chunk headers of a single PRS1 file.
pub fn inspect_file(path: &Path) -> Result<Vec<HeaderRecord>, ImportError> {
    let bytes = std::fs::read(path)?;
    DataChunk::read_all(&bytes)
        .map(|chunks| chunks.into_iter().map(|c| c.header).collect())
        .map_err(|e| e.in_file(path.display().to_string()))
}
