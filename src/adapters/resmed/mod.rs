//! ResMed EDF-based card format

pub mod edf;
pub mod loader;

pub use edf::{EdfAnnotation, EdfFile, EdfHeader, SignalParam};

use std::path::Path;

use super::{collect_files, DeviceAdapter, DeviceImport, LoadContext};
use crate::error::ImportError;
use crate::types::DeviceFamily;

/// Adapter for ResMed SD cards
#[derive(Debug, Clone, Copy, Default)]
pub struct ResmedAdapter;

impl DeviceAdapter for ResmedAdapter {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Resmed
    }

    fn detect(&self, root: &Path) -> bool {
        if root.join(loader::IDENTIFICATION_FILE).is_file() {
            return true;
        }
        collect_files(root)
            .map(|files| files.iter().any(|path| loader::classify(path).is_some()))
            .unwrap_or(false)
    }

    fn load(&self, root: &Path, ctx: &LoadContext<'_>) -> Result<DeviceImport, ImportError> {
        loader::load_card(root, ctx)
    }
}
