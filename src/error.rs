//! Error types for cpap-flux
//!
//! Decoding failures fall into three classes that callers treat differently:
//! format and integrity errors mean the file is unusable and can be skipped,
//! protocol errors mean the file uses a record layout we do not understand.

use thiserror::Error;

/// The file declares a format, family or version we do not decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported family {family} version {family_version} (format version {format_version})")]
    UnsupportedFamily {
        family: u8,
        family_version: u8,
        format_version: u8,
    },

    #[error("unsupported header kind {0:#04x}")]
    UnsupportedHeaderKind(u8),

    #[error("unsupported file extension code {0}")]
    UnsupportedExtension(u8),

    #[error("unsupported sample format {0:#04x}")]
    UnsupportedSampleFormat(u8),

    #[error("not an EDF file: {0}")]
    NotEdf(String),

    #[error("no supported device card found at {0}")]
    UnrecognizedCard(String),
}

/// The bytes on disk do not match what the file claims about itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("header checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    HeaderChecksum { expected: u8, actual: u8 },

    #[error("block CRC mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    BlockCrc { expected: u16, actual: u16 },

    #[error("truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("missing header terminator byte (found {0:#04x})")]
    MissingTerminator(u8),

    #[error("block length {block_length} is smaller than its {overhead}-byte framing")]
    BlockTooShort { block_length: u16, overhead: usize },

    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("malformed EDF field '{field}': {value:?}")]
    MalformedEdfField { field: String, value: String },
}

/// The records are well-formed bytes but do not follow the expected grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown event code {code:#04x} at offset {offset}")]
    UnknownEventCode { code: u8, offset: usize },

    #[error("unknown summary code {code:#04x} at offset {offset}")]
    UnknownSummaryCode { code: u8, offset: usize },

    #[error("unknown operating mode {0:#04x}")]
    UnknownMode(u8),

    #[error("mask on at {0} while a mask interval is already open")]
    MaskAlreadyOn(String),

    #[error("mask off at {0} without a matching mask on")]
    MaskNotOn(String),

    #[error("mask interval opened at {0} was never closed")]
    UnclosedMaskInterval(String),

    #[error("expected a {expected} chunk, found extension code {found}")]
    UnexpectedChunkKind { expected: &'static str, found: u8 },

    #[error("waveform chunk has no channels")]
    EmptySignalLayout,

    #[error("waveform layout changed between chunks of session {0}")]
    LayoutMismatch(u32),
}

/// How a caller should react to a failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unsupported or corrupted file; skipping it keeps the rest of the import valid.
    Corrupt,
    /// Undocumented record layout or device variant.
    Protocol,
    /// Environment failure; the import cannot continue.
    Fatal,
}

/// Errors that can occur while importing therapy data
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{path}: {source}")]
    InFile {
        path: String,
        #[source]
        source: Box<ImportError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("import cancelled")]
    Cancelled,
}

impl ImportError {
    /// Attach the path of the file being decoded.
    pub fn in_file(self, path: impl Into<String>) -> Self {
        match self {
            already @ ImportError::InFile { .. } => already,
            other => ImportError::InFile {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// Classify the error for skip-or-abort decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            ImportError::Format(_) | ImportError::Integrity(_) => ErrorClass::Corrupt,
            ImportError::Protocol(_) => ErrorClass::Protocol,
            ImportError::InFile { source, .. } => source.class(),
            ImportError::Io(_)
            | ImportError::Json(_)
            | ImportError::Config(_)
            | ImportError::Cancelled => ErrorClass::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
