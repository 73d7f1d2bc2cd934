//! cpap-flux - CPAP therapy-data ingestion and signal derivation
//!
//! cpap-flux decodes the recordings written by CPAP devices onto their SD
//! cards and turns them into per-day therapy reports through a
//! deterministic pipeline: device adapter → session grouping → breath
//! detection → derived signals → threshold events → statistics.
//!
//! ## Device families
//!
//! - **PRS1**: Philips Respironics System One chunked binary files
//! - **ResMed**: EDF/EDF+ recordings

pub mod adapters;
pub mod breath;
pub mod config;
pub mod detectors;
pub mod encoder;
pub mod error;
pub mod features;
pub mod filter;
pub mod grouping;
pub mod pipeline;
pub mod stats;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::PipelineConfig;
pub use error::{ErrorClass, ImportError};
pub use pipeline::{import_directory, CancellationToken, ImportOutcome, ImportProcessor};
pub use types::{DailyReport, ReportedEvent, Session, Signal};

/// Library version embedded in every report envelope
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for report envelopes
pub const PRODUCER_NAME: &str = "cpap-flux";
