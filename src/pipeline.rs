//! Pipeline orchestration
//!
//! This module provides the public API for cpap-flux. It runs a card from
//! disk through every stage: adapter load, session grouping, breath
//! detection, derived signals, threshold events and per-day statistics.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adapters::{detect_adapter, LoadContext, SkippedFile};
use crate::breath::detect_breaths;
use crate::config::{ConfigError, PipelineConfig};
use crate::detectors::EventGenerator;
use crate::error::{FormatError, ImportError, Result};
use crate::features::FeatureDeriver;
use crate::grouping::group_sessions;
use crate::stats::summarize;
use crate::types::{signal_names, DailyReport, DeviceInfo, ImportedSession, SourceType};

/// Cooperative cancellation flag shared between the caller and an import.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ImportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of importing one card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub device: Option<DeviceInfo>,
    /// Sorted by date
    pub reports: Vec<DailyReport>,
    pub skipped: Vec<SkippedFile>,
}

/// Import a card directory with the given configuration.
///
/// # Example
/// ```ignore
/// let outcome = import_directory(Path::new("/media/SDCARD"), &PipelineConfig::load()?)?;
/// for report in &outcome.reports {
///     println!("{} AHI {:.1}", report.date, report.ahi());
/// }
/// ```
pub fn import_directory(root: &Path, config: &PipelineConfig) -> Result<ImportOutcome> {
    ImportProcessor::new(config.clone()).import_directory(root)
}

/// Reusable importer holding a configuration and a cancellation token.
#[derive(Debug, Clone)]
pub struct ImportProcessor {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Default for ImportProcessor {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl ImportProcessor {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing token, e.g. one wired to a UI cancel button
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Detect the card family at `root`, load it, and derive every day.
    pub fn import_directory(&self, root: &Path) -> Result<ImportOutcome> {
        self.cancel.check()?;
        let adapter = detect_adapter(root)
            .ok_or_else(|| FormatError::UnrecognizedCard(root.display().to_string()))?;
        tracing::info!(
            family = adapter.family().as_str(),
            root = %root.display(),
            "importing card"
        );

        let ctx = LoadContext {
            config: &self.config.import,
            cancel: &self.cancel,
        };
        let import = adapter.load(root, &ctx)?;
        let reports = self.process_sessions(import.sessions)?;

        Ok(ImportOutcome {
            device: import.device,
            reports,
            skipped: import.skipped,
        })
    }

    /// Group decoded sessions into days and derive each day in parallel.
    pub fn process_sessions(&self, sessions: Vec<ImportedSession>) -> Result<Vec<DailyReport>> {
        let days = group_sessions(sessions, &self.config.grouping);

        let derive_all = || {
            days.into_par_iter()
                .map(|day| {
                    self.cancel.check()?;
                    Ok(self.derive_day(day))
                })
                .collect::<Result<Vec<_>>>()
        };

        let mut reports = if self.config.import.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.import.worker_threads)
                .build()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "import.worker_threads".to_string(),
                    reason: e.to_string(),
                })?;
            pool.install(derive_all)?
        } else {
            derive_all()?
        };

        reports.sort_by_key(|r| r.date);
        Ok(reports)
    }

    /// Enrich one day: derived signals, generated events and statistics.
    pub fn derive_day(&self, mut day: DailyReport) -> DailyReport {
        let deriver = FeatureDeriver::new(self.config.derived.clone());
        let generator = EventGenerator::new(self.config.events.clone());
        let mut breath_count = 0;

        for session in &mut day.sessions {
            if let Some(flow) = session.signal(signal_names::FLOW_RATE) {
                let breaths = detect_breaths(flow, &self.config.breath);
                breath_count += breaths.len();
                for signal in deriver.derive(&breaths, session.start, session.end) {
                    session.add_signal(signal);
                }
            }

            let generated = generator.generate(session, &day.events);
            day.events.extend(generated);

            if session.source_type == SourceType::Cpap {
                if let Some(trend) = deriver.ahi_trend(&day.events, session.start, session.end) {
                    session.add_signal(trend);
                }
            }
        }
        day.events.sort_by_key(|e| e.start);

        let mut pooled: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for signal in day.sessions.iter().flat_map(|s| &s.signals) {
            pooled
                .entry(signal.name.as_str())
                .or_default()
                .extend_from_slice(&signal.samples);
        }
        let statistics = pooled
            .into_iter()
            .filter_map(|(name, samples)| summarize(name, &samples))
            .collect();
        day.statistics = statistics;

        tracing::info!(
            date = %day.date,
            sessions = day.sessions.len(),
            events = day.events.len(),
            breaths = breath_count,
            "derived day"
        );
        day
    }
}
