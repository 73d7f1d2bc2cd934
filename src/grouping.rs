//! Session grouping
//!
//! Adjacent sessions of one sleep period form a meta-session; meta-sessions
//! are then keyed by the calendar date of their first session.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::GroupingConfig;
use crate::types::{duration_from_secs, DailyReport, ImportedSession};

/// Sessions belonging to one real-world sleep period
#[derive(Debug, Clone, PartialEq)]
pub struct MetaSession {
    pub sessions: Vec<ImportedSession>,
}

impl MetaSession {
    fn new(first: ImportedSession) -> Self {
        Self {
            sessions: vec![first],
        }
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.sessions.first().map(|s| s.session.start)
    }

    /// Latest end of any member
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.sessions.iter().map(|s| s.session.end).max()
    }

    /// Whether `next` continues this sleep period.
    fn accepts(&self, next: &ImportedSession, config: &GroupingConfig) -> bool {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            return false;
        };
        let max_gap = duration_from_secs(config.max_gap_hours * 3600.0);
        let max_span = duration_from_secs(config.max_span_hours * 3600.0);
        next.session.start <= end + max_gap && next.session.end - start < max_span
    }
}

/// Cluster sessions into meta-sessions, in chronological order.
pub fn group_meta_sessions(
    mut sessions: Vec<ImportedSession>,
    config: &GroupingConfig,
) -> Vec<MetaSession> {
    sessions.sort_by_key(|s| (s.session.start, s.session.end, s.session.id));

    let mut metas: Vec<MetaSession> = Vec::new();
    for imported in sessions {
        match metas.last_mut() {
            Some(meta) if meta.accepts(&imported, config) => meta.sessions.push(imported),
            _ => metas.push(MetaSession::new(imported)),
        }
    }
    metas
}

/// Calendar date a meta-session is filed under
pub fn day_key(start: DateTime<Utc>, config: &GroupingConfig) -> NaiveDate {
    (start + Duration::minutes(i64::from(config.utc_offset_minutes))).date_naive()
}

/// Group sessions into per-day reports, sorted by date.
///
/// Sessions and events inside each report are chronological. Statistics are
/// left empty for the derivation stage.
pub fn group_sessions(sessions: Vec<ImportedSession>, config: &GroupingConfig) -> Vec<DailyReport> {
    let mut days: BTreeMap<NaiveDate, DailyReport> = BTreeMap::new();

    for meta in group_meta_sessions(sessions, config) {
        let Some(start) = meta.start() else { continue };
        let date = day_key(start, config);
        let report = days.entry(date).or_insert_with(|| DailyReport {
            date,
            sessions: Vec::new(),
            events: Vec::new(),
            statistics: Vec::new(),
        });
        for imported in meta.sessions {
            report.sessions.push(imported.session);
            report.events.extend(imported.events);
        }
    }

    let mut reports: Vec<DailyReport> = days.into_values().collect();
    for report in &mut reports {
        report.sessions.sort_by_key(|s| (s.start, s.id));
        report.events.sort_by_key(|e| e.start);
    }
    reports
}
