//! Report encoding
//!
//! Wraps the daily reports of an import in a JSON envelope identifying the
//! producer and the device they came from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::SkippedFile;
use crate::error::ImportError;
use crate::pipeline::ImportOutcome;
use crate::types::{DailyReport, DeviceInfo};
use crate::{FLUX_VERSION, PRODUCER_NAME};

/// Current envelope schema version
pub const ENVELOPE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub family: String,
    pub model: String,
    pub product_name: String,
    pub serial: String,
}

impl From<&DeviceInfo> for DeviceSummary {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            family: info.family.as_str().to_string(),
            model: info.model_number.clone(),
            product_name: info.product_name.clone(),
            serial: info.serial_number.clone(),
        }
    }
}

/// Headline numbers for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub usage_hours: f64,
    pub ahi: f64,
    pub rdi: f64,
    pub event_count: usize,
}

impl From<&DailyReport> for DaySummary {
    fn from(report: &DailyReport) -> Self {
        Self {
            date: report.date,
            usage_hours: report.usage_hours(),
            ahi: report.ahi(),
            rdi: report.rdi(),
            event_count: report.events.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub envelope_version: String,
    pub producer: Producer,
    pub device: Option<DeviceSummary>,
    pub computed_at_utc: DateTime<Utc>,
    pub summaries: Vec<DaySummary>,
    pub reports: Vec<DailyReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<SkippedFile>,
}

/// Encoder for import results
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, outcome: &ImportOutcome) -> ReportEnvelope {
        ReportEnvelope {
            envelope_version: ENVELOPE_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: FLUX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            device: outcome.device.as_ref().map(DeviceSummary::from),
            computed_at_utc: Utc::now(),
            summaries: outcome.reports.iter().map(DaySummary::from).collect(),
            reports: outcome.reports.clone(),
            skipped_files: outcome.skipped.clone(),
        }
    }

    pub fn encode_to_json(&self, outcome: &ImportOutcome, pretty: bool) -> Result<String, ImportError> {
        let envelope = self.encode(outcome);
        let json = if pretty {
            serde_json::to_string_pretty(&envelope)?
        } else {
            serde_json::to_string(&envelope)?
        };
        Ok(json)
    }
}
