//! Layered pipeline configuration
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables (`CPAPFLUX_*` prefix, `__` as section separator)
//!
//! `CPAPFLUX_EVENTS__LEAK_REDLINE=30` maps to `events.leak_redline`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CPAPFLUX_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

/// Session grouping rules
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Largest gap between sessions of one sleep period
    pub max_gap_hours: f64,
    /// Longest first-start to last-end span of one sleep period
    pub max_span_hours: f64,
    /// Offset applied to UTC timestamps before taking the calendar date
    pub utc_offset_minutes: i32,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_gap_hours: 4.0,
            max_span_hours: 24.0,
            utc_offset_minutes: 0,
        }
    }
}

/// Breath detector settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreathConfig {
    pub filter_cutoff_hz: f64,
    /// Replace the zero baseline with a trailing mean before sign classification
    pub variable_baseline: bool,
    pub baseline_window_secs: f64,
}

impl Default for BreathConfig {
    fn default() -> Self {
        Self {
            filter_cutoff_hz: 1.0,
            variable_baseline: false,
            baseline_window_secs: 10.0,
        }
    }
}

/// Derived signal settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DerivedConfig {
    pub respiration_window_secs: f64,
    pub ie_window_secs: f64,
    pub ahi_window_secs: f64,
    pub ahi_max: f64,
}

impl Default for DerivedConfig {
    fn default() -> Self {
        Self {
            respiration_window_secs: 60.0,
            ie_window_secs: 30.0,
            ahi_window_secs: 3600.0,
            ahi_max: 60.0,
        }
    }
}

/// Threshold event generator settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// No generated events during the first seconds of a session
    pub grace_period_secs: f64,
    pub interpolate_crossings: bool,
    /// L/min
    pub leak_redline: f64,
    pub leak_min_secs: f64,
    pub flow_limit_redline: f64,
    pub flow_limit_min_secs: f64,
    pub flow_reduction_fraction: f64,
    pub flow_reduction_window_secs: f64,
    pub flow_reduction_arousal_delay_secs: f64,
    pub flow_reduction_min_secs: f64,
    pub flow_reduction_cutoff_hz: f64,
    pub desaturation_drop: f64,
    pub desaturation_baseline_secs: f64,
    pub desaturation_min_secs: f64,
    pub desaturation_max_secs: f64,
    pub hypoxemia_threshold: f64,
    pub hypoxemia_min_secs: f64,
    pub hypoxemia_max_secs: f64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30.0,
            interpolate_crossings: true,
            leak_redline: 24.0,
            leak_min_secs: 10.0,
            flow_limit_redline: 0.3,
            flow_limit_min_secs: 3.0,
            flow_reduction_fraction: 0.5,
            flow_reduction_window_secs: 120.0,
            flow_reduction_arousal_delay_secs: 5.0,
            flow_reduction_min_secs: 10.0,
            flow_reduction_cutoff_hz: 1.0,
            desaturation_drop: 3.0,
            desaturation_baseline_secs: 120.0,
            desaturation_min_secs: 1.0,
            desaturation_max_secs: 120.0,
            hypoxemia_threshold: 88.0,
            hypoxemia_min_secs: 1.0,
            hypoxemia_max_secs: 120.0,
        }
    }
}

/// Import behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Skip files with format or integrity errors instead of aborting
    pub skip_corrupt_files: bool,
    /// Worker threads for per-day processing (0 = rayon default)
    pub worker_threads: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            skip_corrupt_files: true,
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub breath: BreathConfig,
    #[serde(default)]
    pub derived: DerivedConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

impl PipelineConfig {
    /// Load defaults and environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load defaults, an optional TOML file, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the figment provider chain.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values the algorithms cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("breath.filter_cutoff_hz", self.breath.filter_cutoff_hz)?;
        positive("breath.baseline_window_secs", self.breath.baseline_window_secs)?;
        positive("derived.respiration_window_secs", self.derived.respiration_window_secs)?;
        positive("derived.ie_window_secs", self.derived.ie_window_secs)?;
        positive("derived.ahi_window_secs", self.derived.ahi_window_secs)?;
        positive("grouping.max_span_hours", self.grouping.max_span_hours)?;
        positive("events.flow_reduction_window_secs", self.events.flow_reduction_window_secs)?;
        positive("events.flow_reduction_cutoff_hz", self.events.flow_reduction_cutoff_hz)?;
        positive("events.desaturation_baseline_secs", self.events.desaturation_baseline_secs)?;

        let fraction = self.events.flow_reduction_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "events.flow_reduction_fraction".to_string(),
                reason: format!("must be within (0, 1), got {fraction}"),
            });
        }
        if self.events.desaturation_min_secs > self.events.desaturation_max_secs {
            return Err(ConfigError::InvalidValue {
                field: "events.desaturation_min_secs".to_string(),
                reason: "exceeds desaturation_max_secs".to_string(),
            });
        }
        if self.grouping.max_gap_hours < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "grouping.max_gap_hours".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be positive, got {value}"),
        })
    }
}
