use crate::error::OracleError;
use crate::footprint::FootprintModel;
use crate::retry::Backoff;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Bounded convergence poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    /// Give up once this much time has passed since the first poll.
    pub deadline_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        ConvergenceConfig {
            initial_interval_ms: 100,
            max_interval_ms: 2_000,
            backoff_factor: 2.0,
            deadline_ms: 10_000,
        }
    }
}

impl ConvergenceConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_interval_ms),
            max: Duration::from_millis(self.max_interval_ms),
            factor: self.backoff_factor,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// One oracle scenario. Every field has a default, so a TOML file only
/// lists what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Nodes written to; node `i` inserts partition `base_date + (i - 1)`.
    pub nodes: usize,
    pub rows_per_node: usize,
    pub base_date: NaiveDate,
    pub table: String,
    pub bucket: String,
    pub data_prefix: String,
    pub payload_len: usize,
    pub index_granularity: u32,
    /// Check the pre-drop object count against the footprint model.
    pub check_footprint: bool,
    pub convergence: ConvergenceConfig,
    pub footprint: FootprintModel,
    pub log_format: LogFormat,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            nodes: 3,
            rows_per_node: 4096,
            base_date: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
            table: "s3_test".to_string(),
            bucket: "root".to_string(),
            data_prefix: "data/".to_string(),
            payload_len: crate::generator::PAYLOAD_LEN,
            index_granularity: 512,
            check_footprint: true,
            convergence: ConvergenceConfig::default(),
            footprint: FootprintModel::test_schema(),
            log_format: LogFormat::Text,
        }
    }
}

impl ScenarioConfig {
    /// Defaults when `path` is `None`, otherwise the TOML file at `path`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                toml::from_str(&data)?
            }
            None => Self::default(),
        };
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.nodes == 0 {
            return Err(OracleError::Config("nodes must be at least 1".into()));
        }
        if self.rows_per_node == 0 {
            return Err(OracleError::Config("rows_per_node must be at least 1".into()));
        }
        if self.convergence.deadline_ms == 0 {
            return Err(OracleError::Config("convergence.deadline_ms must be positive".into()));
        }
        if self.convergence.initial_interval_ms == 0 {
            return Err(OracleError::Config(
                "convergence.initial_interval_ms must be positive".into(),
            ));
        }
        if self.convergence.max_interval_ms < self.convergence.initial_interval_ms {
            return Err(OracleError::Config(
                "convergence.max_interval_ms must be >= initial_interval_ms".into(),
            ));
        }
        if self.convergence.backoff_factor < 1.0 {
            return Err(OracleError::Config("convergence.backoff_factor must be >= 1".into()));
        }
        if self.table.is_empty() || self.bucket.is_empty() {
            return Err(OracleError::Config("table and bucket must be named".into()));
        }
        if self.partition_for(self.nodes).is_none() {
            return Err(OracleError::Config(format!(
                "base_date {} plus {} days is out of range",
                self.base_date,
                self.nodes - 1
            )));
        }
        Ok(())
    }

    /// Partition key written by the 1-based node `index`, or `None` past the
    /// last representable date.
    pub fn partition_for(&self, index: usize) -> Option<NaiveDate> {
        self.base_date
            .checked_add_days(Days::new(index.saturating_sub(1) as u64))
    }
}
