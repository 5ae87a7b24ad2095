use std::time::Duration;
use thiserror::Error;

/// Why a scenario failed. Every variant is fatal for the scenario.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Bucket or table setup failed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// A replica's ordered read differs from the expected merged sequence.
    /// `expected` and `actual` carry the full result texts.
    #[error(
        "node {node} diverged: expected {expected_rows} rows, got {actual_rows}; {first_mismatch}"
    )]
    ConsistencyViolation {
        node: String,
        expected_rows: usize,
        actual_rows: usize,
        first_mismatch: String,
        expected: String,
        actual: String,
    },

    /// Object count before drop differs from the footprint prediction.
    #[error("footprint mismatch under {bucket}/{prefix}: expected {expected} objects, found {actual}")]
    FootprintViolation {
        bucket: String,
        prefix: String,
        expected: u64,
        actual: u64,
    },

    /// Objects survived the table drop. Points at engine or store cleanup,
    /// not replication.
    #[error("{remaining} objects left under {bucket}/{prefix} after drop (first: {sample:?})")]
    CleanupLeak {
        bucket: String,
        prefix: String,
        remaining: usize,
        sample: Vec<String>,
    },

    #[error("replicas did not converge within {deadline:?}: {distinct_results} distinct results after {attempts} polls")]
    ConvergenceTimeout {
        deadline: Duration,
        attempts: u32,
        distinct_results: usize,
    },

    #[error("{context}: {message}")]
    Controller { context: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OracleError {
    pub(crate) fn controller(context: impl Into<String>, err: anyhow::Error) -> Self {
        OracleError::Controller {
            context: context.into(),
            message: format!("{:#}", err),
        }
    }

    /// Short class name used in reports.
    pub fn class(&self) -> &'static str {
        match self {
            OracleError::Provisioning(_) => "provisioning",
            OracleError::ConsistencyViolation { .. } => "consistency",
            OracleError::FootprintViolation { .. } => "footprint",
            OracleError::CleanupLeak { .. } => "cleanup-leak",
            OracleError::ConvergenceTimeout { .. } => "convergence-timeout",
            OracleError::Controller { .. } => "controller",
            OracleError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
