use serde::Serialize;

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct OracleReport {
    pub title: String,
    pub timestamp: String,
    pub scenario: ScenarioSummary,
    pub convergence: ConvergenceSummary,
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub nodes: usize,
    pub rows_per_node: usize,
    pub expected_rows: usize,
    pub parts_per_node: u64,
    pub expected_objects: u64,
    pub bucket: String,
    pub data_prefix: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvergenceSummary {
    pub polls: u32,
    pub elapsed_ms: u64,
}

/// A check that held. Failed checks surface as [`crate::error::OracleError`]
/// instead of a report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub claim: String,
    pub details: String,
}

impl CheckResult {
    pub fn new(name: &str, claim: &str, details: impl Into<String>) -> Self {
        CheckResult {
            name: name.to_string(),
            claim: claim.to_string(),
            details: details.into(),
        }
    }
}

impl OracleReport {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
