#![allow(dead_code)]

use chrono::NaiveDate;
use replicheck::config::ScenarioConfig;
use replicheck::controller::{bootstrap_nodes, Node, NodeRef, ObjectStoreClient};
use replicheck::error::OracleError;
use replicheck::generator::{generate, Sign};
use replicheck::oracle::Oracle;
use replicheck::row::{parse_values, Batch};
use replicheck::sim::{NodeFaults, SimCluster, SimConfig};
use replicheck::statement::Statement;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Cluster helpers
// ---------------------------------------------------------------------------

pub fn setup_cluster(dir: &Path, nodes: usize, lag: Duration) -> (SimCluster, Vec<NodeRef>) {
    let mut config = SimConfig::new(dir);
    config.replication_lag = lag;
    let cluster = SimCluster::new(config);
    let handles = bootstrap_nodes(&cluster, nodes).unwrap();
    (cluster, handles)
}

/// Scenario with a short convergence deadline so failing polls end quickly.
pub fn scenario(nodes: usize, rows: usize) -> ScenarioConfig {
    let mut config = ScenarioConfig::default();
    config.nodes = nodes;
    config.rows_per_node = rows;
    config.convergence.initial_interval_ms = 10;
    config.convergence.max_interval_ms = 50;
    config.convergence.deadline_ms = 500;
    config
}

pub fn oracle(cluster: &SimCluster, config: ScenarioConfig) -> Oracle {
    Oracle::with_cluster(config, cluster.clone()).unwrap()
}

pub fn faults(f: impl FnOnce(&mut NodeFaults)) -> NodeFaults {
    let mut faults = NodeFaults::default();
    f(&mut faults);
    faults
}

pub fn object_count(cluster: &SimCluster) -> usize {
    cluster.list_objects("root", "data/").unwrap().len()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PropertyReport {
    pub title: String,
    pub timestamp: String,
    pub properties: Vec<PropertyResult>,
}

#[derive(Debug, Serialize)]
pub struct PropertyResult {
    pub name: String,
    pub claim: String,
    pub methodology: String,
    pub sample_size: usize,
    pub passed: bool,
    pub details: String,
}

// ---------------------------------------------------------------------------
// Checker functions (reusable from both tests and report generator)
// ---------------------------------------------------------------------------

/// Check 1 (Ordered Merge): every replica returns the (date, id) merge of all
/// batches, including batches with negative ids.
pub fn check_ordered_merge(dir: &Path, nodes: usize, rows: usize) -> PropertyResult {
    let (cluster, handles) = setup_cluster(dir, nodes, Duration::ZERO);
    let oracle = oracle(&cluster, scenario(nodes, rows));
    oracle.prepare_bucket().unwrap();
    let guard = oracle.provision(&handles).unwrap();

    // Write partitions in reverse node order with alternating signs so the
    // expected sequence is a real merge, not a concatenation.
    let writes: Vec<(NodeRef, Batch)> = handles
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let sign = if i % 2 == 0 { Sign::Negative } else { Sign::Positive };
            let date = day((nodes - i) as u32);
            (node.clone(), generate(date, rows, sign))
        })
        .collect();
    let expected = oracle.populate_batches(writes).unwrap();
    oracle.await_convergence(&handles).unwrap();
    let result = oracle.verify_consistency(&handles, &expected);

    let merged = parse_values(&expected.values).unwrap();
    let sorted = merged
        .windows(2)
        .all(|w| (w[0].date, w[0].id) < (w[1].date, w[1].id));
    guard.finish().unwrap();

    let passed = result.is_ok() && sorted && merged.len() == nodes * rows;
    PropertyResult {
        name: "Ordered Merge".to_string(),
        claim: "Every replica returns the merge by (date, id) of all submitted batches".to_string(),
        methodology: format!(
            "{} nodes each inserted {} rows into a distinct partition, mixed id signs, compared each ORDER BY dt, id read",
            nodes, rows
        ),
        sample_size: nodes * rows,
        passed,
        details: match result {
            Ok(check) => check.details,
            Err(e) => e.to_string(),
        },
    }
}

/// Check 2 (Drop Idempotence): repeated `DROP TABLE IF EXISTS` is a no-op.
pub fn check_drop_idempotent(dir: &Path, repeats: usize) -> PropertyResult {
    let (cluster, handles) = setup_cluster(dir, 3, Duration::ZERO);
    let oracle = oracle(&cluster, scenario(3, 16));
    oracle.prepare_bucket().unwrap();
    oracle.provision(&handles).unwrap().finish().unwrap();

    let mut failures = Vec::new();
    for _ in 0..repeats {
        for node in &handles {
            if let Err(e) = node.execute(&Statement::drop_if_exists("s3_test")) {
                failures.push(format!("{}: {:#}", node.name(), e));
            }
        }
    }

    PropertyResult {
        name: "Drop Idempotence".to_string(),
        claim: "DROP TABLE IF EXISTS on an already-dropped table succeeds without effect".to_string(),
        methodology: format!("Dropped the table, then re-issued the drop {} times on 3 nodes", repeats),
        sample_size: repeats * handles.len(),
        passed: failures.is_empty() && object_count(&cluster) == 0,
        details: if failures.is_empty() {
            "All repeated drops succeeded".to_string()
        } else {
            format!("Failures: {}", failures.join("; "))
        },
    }
}

/// Check 3 (Empty After Drop): no objects survive any create/insert/drop churn.
pub fn check_empty_after_churn(dir: &Path, cycles: usize) -> PropertyResult {
    let (cluster, handles) = setup_cluster(dir, 3, Duration::ZERO);
    let oracle = oracle(&cluster, scenario(3, 32));
    oracle.prepare_bucket().unwrap();

    let mut leaks = Vec::new();
    for cycle in 0..cycles {
        let guard = oracle.provision(&handles).unwrap();
        // Vary the number of inserts per cycle.
        for _ in 0..=(cycle % 3) {
            oracle.populate(&handles).unwrap();
        }
        guard.finish().unwrap();
        if let Err(e) = oracle.verify_cleanup() {
            leaks.push(format!("cycle {}: {}", cycle, e));
        }
    }

    PropertyResult {
        name: "Empty After Drop".to_string(),
        claim: "listObjects(data/) is empty immediately after the table is dropped".to_string(),
        methodology: format!(
            "Ran {} create/insert/drop cycles with 1-3 insert rounds each, listed the bucket after every drop",
            cycles
        ),
        sample_size: cycles,
        passed: leaks.is_empty(),
        details: if leaks.is_empty() {
            format!("Bucket empty after all {} cycles", cycles)
        } else {
            leaks.join("; ")
        },
    }
}

/// Check 4 (Footprint): the pre-drop object count matches the model.
pub fn check_footprint(dir: &Path, nodes: usize, rounds: usize) -> PropertyResult {
    let (cluster, handles) = setup_cluster(dir, nodes, Duration::ZERO);
    let oracle = oracle(&cluster, scenario(nodes, 64));
    oracle.prepare_bucket().unwrap();
    let guard = oracle.provision(&handles).unwrap();

    let mut parts = 0;
    for _ in 0..rounds {
        parts += oracle.populate(&handles).unwrap().parts_per_node;
    }
    oracle.await_convergence(&handles).unwrap();
    let expected = replicheck::oracle::ExpectedResult {
        parts_per_node: parts,
        ..Default::default()
    };
    let result = oracle.verify_footprint(nodes, &expected);
    let observed = object_count(&cluster);
    guard.finish().unwrap();

    let model = oracle.config().footprint;
    let want = model.expected_objects(nodes as u64, parts);
    PropertyResult {
        name: "Object Footprint".to_string(),
        claim: "Object count equals nodes * (files_overhead + files_overhead_per_part * parts)".to_string(),
        methodology: format!(
            "{} nodes inserted {} rounds of one batch each, listed data/ after convergence",
            nodes, rounds
        ),
        sample_size: observed,
        passed: result.is_ok() && observed as u64 == want,
        details: format!("observed {} objects, model predicts {}", observed, want),
    }
}

/// Check 5 (Skipped Insert Detected): a lost write fails the consistency check
/// with a row-count mismatch instead of passing silently.
pub fn check_skipped_insert_detected(dir: &Path, rows: usize) -> PropertyResult {
    let (cluster, _handles) = setup_cluster(dir, 3, Duration::ZERO);
    cluster
        .set_faults("node2", faults(|f| f.drop_inserts = true))
        .unwrap();
    let oracle = oracle(&cluster, scenario(3, rows));
    let outcome = oracle.run();

    let (passed, details) = match outcome {
        Err(OracleError::ConsistencyViolation {
            node,
            expected_rows,
            actual_rows,
            ..
        }) => (
            expected_rows == 3 * rows && actual_rows == 2 * rows,
            format!(
                "{} reported {} rows against {} expected",
                node, actual_rows, expected_rows
            ),
        ),
        Err(e) => (false, format!("wrong failure class {}: {}", e.class(), e)),
        Ok(_) => (false, "scenario passed despite a dropped insert".to_string()),
    };

    PropertyResult {
        name: "Skipped Insert Detected".to_string(),
        claim: "A lost insert fails the consistency check with a row-count mismatch".to_string(),
        methodology: format!(
            "node2 silently dropped its {}-row insert, ran the full scenario",
            rows
        ),
        sample_size: 3 * rows,
        passed: passed && object_count(&cluster) == 0,
        details,
    }
}

/// Check 6 (Reference Scenario): 3 nodes × 4096 rows on 2020-01-01/02/03.
pub fn check_reference_scenario(dir: &Path) -> PropertyResult {
    let (cluster, _handles) = setup_cluster(dir, 3, Duration::ZERO);
    let mut config = scenario(3, 4096);
    config.convergence.deadline_ms = 10_000;
    let oracle = oracle(&cluster, config);
    let outcome = oracle.run();

    let (passed, details) = match &outcome {
        Ok(report) => (
            report.checks.len() == 3
                && report.scenario.expected_rows == 12_288
                && report.scenario.expected_objects == 129,
            format!(
                "{} rows on every node, {} objects before drop, {} polls to converge",
                report.scenario.expected_rows,
                report.scenario.expected_objects,
                report.convergence.polls
            ),
        ),
        Err(e) => (false, e.to_string()),
    };

    PropertyResult {
        name: "Reference Scenario".to_string(),
        claim: "3 nodes x 4096 rows converge to 12288 identical ordered rows and 129 objects".to_string(),
        methodology: "Full oracle run: provision, populate, converge, verify, drop, verify cleanup"
            .to_string(),
        sample_size: 12_288,
        passed,
        details,
    }
}
