//! Drives a replicated-write scenario and checks its observable effects.

use crate::config::ScenarioConfig;
use crate::controller::{ClusterController, NodeRef, ObjectStoreClient};
use crate::error::{OracleError, Result};
use crate::generator::{self, Sign};
use crate::report::{CheckResult, ConvergenceSummary, OracleReport, ScenarioSummary};
use crate::retry::{self, PollError, Polled};
use crate::row::{parse_values, render_values, Batch};
use crate::statement::{Statement, TableSpec};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const CHECK_CONSISTENCY: &str = "Replica Consistency";
pub const CHECK_FOOTPRINT: &str = "Object Footprint";
pub const CHECK_CLEANUP: &str = "Cleanup After Drop";

/// What every replica should return once the inserts have replicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedResult {
    /// Submitted rows ordered by the sorting key, in `Values` format.
    pub values: String,
    pub rows: usize,
    pub inserts: usize,
    /// Parts each replica holds after convergence: one per partition touched
    /// by each insert, across all writers.
    pub parts_per_node: u64,
}

/// Drops the scenario table on every node it was created on. Call
/// [`TableGuard::finish`] to observe drop errors; otherwise the drop happens
/// when the guard goes out of scope, including during unwinding.
pub struct TableGuard {
    table: String,
    nodes: Vec<NodeRef>,
    armed: bool,
}

impl TableGuard {
    fn new(table: &str) -> Self {
        TableGuard {
            table: table.to_string(),
            nodes: Vec::new(),
            armed: true,
        }
    }

    pub fn finish(mut self) -> Result<()> {
        self.armed = false;
        let mut failures = Vec::new();
        for node in &self.nodes {
            if let Err(e) = node.execute(&Statement::drop_if_exists(&self.table)) {
                failures.push(format!("{}: {:#}", node.name(), e));
            }
        }
        if failures.is_empty() {
            info!(table = %self.table, nodes = self.nodes.len(), "table dropped");
            Ok(())
        } else {
            Err(OracleError::Controller {
                context: format!("dropping table {}", self.table),
                message: failures.join("; "),
            })
        }
    }
}

impl Drop for TableGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for node in &self.nodes {
            if let Err(e) = node.execute(&Statement::drop_if_exists(&self.table)) {
                warn!(node = %node.name(), table = %self.table, error = %format!("{:#}", e), "drop on exit failed");
            }
        }
    }
}

pub struct Oracle {
    config: ScenarioConfig,
    spec: TableSpec,
    controller: Arc<dyn ClusterController>,
    store: Arc<dyn ObjectStoreClient>,
}

impl Oracle {
    pub fn new(
        config: ScenarioConfig,
        controller: Arc<dyn ClusterController>,
        store: Arc<dyn ObjectStoreClient>,
    ) -> Result<Self> {
        config.validate()?;
        let spec = TableSpec::test_schema(&config.table, config.index_granularity);
        Ok(Oracle {
            config,
            spec,
            controller,
            store,
        })
    }

    /// For a cluster that is also its own object store client.
    pub fn with_cluster<C>(config: ScenarioConfig, cluster: C) -> Result<Self>
    where
        C: ClusterController + ObjectStoreClient + Clone + 'static,
    {
        Self::new(config, Arc::new(cluster.clone()), Arc::new(cluster))
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// The first `config.nodes` nodes of the cluster.
    pub fn nodes(&self) -> Result<Vec<NodeRef>> {
        let mut nodes = self.controller.list_nodes();
        if nodes.len() < self.config.nodes {
            return Err(OracleError::Provisioning(format!(
                "scenario needs {} nodes, cluster has {}",
                self.config.nodes,
                nodes.len()
            )));
        }
        nodes.truncate(self.config.nodes);
        Ok(nodes)
    }

    /// Recreate the bucket so the scenario starts from an empty store.
    pub fn prepare_bucket(&self) -> Result<()> {
        let bucket = &self.config.bucket;
        let exists = self
            .store
            .bucket_exists(bucket)
            .map_err(|e| OracleError::Provisioning(format!("checking bucket {}: {:#}", bucket, e)))?;
        if exists {
            self.store
                .remove_bucket(bucket)
                .map_err(|e| OracleError::Provisioning(format!("removing bucket {}: {:#}", bucket, e)))?;
        }
        self.store
            .make_bucket(bucket)
            .map_err(|e| OracleError::Provisioning(format!("creating bucket {}: {:#}", bucket, e)))?;
        info!(bucket = %bucket, "bucket ready");
        Ok(())
    }

    /// Create the scenario table on every node.
    pub fn provision(&self, nodes: &[NodeRef]) -> Result<TableGuard> {
        let mut guard = TableGuard::new(&self.spec.name);
        let create = Statement::CreateTable(self.spec.clone());
        for node in nodes {
            node.execute(&create).map_err(|e| {
                OracleError::Provisioning(format!(
                    "creating table {} on {}: {:#}",
                    self.spec.name,
                    node.name(),
                    e
                ))
            })?;
            guard.nodes.push(Arc::clone(node));
            debug!(node = %node.name(), table = %self.spec.name, "table created");
        }
        info!(table = %self.spec.name, nodes = nodes.len(), "table provisioned");
        Ok(guard)
    }

    /// Insert one generated batch per node: node `i` writes partition
    /// `base_date + (i - 1)` with positive ids.
    pub fn populate(&self, nodes: &[NodeRef]) -> Result<ExpectedResult> {
        let mut rng = rand::rng();
        let writes = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let key = self.config.partition_for(i + 1).ok_or_else(|| {
                    OracleError::Config(format!("no partition key for node {}", i + 1))
                })?;
                let batch = generator::generate_with(
                    &mut rng,
                    key,
                    self.config.rows_per_node,
                    Sign::Positive,
                    self.config.payload_len,
                );
                Ok((Arc::clone(node), batch))
            })
            .collect::<Result<Vec<_>>>()?;
        self.populate_batches(writes)
    }

    /// Submit each batch as a single insert on its node, in order. The
    /// expected result is every submitted row merged by the table's sorting
    /// key; for batches on ascending partition keys that is their
    /// concatenation in node order.
    pub fn populate_batches(&self, writes: Vec<(NodeRef, Batch)>) -> Result<ExpectedResult> {
        let mut expected = ExpectedResult::default();
        let mut merged = Vec::new();
        for (node, batch) in writes {
            let partitions = batch.partitions_touched() as u64;
            let rows = batch.len();
            node.execute(&Statement::Insert {
                table: self.spec.name.clone(),
                rows: batch.rows.clone(),
            })
            .map_err(|e| OracleError::controller(format!("inserting on {}", node.name()), e))?;

            merged.extend(batch.rows);
            expected.rows += rows;
            expected.inserts += 1;
            expected.parts_per_node += partitions;
            info!(node = %node.name(), rows, partitions, "batch inserted");
        }

        let key: Vec<usize> = self
            .spec
            .order_by
            .iter()
            .filter_map(|c| self.spec.column_index(c))
            .collect();
        merged.sort_by(|a, b| a.cmp_by(b, &key));
        expected.values = render_values(&merged);
        Ok(expected)
    }

    fn read_ordered(&self, node: &NodeRef) -> Result<String> {
        node.execute(&Statement::select_ordered(&self.spec))
            .map(|out| out.into_text())
            .map_err(|e| OracleError::controller(format!("reading from {}", node.name()), e))
    }

    /// Poll every node until all return the same ordered result, backing off
    /// between rounds. Fails once the configured deadline passes.
    pub fn await_convergence(&self, nodes: &[NodeRef]) -> Result<Polled<String>> {
        let convergence = &self.config.convergence;
        let mut distinct = 0;
        let polled = retry::poll_until(&convergence.backoff(), convergence.deadline(), |attempt| -> Result<Option<String>> {
            let results = nodes
                .iter()
                .map(|node| self.read_ordered(node))
                .collect::<Result<Vec<_>>>()?;
            let mut unique: Vec<&String> = results.iter().collect();
            unique.sort();
            unique.dedup();
            distinct = unique.len();
            debug!(attempt, distinct, "polled replicas");
            Ok(if distinct == 1 {
                results.into_iter().next()
            } else {
                None
            })
        });

        match polled {
            Ok(polled) => {
                info!(
                    polls = polled.attempts,
                    elapsed_ms = polled.elapsed.as_millis() as u64,
                    "replicas converged"
                );
                Ok(polled)
            }
            Err(PollError::Timeout { attempts, elapsed }) => {
                error!(attempts, elapsed_ms = elapsed.as_millis() as u64, distinct, "replicas did not converge");
                Err(OracleError::ConvergenceTimeout {
                    deadline: convergence.deadline(),
                    attempts,
                    distinct_results: distinct,
                })
            }
            Err(PollError::Failed(e)) => Err(e),
        }
    }

    /// Every node's ordered read must equal the expected merged sequence,
    /// byte for byte.
    pub fn verify_consistency(&self, nodes: &[NodeRef], expected: &ExpectedResult) -> Result<CheckResult> {
        for node in nodes {
            let actual = self.read_ordered(node)?;
            if actual == expected.values {
                debug!(node = %node.name(), rows = expected.rows, "replica matches");
                continue;
            }
            let (expected_rows, actual_rows, first_mismatch) =
                describe_mismatch(&expected.values, &actual);
            error!(node = %node.name(), expected_rows, actual_rows, %first_mismatch, "replica diverged");
            debug!(expected = %expected.values, actual = %actual, "diverging sequences");
            return Err(OracleError::ConsistencyViolation {
                node: node.name().to_string(),
                expected_rows,
                actual_rows,
                first_mismatch,
                expected: expected.values.clone(),
                actual,
            });
        }
        info!(nodes = nodes.len(), rows = expected.rows, "replicas consistent");
        Ok(CheckResult::new(
            CHECK_CONSISTENCY,
            "Every replica's ordered read equals the merged sequence of submitted batches",
            format!(
                "All {} nodes returned the same {} rows ordered by ({})",
                nodes.len(),
                expected.rows,
                self.spec.order_by.join(", ")
            ),
        ))
    }

    fn count_objects(&self) -> Result<Vec<String>> {
        let objects = self
            .store
            .list_objects(&self.config.bucket, &self.config.data_prefix)
            .map_err(|e| OracleError::controller(format!("listing {}", self.config.bucket), e))?;
        Ok(objects.into_iter().map(|o| o.key).collect())
    }

    /// Before drop: the bucket holds exactly what the footprint model predicts
    /// for `nodes` replicas of every part.
    pub fn verify_footprint(&self, nodes: usize, expected: &ExpectedResult) -> Result<CheckResult> {
        let want = self
            .config
            .footprint
            .expected_objects(nodes as u64, expected.parts_per_node);
        let found = self.count_objects()?.len() as u64;
        if found != want {
            error!(expected = want, found, prefix = %self.config.data_prefix, "footprint mismatch");
            return Err(OracleError::FootprintViolation {
                bucket: self.config.bucket.clone(),
                prefix: self.config.data_prefix.clone(),
                expected: want,
                actual: found,
            });
        }
        info!(objects = found, "footprint matches");
        Ok(CheckResult::new(
            CHECK_FOOTPRINT,
            "Object count equals nodes * (overhead + per_part * parts)",
            format!(
                "{} objects = {} * ({} + {} * {})",
                found,
                nodes,
                self.config.footprint.files_overhead,
                self.config.footprint.files_overhead_per_part,
                expected.parts_per_node
            ),
        ))
    }

    /// After drop: nothing may remain under the data prefix.
    pub fn verify_cleanup(&self) -> Result<CheckResult> {
        let keys = self.count_objects()?;
        if !keys.is_empty() {
            error!(remaining = keys.len(), prefix = %self.config.data_prefix, "objects left after drop");
            return Err(OracleError::CleanupLeak {
                bucket: self.config.bucket.clone(),
                prefix: self.config.data_prefix.clone(),
                remaining: keys.len(),
                sample: keys.into_iter().take(5).collect(),
            });
        }
        Ok(CheckResult::new(
            CHECK_CLEANUP,
            "No objects remain under the data prefix after the table is dropped",
            format!("{}/{} is empty", self.config.bucket, self.config.data_prefix),
        ))
    }

    /// Provision, populate, converge, verify, drop, verify cleanup. The table
    /// is dropped whether or not the checks pass.
    pub fn run(&self) -> Result<OracleReport> {
        let nodes = self.nodes()?;
        info!(
            nodes = nodes.len(),
            rows_per_node = self.config.rows_per_node,
            table = %self.spec.name,
            "starting scenario"
        );
        self.prepare_bucket()?;
        let guard = self.provision(&nodes)?;
        let outcome = self.exercise(&nodes);
        let dropped = guard.finish();

        match outcome {
            Ok(mut report) => {
                dropped?;
                report.checks.push(self.verify_cleanup()?);
                info!(checks = report.checks.len(), "scenario passed");
                Ok(report)
            }
            Err(e) => {
                if let Err(drop_err) = dropped {
                    warn!(error = %drop_err, "drop failed after scenario failure");
                } else if let Err(leak) = self.verify_cleanup() {
                    warn!(error = %leak, "cleanup check failed after scenario failure");
                }
                error!(class = e.class(), error = %e, "scenario failed");
                Err(e)
            }
        }
    }

    fn exercise(&self, nodes: &[NodeRef]) -> Result<OracleReport> {
        let expected = self.populate(nodes)?;
        let converged = self.await_convergence(nodes)?;
        let mut checks = vec![self.verify_consistency(nodes, &expected)?];
        if self.config.check_footprint {
            checks.push(self.verify_footprint(nodes.len(), &expected)?);
        }
        Ok(OracleReport {
            title: "Replicated table consistency and footprint".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario: ScenarioSummary {
                nodes: nodes.len(),
                rows_per_node: self.config.rows_per_node,
                expected_rows: expected.rows,
                parts_per_node: expected.parts_per_node,
                expected_objects: self
                    .config
                    .footprint
                    .expected_objects(nodes.len() as u64, expected.parts_per_node),
                bucket: self.config.bucket.clone(),
                data_prefix: self.config.data_prefix.clone(),
            },
            convergence: ConvergenceSummary {
                polls: converged.attempts,
                elapsed_ms: converged.elapsed.as_millis() as u64,
            },
            checks,
        })
    }
}

/// Row counts of both sides and where they first differ.
fn describe_mismatch(expected: &str, actual: &str) -> (usize, usize, String) {
    match (parse_values(expected), parse_values(actual)) {
        (Ok(e), Ok(a)) => {
            let message = match e.iter().zip(&a).position(|(x, y)| x != y) {
                Some(i) => format!(
                    "first difference at row {}: expected {}, got {}",
                    i,
                    e[i].to_values(),
                    a[i].to_values()
                ),
                None if e.len() > a.len() => format!(
                    "{} rows missing, first missing {}",
                    e.len() - a.len(),
                    e[a.len()].to_values()
                ),
                None if a.len() > e.len() => format!(
                    "{} unexpected rows, first extra {}",
                    a.len() - e.len(),
                    a[e.len()].to_values()
                ),
                None => "same rows, different formatting".to_string(),
            };
            (e.len(), a.len(), message)
        }
        (e, a) => {
            let offset = expected
                .bytes()
                .zip(actual.bytes())
                .position(|(x, y)| x != y)
                .unwrap_or_else(|| expected.len().min(actual.len()));
            (
                e.map(|rows| rows.len()).unwrap_or(0),
                a.map(|rows| rows.len()).unwrap_or(0),
                format!("output is not valid Values text; first difference at byte {}", offset),
            )
        }
    }
}
