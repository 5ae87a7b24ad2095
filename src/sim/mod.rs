//! In-process replicated cluster backed by a filesystem bucket store.
//!
//! Every node keeps its own replica of each table under
//! `{data_prefix}{node}/{table}/` in the shared bucket. Inserts write parts
//! locally and publish them to the table's replication log; other replicas
//! copy published parts once `replication_lag` has elapsed. Replication runs
//! lazily whenever a node executes a statement or the bucket is listed.

pub mod log;
pub mod part;
pub mod store;

use crate::controller::{
    ClusterController, Node, NodeConfig, NodeRef, ObjectRef, ObjectStoreClient, QueryOutput,
};
use crate::row::{render_values, Row, Value};
use crate::statement::{OutputFormat, Statement, TableSpec};
use anyhow::{bail, Context, Result};
use self::log::ReplicationLog;
use self::part::PartInfo;
use self::store::BucketStore;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Object written once per replica when its table is created.
pub const FORMAT_VERSION_FILE: &str = "format_version.txt";

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub root: PathBuf,
    pub bucket: String,
    pub data_prefix: String,
    /// Substituted for `{cluster}` in replication paths.
    pub cluster_name: String,
    pub replication_lag: Duration,
}

impl SimConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SimConfig {
            root: root.into(),
            bucket: "root".to_string(),
            data_prefix: "data/".to_string(),
            cluster_name: "test_cluster".to_string(),
            replication_lag: Duration::ZERO,
        }
    }
}

/// Failure modes injectable per node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFaults {
    /// Accept inserts without writing anything.
    pub drop_inserts: bool,
    /// Never fetch parts from other replicas.
    pub isolated: bool,
    /// Forget the table on drop but leave its objects in the bucket.
    pub leak_on_drop: bool,
}

struct Replica {
    spec: TableSpec,
    path: String,
    replica_name: String,
    prefix: String,
    parts: BTreeMap<String, PartInfo>,
    cursor: usize,
}

struct NodeState {
    name: String,
    faults: NodeFaults,
    tables: BTreeMap<String, Replica>,
}

struct ClusterState {
    config: SimConfig,
    store: BucketStore,
    nodes: Vec<NodeState>,
    logs: HashMap<String, ReplicationLog>,
}

/// Cheap to clone; all clones share one cluster.
#[derive(Clone)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl SimCluster {
    pub fn new(config: SimConfig) -> Self {
        let store = BucketStore::new(config.root.clone());
        SimCluster {
            state: Arc::new(Mutex::new(ClusterState {
                config,
                store,
                nodes: Vec::new(),
                logs: HashMap::new(),
            })),
        }
    }

    pub fn set_faults(&self, node: &str, faults: NodeFaults) -> Result<()> {
        let mut state = lock(&self.state)?;
        let node_state = state
            .nodes
            .iter_mut()
            .find(|n| n.name == node)
            .with_context(|| format!("no node named {}", node))?;
        node_state.faults = faults;
        Ok(())
    }

    fn handle(&self, index: usize, name: String) -> NodeRef {
        Arc::new(SimNode {
            state: Arc::clone(&self.state),
            index,
            name,
        })
    }

    /// Parts held by `node`'s replica of `table`, by name.
    pub fn parts(&self, node: &str, table: &str) -> Result<Vec<String>> {
        let state = lock(&self.state)?;
        let idx = state.node_index(node)?;
        let replica = state.nodes[idx]
            .tables
            .get(table)
            .with_context(|| format!("table {} doesn't exist on {}", table, node))?;
        Ok(replica.parts.keys().cloned().collect())
    }
}

fn lock(state: &Mutex<ClusterState>) -> Result<MutexGuard<'_, ClusterState>> {
    state.lock().map_err(|e| anyhow::anyhow!("lock: {}", e))
}

struct SimNode {
    state: Arc<Mutex<ClusterState>>,
    index: usize,
    name: String,
}

impl Node for SimNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, statement: &Statement) -> Result<QueryOutput> {
        let mut state = lock(&self.state)?;
        debug!(node = %self.name, statement = statement.kind(), "executing");
        state
            .execute(self.index, statement)
            .with_context(|| format!("{} on {}", statement.kind(), self.name))
    }
}

impl ClusterController for SimCluster {
    fn create_node(&self, config: NodeConfig) -> Result<NodeRef> {
        let mut state = lock(&self.state)?;
        if state.nodes.iter().any(|n| n.name == config.name) {
            bail!("node {} already exists", config.name);
        }
        let index = state.nodes.len();
        state.nodes.push(NodeState {
            name: config.name.clone(),
            faults: NodeFaults::default(),
            tables: BTreeMap::new(),
        });
        Ok(self.handle(index, config.name))
    }

    fn list_nodes(&self) -> Vec<NodeRef> {
        let names: Vec<String> = match self.state.lock() {
            Ok(state) => state.nodes.iter().map(|n| n.name.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().nodes.iter().map(|n| n.name.clone()).collect(),
        };
        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| self.handle(index, name))
            .collect()
    }
}

impl ObjectStoreClient for SimCluster {
    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        lock(&self.state)?.store.bucket_exists(bucket)
    }

    fn make_bucket(&self, bucket: &str) -> Result<()> {
        lock(&self.state)?.store.make_bucket(bucket)
    }

    fn remove_bucket(&self, bucket: &str) -> Result<()> {
        lock(&self.state)?.store.remove_bucket(bucket)
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRef>> {
        let mut state = lock(&self.state)?;
        state.sync(Instant::now())?;
        state.store.list(bucket, prefix)
    }
}

impl ClusterState {
    fn node_index(&self, name: &str) -> Result<usize> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .with_context(|| format!("no node named {}", name))
    }

    fn replica(&self, idx: usize, table: &str) -> Result<&Replica> {
        let node = &self.nodes[idx];
        node.tables
            .get(table)
            .with_context(|| format!("table {} doesn't exist on {}", table, node.name))
    }

    fn execute(&mut self, idx: usize, statement: &Statement) -> Result<QueryOutput> {
        self.sync(Instant::now())?;
        match statement {
            Statement::CreateTable(spec) => self.create_table(idx, spec),
            Statement::Insert { table, rows } => self.insert(idx, table, rows),
            Statement::Select {
                table,
                order_by,
                format,
            } => self.select(idx, table, order_by, *format),
            Statement::DropTable { table, if_exists } => self.drop_table(idx, table, *if_exists),
        }
    }

    fn create_table(&mut self, idx: usize, spec: &TableSpec) -> Result<QueryOutput> {
        if self.nodes[idx].tables.contains_key(&spec.name) {
            bail!("table {} already exists", spec.name);
        }
        validate_spec(spec)?;
        let bucket = self.config.bucket.clone();
        if !self.store.bucket_exists(&bucket)? {
            bail!("bucket '{}' does not exist", bucket);
        }

        let node_name = self.nodes[idx].name.clone();
        let path = spec
            .replication_path
            .replace("{cluster}", &self.config.cluster_name);
        let replica_name = spec.replica_name.replace("{instance}", &node_name);
        let prefix = format!("{}{}/{}/", self.config.data_prefix, node_name, spec.name);

        let log = self.logs.entry(path.clone()).or_default();
        if !log.register(&replica_name) {
            bail!("replica {} already exists at {}", replica_name, path);
        }
        if let Err(e) = self
            .store
            .put(&bucket, &format!("{}{}", prefix, FORMAT_VERSION_FILE), b"1")
        {
            self.unregister(&path, &replica_name);
            return Err(e);
        }

        self.nodes[idx].tables.insert(
            spec.name.clone(),
            Replica {
                spec: spec.clone(),
                path,
                replica_name,
                prefix,
                parts: BTreeMap::new(),
                cursor: 0,
            },
        );
        self.sync_replica(idx, &spec.name, Instant::now())?;
        Ok(QueryOutput::Empty)
    }

    fn insert(&mut self, idx: usize, table: &str, rows: &[Row]) -> Result<QueryOutput> {
        if self.nodes[idx].faults.drop_inserts {
            debug!(node = %self.nodes[idx].name, rows = rows.len(), "dropping insert");
            return Ok(QueryOutput::Empty);
        }
        let replica = self.replica(idx, table)?;
        let spec = replica.spec.clone();
        let prefix = replica.prefix.clone();
        let path = replica.path.clone();
        if rows.is_empty() {
            return Ok(QueryOutput::Empty);
        }

        let partition_col = spec
            .column_index(&spec.partition_by)
            .with_context(|| format!("unknown partition column {}", spec.partition_by))?;
        let key_cols = column_indexes(&spec, &spec.order_by)?;

        let mut by_partition: BTreeMap<Value, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let key = row
                .value(partition_col)
                .context("partition column out of range")?;
            by_partition.entry(key).or_default().push(row.clone());
        }

        let node_name = self.nodes[idx].name.clone();
        let bucket = self.config.bucket.clone();
        for (partition, mut part_rows) in by_partition {
            part_rows.sort_by(|a, b| a.cmp_by(b, &key_cols));
            let log = self
                .logs
                .get_mut(&path)
                .with_context(|| format!("replication log {} missing", path))?;
            let block = log.allocate_block();
            let name = part::part_name(&partition, block);
            let info = part::write_part(
                &self.store, &bucket, &prefix, &spec, &name, &partition, &part_rows,
            )?;
            log.publish(&node_name, info.clone(), Instant::now());
            debug!(node = %node_name, part = %name, rows = info.rows, "wrote part");
            if let Some(replica) = self.nodes[idx].tables.get_mut(table) {
                replica.parts.insert(name, info);
            }
        }
        Ok(QueryOutput::Empty)
    }

    fn select(
        &self,
        idx: usize,
        table: &str,
        order_by: &[String],
        format: OutputFormat,
    ) -> Result<QueryOutput> {
        let replica = self.replica(idx, table)?;
        let cols = column_indexes(&replica.spec, order_by)?;
        let mut rows = Vec::new();
        for info in replica.parts.values() {
            rows.extend(part::read_part(
                &self.store,
                &self.config.bucket,
                &replica.prefix,
                &replica.spec,
                info,
            )?);
        }
        rows.sort_by(|a, b| a.cmp_by(b, &cols));

        let text = match format {
            OutputFormat::Values => render_values(&rows),
            OutputFormat::TabSeparated => rows.iter().map(|r| r.to_tsv() + "\n").collect(),
        };
        Ok(QueryOutput::Text(text))
    }

    fn drop_table(&mut self, idx: usize, table: &str, if_exists: bool) -> Result<QueryOutput> {
        let Some(replica) = self.nodes[idx].tables.remove(table) else {
            if if_exists {
                return Ok(QueryOutput::Empty);
            }
            bail!("table {} doesn't exist on {}", table, self.nodes[idx].name);
        };
        if self.nodes[idx].faults.leak_on_drop {
            warn!(node = %self.nodes[idx].name, table, "leaving objects behind on drop");
        } else {
            let removed = part::remove_prefix(&self.store, &self.config.bucket, &replica.prefix)?;
            debug!(node = %self.nodes[idx].name, table, removed, "dropped replica");
        }
        self.unregister(&replica.path, &replica.replica_name);
        Ok(QueryOutput::Empty)
    }

    fn unregister(&mut self, path: &str, replica_name: &str) {
        let now_empty = match self.logs.get_mut(path) {
            Some(log) => log.unregister(replica_name),
            None => false,
        };
        if now_empty {
            self.logs.remove(path);
        }
    }

    /// Let every non-isolated replica fetch the parts that are due.
    fn sync(&mut self, now: Instant) -> Result<()> {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].faults.isolated {
                continue;
            }
            let tables: Vec<String> = self.nodes[idx].tables.keys().cloned().collect();
            for table in tables {
                self.sync_replica(idx, &table, now)?;
            }
        }
        Ok(())
    }

    fn sync_replica(&mut self, idx: usize, table: &str, now: Instant) -> Result<()> {
        if self.nodes[idx].faults.isolated {
            return Ok(());
        }
        let lag = self.config.replication_lag;
        let node_name = self.nodes[idx].name.clone();
        loop {
            let replica = self.replica(idx, table)?;
            let Some(entry) = self
                .logs
                .get(&replica.path)
                .and_then(|log| log.entry(replica.cursor))
            else {
                return Ok(());
            };
            let own = entry.source == node_name;
            if !own && !entry.is_due(now, lag) {
                return Ok(());
            }
            let info = entry.part.clone();
            let have = replica.parts.contains_key(&info.name);
            let path = replica.path.clone();
            let target = replica.prefix.clone();

            if !own && !have {
                match self.find_source(idx, &path, &info.name) {
                    Some(source) => {
                        part::copy_part(&self.store, &self.config.bucket, &source, &target, &info)
                            .with_context(|| format!("fetching part {}", info.name))?;
                        debug!(node = %node_name, part = %info.name, "fetched part");
                        if let Some(replica) = self.nodes[idx].tables.get_mut(table) {
                            replica.parts.insert(info.name.clone(), info);
                        }
                    }
                    None => warn!(node = %node_name, part = %info.name, "no replica holds part"),
                }
            }
            if let Some(replica) = self.nodes[idx].tables.get_mut(table) {
                replica.cursor += 1;
            }
        }
    }

    /// Prefix of another replica of `path` that holds `part`.
    fn find_source(&self, exclude: usize, path: &str, part: &str) -> Option<String> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != exclude)
            .flat_map(|(_, n)| n.tables.values())
            .find(|r| r.path == path && r.parts.contains_key(part))
            .map(|r| r.prefix.clone())
    }
}

fn column_indexes(spec: &TableSpec, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            spec.column_index(name)
                .with_context(|| format!("unknown column '{}' in table {}", name, spec.name))
        })
        .collect()
}

fn validate_spec(spec: &TableSpec) -> Result<()> {
    if !spec.matches_row_shape() {
        bail!(
            "table {} must have columns (Date, Int64, String), got {:?}",
            spec.name,
            spec.columns.iter().map(|c| c.ty).collect::<Vec<_>>()
        );
    }
    column_indexes(spec, std::slice::from_ref(&spec.partition_by))?;
    column_indexes(spec, &spec.order_by)?;
    for index in &spec.indices {
        if index.kind != "minmax" {
            bail!("unsupported index type {}", index.kind);
        }
        column_indexes(spec, std::slice::from_ref(&index.column))?;
    }
    Ok(())
}
