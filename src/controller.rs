//! Capabilities the oracle needs from the cluster under test.

use crate::statement::Statement;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type NodeRef = Arc<dyn Node>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        NodeConfig { name: name.into() }
    }
}

/// What a statement returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    Text(String),
    Empty,
}

impl QueryOutput {
    /// Result text; statements with no output read as an empty string.
    pub fn into_text(self) -> String {
        match self {
            QueryOutput::Text(s) => s,
            QueryOutput::Empty => String::new(),
        }
    }
}

/// One server of the cluster.
pub trait Node: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, statement: &Statement) -> Result<QueryOutput>;
}

/// Creates and enumerates nodes.
pub trait ClusterController: Send + Sync {
    fn create_node(&self, config: NodeConfig) -> Result<NodeRef>;
    /// Nodes in creation order.
    fn list_nodes(&self) -> Vec<NodeRef>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
}

/// The bucket side of the backing object store.
pub trait ObjectStoreClient: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> Result<bool>;
    fn make_bucket(&self, bucket: &str) -> Result<()>;
    /// Fails when the bucket still holds objects.
    fn remove_bucket(&self, bucket: &str) -> Result<()>;
    /// Objects whose key starts with `prefix`, sorted by key.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRef>>;
}

/// Create `node1..=nodeN` on the controller.
pub fn bootstrap_nodes(controller: &dyn ClusterController, count: usize) -> Result<Vec<NodeRef>> {
    (1..=count)
        .map(|i| controller.create_node(NodeConfig::new(format!("node{}", i))))
        .collect()
}
