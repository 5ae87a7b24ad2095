//! Consistency and object-footprint oracle for replicated tables whose parts
//! live in an object store.
//!
//! The [`oracle::Oracle`] drives inserts through a [`controller::ClusterController`],
//! waits for the replicas to converge, then checks that every replica returns
//! the same ordered rows and that the bucket holds exactly the number of
//! objects the [`footprint::FootprintModel`] predicts. The `sim` feature adds
//! an in-process cluster implementing the controller traits.

pub mod config;
pub mod controller;
pub mod error;
pub mod footprint;
pub mod generator;
pub mod oracle;
pub mod report;
pub mod retry;
pub mod row;
#[cfg(feature = "sim")]
pub mod sim;
pub mod statement;
pub mod telemetry;
