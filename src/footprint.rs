use serde::{Deserialize, Serialize};

/// Predicts how many objects the backing bucket holds for a replicated table.
///
/// Every replica keeps `files_overhead` store-level objects plus
/// `files_overhead_per_part` objects for each part it holds. The per-part
/// figure is `files_overhead_per_column` (data + mark file) per stored column
/// plus an engine-specific constant for checksums, metadata and index files.
/// The constants are calibrated against one engine and schema; supply your own
/// for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FootprintModel {
    pub files_overhead: u64,
    pub files_overhead_per_column: u64,
    pub files_overhead_per_part: u64,
}

impl FootprintModel {
    /// Constants for the `(dt Date, id Int64, data String)` table with one
    /// minmax skip index: `2 * 3 + 8 = 14` objects per part.
    pub fn test_schema() -> Self {
        Self::for_columns(1, 2, 3, 8)
    }

    pub fn for_columns(
        files_overhead: u64,
        files_overhead_per_column: u64,
        columns: u64,
        per_part_extra: u64,
    ) -> Self {
        FootprintModel {
            files_overhead,
            files_overhead_per_column,
            files_overhead_per_part: files_overhead_per_column * columns + per_part_extra,
        }
    }

    /// Objects expected once every one of `nodes` replicas holds
    /// `parts_per_node` parts.
    pub fn expected_objects(&self, nodes: u64, parts_per_node: u64) -> u64 {
        nodes * (self.files_overhead + self.files_overhead_per_part * parts_per_node)
    }
}

impl Default for FootprintModel {
    fn default() -> Self {
        Self::test_schema()
    }
}
