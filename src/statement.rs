use crate::row::{ColumnType, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            ty,
        }
    }
}

/// A data-skipping index, e.g. `INDEX min_max (id) TYPE minmax GRANULARITY 3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub column: String,
    pub kind: String,
    pub granularity: u32,
}

/// Everything `CREATE TABLE` needs for a replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indices: Vec<IndexDef>,
    /// Coordination path shared by all replicas; may contain `{cluster}`.
    pub replication_path: String,
    /// Replica name; may contain `{instance}`.
    pub replica_name: String,
    pub partition_by: String,
    pub order_by: Vec<String>,
    pub settings: BTreeMap<String, String>,
}

impl TableSpec {
    /// The `(dt Date, id Int64, data String)` table partitioned by `dt`,
    /// ordered by `(dt, id)`, with a minmax index on `id` and eager removal
    /// of outdated parts.
    pub fn test_schema(name: &str, index_granularity: u32) -> Self {
        let mut settings = BTreeMap::new();
        settings.insert("old_parts_lifetime".to_string(), "0".to_string());
        settings.insert(
            "index_granularity".to_string(),
            index_granularity.to_string(),
        );
        TableSpec {
            name: name.to_string(),
            columns: vec![
                ColumnDef::new("dt", ColumnType::Date),
                ColumnDef::new("id", ColumnType::Int64),
                ColumnDef::new("data", ColumnType::String),
            ],
            indices: vec![IndexDef {
                name: "min_max".to_string(),
                column: "id".to_string(),
                kind: "minmax".to_string(),
                granularity: 3,
            }],
            replication_path: format!("/clickhouse/{{cluster}}/tables/test/{}", name),
            replica_name: "{instance}".to_string(),
            partition_by: "dt".to_string(),
            order_by: vec!["dt".to_string(), "id".to_string()],
            settings,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Whether the column types line up with [`Row`].
    pub fn matches_row_shape(&self) -> bool {
        self.columns.len() == Row::SHAPE.len()
            && self
                .columns
                .iter()
                .zip(Row::SHAPE.iter())
                .all(|(c, ty)| c.ty == *ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Values,
    TabSeparated,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Values => f.write_str("Values"),
            OutputFormat::TabSeparated => f.write_str("TabSeparated"),
        }
    }
}

/// The statements the oracle issues against a node. `Display` renders SQL
/// text for controllers that talk to a real server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable(TableSpec),
    Insert {
        table: String,
        rows: Vec<Row>,
    },
    Select {
        table: String,
        order_by: Vec<String>,
        format: OutputFormat,
    },
    DropTable {
        table: String,
        if_exists: bool,
    },
}

impl Statement {
    /// `SELECT * FROM table ORDER BY <sorting key> FORMAT Values`.
    pub fn select_ordered(spec: &TableSpec) -> Self {
        Statement::Select {
            table: spec.name.clone(),
            order_by: spec.order_by.clone(),
            format: OutputFormat::Values,
        }
    }

    pub fn drop_if_exists(table: &str) -> Self {
        Statement::DropTable {
            table: table.to_string(),
            if_exists: true,
        }
    }

    /// Short label for logs, without row payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateTable(_) => "CREATE TABLE",
            Statement::Insert { .. } => "INSERT",
            Statement::Select { .. } => "SELECT",
            Statement::DropTable { .. } => "DROP TABLE",
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable(spec) => {
                writeln!(f, "CREATE TABLE {} (", spec.name)?;
                let mut defs: Vec<String> = spec
                    .columns
                    .iter()
                    .map(|c| format!("    {} {}", c.name, c.ty))
                    .collect();
                defs.extend(spec.indices.iter().map(|i| {
                    format!(
                        "    INDEX {} ({}) TYPE {} GRANULARITY {}",
                        i.name, i.column, i.kind, i.granularity
                    )
                }));
                writeln!(f, "{}", defs.join(",\n"))?;
                writeln!(
                    f,
                    ") ENGINE=ReplicatedMergeTree('{}', '{}')",
                    spec.replication_path, spec.replica_name
                )?;
                writeln!(f, "PARTITION BY {}", spec.partition_by)?;
                write!(f, "ORDER BY ({})", spec.order_by.join(", "))?;
                if !spec.settings.is_empty() {
                    let settings: Vec<String> = spec
                        .settings
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect();
                    write!(f, "\nSETTINGS {}", settings.join(", "))?;
                }
                Ok(())
            }
            Statement::Insert { table, rows } => {
                write!(
                    f,
                    "INSERT INTO {} VALUES {}",
                    table,
                    crate::row::render_values(rows)
                )
            }
            Statement::Select {
                table,
                order_by,
                format,
            } => {
                write!(f, "SELECT * FROM {}", table)?;
                if !order_by.is_empty() {
                    write!(f, " ORDER BY {}", order_by.join(", "))?;
                }
                write!(f, " FORMAT {}", format)
            }
            Statement::DropTable { table, if_exists } => {
                if *if_exists {
                    write!(f, "DROP TABLE IF EXISTS {}", table)
                } else {
                    write!(f, "DROP TABLE {}", table)
                }
            }
        }
    }
}
