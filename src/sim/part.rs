//! On-bucket layout of a table part.
//!
//! A part is a directory `{table_prefix}{part_name}/` holding, per column,
//! `{column}.bin` (bincode column data) and `{column}.mrk` (granule offsets),
//! plus `checksums.txt`, `columns.txt`, `count.txt`, `partition.dat`,
//! `minmax_{partition column}.idx`, `primary.idx`, and a `.idx`/`.mrk` pair per
//! skip index.

use crate::row::{Row, Value};
use crate::sim::store::{etag, BucketStore};
use crate::statement::TableSpec;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_INDEX_GRANULARITY: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub name: String,
    pub partition: Value,
    pub rows: usize,
    /// File names relative to the part directory.
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
enum ColumnData {
    Date(Vec<NaiveDate>),
    Int64(Vec<i64>),
    String(Vec<String>),
}

pub fn part_name(partition: &Value, block: u64) -> String {
    format!("{}_{}_{}_0", partition.partition_id(), block, block)
}

fn index_granularity(spec: &TableSpec) -> Result<usize> {
    let granularity = match spec.setting("index_granularity") {
        Some(g) => g
            .parse::<usize>()
            .with_context(|| format!("invalid index_granularity {:?}", g))?,
        None => DEFAULT_INDEX_GRANULARITY,
    };
    Ok(granularity.max(1))
}

fn column_index(spec: &TableSpec, name: &str) -> Result<usize> {
    spec.column_index(name)
        .with_context(|| format!("unknown column '{}' in table {}", name, spec.name))
}

fn min_max(rows: &[Row], col: usize) -> Option<(Value, Value)> {
    let mut values = rows.iter().filter_map(|r| r.value(col));
    let first = values.next()?;
    Some(values.fold((first.clone(), first), |(lo, hi), v| {
        let lo = if v < lo { v.clone() } else { lo };
        let hi = if v > hi { v } else { hi };
        (lo, hi)
    }))
}

/// Write `rows` (already sorted by the table sorting key) as part `name`.
pub fn write_part(
    store: &BucketStore,
    bucket: &str,
    table_prefix: &str,
    spec: &TableSpec,
    name: &str,
    partition: &Value,
    rows: &[Row],
) -> Result<PartInfo> {
    let granularity = index_granularity(spec)?;
    let marks: Vec<u64> = (0..rows.len()).step_by(granularity).map(|i| i as u64).collect();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    for (col, def) in spec.columns.iter().enumerate() {
        let data = match col {
            0 => ColumnData::Date(rows.iter().map(|r| r.date).collect()),
            1 => ColumnData::Int64(rows.iter().map(|r| r.id).collect()),
            2 => ColumnData::String(rows.iter().map(|r| r.data.clone()).collect()),
            _ => bail!("table {} has more columns than a row", spec.name),
        };
        files.push((
            format!("{}.bin", def.name),
            bincode::serialize(&data).context("encoding column")?,
        ));
        files.push((
            format!("{}.mrk", def.name),
            bincode::serialize(&marks).context("encoding marks")?,
        ));
    }

    let key_cols = spec
        .order_by
        .iter()
        .map(|c| column_index(spec, c))
        .collect::<Result<Vec<_>>>()?;
    let primary: Vec<Vec<Value>> = marks
        .iter()
        .map(|&m| {
            key_cols
                .iter()
                .filter_map(|&c| rows[m as usize].value(c))
                .collect()
        })
        .collect();
    files.push(("primary.idx".into(), bincode::serialize(&primary)?));

    let partition_col = column_index(spec, &spec.partition_by)?;
    files.push(("partition.dat".into(), bincode::serialize(partition)?));
    files.push((
        format!("minmax_{}.idx", spec.partition_by),
        bincode::serialize(&min_max(rows, partition_col))?,
    ));

    for index in &spec.indices {
        let col = column_index(spec, &index.column)?;
        let span = granularity * index.granularity.max(1) as usize;
        let granules: Vec<Option<(Value, Value)>> =
            rows.chunks(span).map(|chunk| min_max(chunk, col)).collect();
        let offsets: Vec<u64> = (0..rows.len()).step_by(span).map(|i| i as u64).collect();
        files.push((
            format!("skp_idx_{}.idx", index.name),
            bincode::serialize(&granules)?,
        ));
        files.push((
            format!("skp_idx_{}.mrk", index.name),
            bincode::serialize(&offsets)?,
        ));
    }

    files.push(("count.txt".into(), rows.len().to_string().into_bytes()));
    let mut columns_txt = format!("columns format version: 1\n{} columns:\n", spec.columns.len());
    for def in &spec.columns {
        columns_txt.push_str(&format!("`{}` {}\n", def.name, def.ty));
    }
    files.push(("columns.txt".into(), columns_txt.into_bytes()));

    let mut checksums: Vec<String> = files
        .iter()
        .map(|(file, data)| format!("{}\t{}\t{}", file, data.len(), etag(data)))
        .collect();
    checksums.sort();
    files.push(("checksums.txt".into(), checksums.join("\n").into_bytes()));

    let part_prefix = format!("{}{}/", table_prefix, name);
    for (file, data) in &files {
        store
            .put(bucket, &format!("{}{}", part_prefix, file), data)
            .with_context(|| format!("writing part {} file {}", name, file))?;
    }

    Ok(PartInfo {
        name: name.to_string(),
        partition: partition.clone(),
        rows: rows.len(),
        files: files.into_iter().map(|(file, _)| file).collect(),
    })
}

fn read_checksums(store: &BucketStore, bucket: &str, part_prefix: &str) -> Result<HashMap<String, String>> {
    let raw = store.get(bucket, &format!("{}checksums.txt", part_prefix))?;
    let text = String::from_utf8(raw).context("checksums.txt is not UTF-8")?;
    let mut sums = HashMap::new();
    for line in text.lines() {
        let mut fields = line.split('\t');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(file), Some(_size), Some(sum)) => {
                sums.insert(file.to_string(), sum.to_string());
            }
            _ => bail!("malformed checksums line {:?}", line),
        }
    }
    Ok(sums)
}

/// Decode the rows of a part, verifying each column file against
/// `checksums.txt`.
pub fn read_part(
    store: &BucketStore,
    bucket: &str,
    table_prefix: &str,
    spec: &TableSpec,
    info: &PartInfo,
) -> Result<Vec<Row>> {
    let part_prefix = format!("{}{}/", table_prefix, info.name);
    let checksums = read_checksums(store, bucket, &part_prefix)
        .with_context(|| format!("reading checksums of part {}", info.name))?;

    let mut dates = Vec::new();
    let mut ids = Vec::new();
    let mut payloads = Vec::new();
    for def in &spec.columns {
        let file = format!("{}.bin", def.name);
        let raw = store.get(bucket, &format!("{}{}", part_prefix, file))?;
        if checksums.get(&file).map(String::as_str) != Some(etag(&raw).as_str()) {
            bail!("checksum mismatch for {} in part {}", file, info.name);
        }
        match bincode::deserialize::<ColumnData>(&raw).context("decoding column")? {
            ColumnData::Date(v) => dates = v,
            ColumnData::Int64(v) => ids = v,
            ColumnData::String(v) => payloads = v,
        }
    }
    if dates.len() != info.rows || ids.len() != info.rows || payloads.len() != info.rows {
        bail!(
            "part {} column lengths ({}, {}, {}) disagree with row count {}",
            info.name,
            dates.len(),
            ids.len(),
            payloads.len(),
            info.rows
        );
    }

    Ok(dates
        .into_iter()
        .zip(ids)
        .zip(payloads)
        .map(|((date, id), data)| Row { date, id, data })
        .collect())
}

/// Copy every file of a part from one replica's prefix to another's.
pub fn copy_part(
    store: &BucketStore,
    bucket: &str,
    from_prefix: &str,
    to_prefix: &str,
    info: &PartInfo,
) -> Result<()> {
    for file in &info.files {
        let data = store.get(bucket, &format!("{}{}/{}", from_prefix, info.name, file))?;
        store.put(bucket, &format!("{}{}/{}", to_prefix, info.name, file), &data)?;
    }
    Ok(())
}

/// Delete every object under `prefix`; returns how many were removed.
pub fn remove_prefix(store: &BucketStore, bucket: &str, prefix: &str) -> Result<usize> {
    let objects = store.list(bucket, prefix)?;
    for obj in &objects {
        store.delete(bucket, &obj.key)?;
    }
    Ok(objects.len())
}
