use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column types a [`Row`] is made of, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Date,
    Int64,
    String,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Date => "Date",
            ColumnType::Int64 => "Int64",
            ColumnType::String => "String",
        };
        f.write_str(name)
    }
}

/// A single cell value, used for partition keys and index summaries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Date(NaiveDate),
    Int64(i64),
    String(String),
}

impl Value {
    /// Directory-safe partition identifier, e.g. `20200101` for a date.
    pub fn partition_id(&self) -> String {
        match self {
            Value::Date(d) => d.format("%Y%m%d").to_string(),
            Value::Int64(v) => v.to_string(),
            Value::String(s) => s
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect(),
        }
    }
}

/// One row of the `(dt Date, id Int64, data String)` schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub date: NaiveDate,
    pub id: i64,
    pub data: String,
}

impl Row {
    /// Column types in declaration order.
    pub const SHAPE: [ColumnType; 3] = [ColumnType::Date, ColumnType::Int64, ColumnType::String];

    pub fn new(date: NaiveDate, id: i64, data: impl Into<String>) -> Self {
        Row {
            date,
            id,
            data: data.into(),
        }
    }

    /// Value of the column at `index`, or `None` past the last column.
    pub fn value(&self, index: usize) -> Option<Value> {
        match index {
            0 => Some(Value::Date(self.date)),
            1 => Some(Value::Int64(self.id)),
            2 => Some(Value::String(self.data.clone())),
            _ => None,
        }
    }

    /// Compare by the given column indexes, left to right.
    pub fn cmp_by(&self, other: &Row, columns: &[usize]) -> Ordering {
        for &col in columns {
            let ord = match col {
                0 => self.date.cmp(&other.date),
                1 => self.id.cmp(&other.id),
                2 => self.data.cmp(&other.data),
                _ => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Render as a `Values` tuple: `('2020-01-01',1,'abc')`.
    pub fn to_values(&self) -> String {
        format!(
            "('{}',{},'{}')",
            self.date.format("%Y-%m-%d"),
            self.id,
            escape(&self.data)
        )
    }

    /// Render as one tab-separated line without the trailing newline.
    pub fn to_tsv(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.date.format("%Y-%m-%d"),
            self.id,
            self.data
                .replace('\\', "\\\\")
                .replace('\t', "\\t")
                .replace('\n', "\\n")
        )
    }
}

/// The rows one writer submits for a single partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub partition_key: NaiveDate,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct partition keys among the rows. A part is written
    /// per partition touched by one insert.
    pub fn partitions_touched(&self) -> usize {
        let mut dates: Vec<NaiveDate> = self.rows.iter().map(|r| r.date).collect();
        dates.sort();
        dates.dedup();
        dates.len()
    }
}

/// Render rows in the engine's `Values` output format: tuples separated by
/// commas, no whitespace, no trailing newline.
pub fn render_values(rows: &[Row]) -> String {
    let mut out = String::with_capacity(rows.len() * 32);
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&row.to_values());
    }
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse `Values` output back into rows. Used to pinpoint where two result
/// sets diverge.
pub fn parse_values(text: &str) -> Result<Vec<Row>> {
    let mut parser = ValuesParser {
        chars: text.trim_end().chars().collect(),
        pos: 0,
    };
    let mut rows = Vec::new();
    if parser.chars.is_empty() {
        return Ok(rows);
    }
    loop {
        let row = parser
            .tuple()
            .with_context(|| format!("parsing row {}", rows.len()))?;
        rows.push(row);
        match parser.next() {
            None => break,
            Some(',') => continue,
            Some(c) => bail!("expected ',' between rows, found {:?} at {}", c, parser.pos - 1),
        }
    }
    Ok(rows)
}

struct ValuesParser {
    chars: Vec<char>,
    pos: usize,
}

impl ValuesParser {
    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.next() {
            Some(c) if c == want => Ok(()),
            Some(c) => bail!("expected {:?}, found {:?} at {}", want, c, self.pos - 1),
            None => bail!("expected {:?}, found end of input", want),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.next() {
                Some('\\') => match self.next() {
                    Some(c) => out.push(c),
                    None => bail!("dangling escape"),
                },
                Some('\'') => return Ok(out),
                Some(c) => out.push(c),
                None => bail!("unterminated string"),
            }
        }
    }

    fn integer(&mut self) -> Result<i64> {
        let start = self.pos;
        while let Some(c) = self.chars.get(self.pos) {
            if c.is_ascii_digit() || (*c == '-' && self.pos == start) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .with_context(|| format!("invalid integer {:?}", digits))
    }

    fn tuple(&mut self) -> Result<Row> {
        self.expect('(')?;
        let date = self.quoted()?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("invalid date {:?}", date))?;
        self.expect(',')?;
        let id = self.integer()?;
        self.expect(',')?;
        let data = self.quoted()?;
        self.expect(')')?;
        Ok(Row { date, id, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn values_rendering_matches_engine_format() {
        let rows = vec![Row::new(day(1), 1, "abc"), Row::new(day(1), -2, "XYZ")];
        assert_eq!(
            render_values(&rows),
            "('2020-01-01',1,'abc'),('2020-01-01',-2,'XYZ')"
        );
    }

    #[test]
    fn empty_rows_render_empty() {
        assert_eq!(render_values(&[]), "");
        assert!(parse_values("").unwrap().is_empty());
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        let row = Row::new(day(2), 7, r"it's a \ test");
        assert_eq!(row.to_values(), r"('2020-01-02',7,'it\'s a \\ test')");
        let parsed = parse_values(&row.to_values()).unwrap();
        assert_eq!(parsed, vec![row]);
    }

    #[test]
    fn parse_reads_back_rendered_rows() {
        let rows = vec![
            Row::new(day(1), -5, "a"),
            Row::new(day(2), 1, "bb"),
            Row::new(day(3), 4096, "ccc"),
        ];
        assert_eq!(parse_values(&render_values(&rows)).unwrap(), rows);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_values("('2020-01-01',1,'a')x").is_err());
        assert!(parse_values("('2020-13-01',1,'a')").is_err());
        assert!(parse_values("('2020-01-01',one,'a')").is_err());
        assert!(parse_values("('2020-01-01',1,'a").is_err());
    }

    #[test]
    fn cmp_by_uses_column_order() {
        let a = Row::new(day(1), 10, "z");
        let b = Row::new(day(2), 1, "a");
        assert_eq!(a.cmp_by(&b, &[0, 1]), Ordering::Less);
        assert_eq!(a.cmp_by(&b, &[1]), Ordering::Greater);
        assert_eq!(a.cmp_by(&b, &[2, 0]), Ordering::Greater);
        assert_eq!(a.cmp_by(&a, &[0, 1, 2]), Ordering::Equal);
    }

    #[test]
    fn partition_ids() {
        assert_eq!(Value::Date(day(3)).partition_id(), "20200103");
        assert_eq!(Value::Int64(-4).partition_id(), "-4");
        assert_eq!(Value::String("a b/c".into()).partition_id(), "a_b_c");
    }

    #[test]
    fn batch_counts_partitions() {
        let batch = Batch {
            partition_key: day(1),
            rows: vec![
                Row::new(day(1), 1, "a"),
                Row::new(day(1), 2, "b"),
                Row::new(day(2), 3, "c"),
            ],
        };
        assert_eq!(batch.partitions_touched(), 2);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn tsv_rendering() {
        let row = Row::new(day(1), 3, "a\tb");
        assert_eq!(row.to_tsv(), "2020-01-01\t3\ta\\tb");
    }
}
