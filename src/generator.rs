use crate::row::{Batch, Row};
use chrono::NaiveDate;
use rand::Rng;

/// Payload length used by the default scenario.
pub const PAYLOAD_LEN: usize = 10;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Direction of the generated id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> i64 {
        match self {
            Sign::Positive => 1,
            Sign::Negative => -1,
        }
    }
}

/// Generate `count` rows for `partition_key` with ids `sign * (i + 1)` and a
/// random alphabetic payload, sorted ascending by id.
pub fn generate(partition_key: NaiveDate, count: usize, sign: Sign) -> Batch {
    generate_with(&mut rand::rng(), partition_key, count, sign, PAYLOAD_LEN)
}

/// Like [`generate`], drawing payloads from `rng`.
pub fn generate_with<R: Rng>(
    rng: &mut R,
    partition_key: NaiveDate,
    count: usize,
    sign: Sign,
    payload_len: usize,
) -> Batch {
    let mut rows: Vec<Row> = (0..count)
        .map(|i| Row {
            date: partition_key,
            id: sign.factor() * (i as i64 + 1),
            data: random_string(rng, payload_len),
        })
        .collect();
    // Numeric order, not generation order: negative ids come out reversed.
    rows.sort_by_key(|r| r.id);
    Batch {
        partition_key,
        rows,
    }
}

pub fn random_string<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn positive_ids_are_one_based_and_ascending() {
        let batch = generate(day(1), 5, Sign::Positive);
        let ids: Vec<i64> = batch.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(batch.rows.iter().all(|r| r.date == day(1)));
    }

    #[test]
    fn negative_ids_sorted_numerically() {
        let batch = generate(day(2), 4, Sign::Negative);
        let ids: Vec<i64> = batch.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![-4, -3, -2, -1]);
    }

    #[test]
    fn payloads_are_fixed_length_letters() {
        let batch = generate(day(1), 100, Sign::Positive);
        for row in &batch.rows {
            assert_eq!(row.data.len(), PAYLOAD_LEN);
            assert!(row.data.chars().all(|c| c.is_ascii_alphabetic()));
        }
    }

    #[test]
    fn zero_count_is_empty() {
        let batch = generate(day(1), 0, Sign::Positive);
        assert!(batch.is_empty());
        assert_eq!(batch.partition_key, day(1));
    }

    #[test]
    fn seeded_rng_reproduces_payloads() {
        let a = generate_with(&mut StdRng::seed_from_u64(7), day(1), 16, Sign::Positive, 12);
        let b = generate_with(&mut StdRng::seed_from_u64(7), day(1), 16, Sign::Positive, 12);
        assert_eq!(a, b);
        assert!(a.rows.iter().all(|r| r.data.len() == 12));
    }

    #[test]
    fn ids_unique_within_batch() {
        let batch = generate(day(3), 4096, Sign::Positive);
        let mut ids: Vec<i64> = batch.rows.iter().map(|r| r.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4096);
        assert_eq!(batch.partitions_touched(), 1);
    }
}
