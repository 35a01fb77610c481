// Fixed-width record table served by the in-process backends.
use crate::{Hint, Key, PirError, Query, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Row-major table of `record_len`-byte records, one per key.
///
/// ```
/// use pirbench_pir::Database;
///
/// let db = Database::generate(16, 8, 7).expect("db");
/// assert_eq!(db.rows(), 16);
/// assert_eq!(db.record(3).len(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    keys: Vec<Key>,
    record_len: usize,
    data: Vec<u8>,
}

impl Database {
    pub fn new(keys: Vec<Key>, record_len: usize, data: Vec<u8>) -> Result<Self> {
        if keys.is_empty() {
            return Err(PirError::InvalidShape("no records".into()));
        }
        if record_len == 0 {
            return Err(PirError::InvalidShape("record length must be > 0".into()));
        }
        if data.len() != keys.len() * record_len {
            return Err(PirError::InvalidShape(format!(
                "expected {} bytes for {} records, got {}",
                keys.len() * record_len,
                keys.len(),
                data.len()
            )));
        }
        Ok(Self {
            keys,
            record_len,
            data,
        })
    }

    /// Deterministic table with distinct random keys and random contents.
    pub fn generate(rows: usize, record_len: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut seen = HashSet::with_capacity(rows);
        let mut keys = Vec::with_capacity(rows);
        while keys.len() < rows {
            let key: u64 = rng.r#gen();
            if seen.insert(key) {
                keys.push(Key::new(key));
            }
        }
        let mut data = vec![0u8; rows * record_len];
        rng.fill(data.as_mut_slice());
        Self::new(keys, record_len, data)
    }

    pub fn rows(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn record(&self, row: usize) -> &[u8] {
        let start = row * self.record_len;
        &self.data[start..start + self.record_len]
    }

    pub fn hint(&self) -> Hint {
        Hint {
            keys: self.keys.clone(),
            record_len: self.record_len,
        }
    }

    /// XOR of every record selected by `query`.
    pub fn xor_rows(&self, query: &Query) -> Result<Vec<u8>> {
        if query.rows() != self.rows() {
            return Err(PirError::MalformedQuery(format!(
                "query covers {} rows, table has {}",
                query.rows(),
                self.rows()
            )));
        }
        let mut out = vec![0u8; self.record_len];
        for row in query.selected() {
            for (acc, byte) in out.iter_mut().zip(self.record(row)) {
                *acc ^= byte;
            }
        }
        Ok(out)
    }
}
