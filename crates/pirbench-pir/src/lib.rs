// Retrieval boundary for pirbench.
//
// The benchmark driver talks to retrieval only through `RetrievalClient` (keys
// and keyed reads) and `BackendProxy` (per-backend online timers). This crate
// defines those seams and ships an in-process two-server implementation so the
// driver runs without external processes.
//
// The bundled protocol is the classic two-server XOR scheme: the client sends a
// random row subset to one backend and the same subset with the target row
// toggled to the other, then XORs both answers. Neither backend alone learns
// which row was read, as long as they do not collude.
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod backend;
pub mod client;
pub mod database;

pub use backend::{HINT_TIMER_INDEX, LocalBackend, ONLINE_TIMER_INDEX};
pub use client::TwoServerClient;
pub use database::Database;

pub type Result<T> = std::result::Result<T, PirError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PirError {
    #[error("key set is empty")]
    EmptyKeySet,
    #[error("client is not initialized")]
    NotInitialized,
    #[error("unknown key {0}")]
    UnknownKey(Key),
    #[error("unknown timer index {0}")]
    UnknownTimer(usize),
    #[error("backends disagree on hint: {0}")]
    HintMismatch(String),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },
    #[error("invalid database shape: {0}")]
    InvalidShape(String),
}

/// Opaque identifier of one retrievable record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(u64);

impl Key {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-empty, read-only universe of keys.
///
/// ```
/// use pirbench_pir::{Key, KeySet};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let keys = KeySet::new(vec![Key::new(7), Key::new(9)]).expect("non-empty");
/// let mut rng = StdRng::seed_from_u64(1);
/// let picked = keys.choose(&mut rng);
/// assert!(keys.contains(picked));
/// assert!(KeySet::new(Vec::new()).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct KeySet {
    // Shared so the generator task can hold it without copying the universe.
    keys: Arc<[Key]>,
}

impl KeySet {
    pub fn new(keys: Vec<Key>) -> Result<Self> {
        if keys.is_empty() {
            return Err(PirError::EmptyKeySet);
        }
        Ok(Self { keys: keys.into() })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    // Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn as_slice(&self) -> &[Key] {
        &self.keys
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    /// Uniformly picks one key, with replacement.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> Key {
        self.keys[rng.gen_range(0..self.keys.len())]
    }
}

/// Client-side state fetched once from each backend before reads start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hint {
    /// Keys in row order.
    pub keys: Vec<Key>,
    pub record_len: usize,
}

/// Row-selection bit vector sent to a single backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    rows: usize,
    words: Vec<u64>,
}

impl Query {
    pub fn empty(rows: usize) -> Self {
        Self {
            rows,
            words: vec![0; rows.div_ceil(64)],
        }
    }

    /// Random subset where each row is selected with probability 1/2.
    pub fn random<R: Rng>(rows: usize, rng: &mut R) -> Self {
        let mut query = Self::empty(rows);
        for word in query.words.iter_mut() {
            *word = rng.r#gen();
        }
        query.clear_tail();
        query
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn contains(&self, row: usize) -> bool {
        row < self.rows && self.words[row / 64] & (1 << (row % 64)) != 0
    }

    pub fn toggle(&mut self, row: usize) {
        if row < self.rows {
            self.words[row / 64] ^= 1 << (row % 64);
        }
    }

    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.rows).filter(|row| self.contains(*row))
    }

    fn clear_tail(&mut self) {
        let tail = self.rows % 64;
        if tail == 0 {
            return;
        }
        if let Some(last) = self.words.last_mut() {
            *last &= (1u64 << tail) - 1;
        }
    }
}

/// Handle to one remote backend process.
#[async_trait]
pub trait BackendProxy: Send + Sync {
    fn name(&self) -> &str;

    async fn hint(&self) -> Result<Hint>;

    async fn answer(&self, query: &Query) -> Result<Vec<u8>>;

    /// Cumulative server-side processing time tracked under `index`.
    async fn online_timer(&self, index: usize) -> Result<Duration>;
}

#[async_trait]
impl<T: BackendProxy + ?Sized> BackendProxy for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn hint(&self) -> Result<Hint> {
        (**self).hint().await
    }

    async fn answer(&self, query: &Query) -> Result<Vec<u8>> {
        (**self).answer(query).await
    }

    async fn online_timer(&self, index: usize) -> Result<Duration> {
        (**self).online_timer(index).await
    }
}

/// What the benchmark needs from a retrieval client.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Fetches the hint; must succeed before any read.
    async fn init(&self) -> Result<()>;

    fn keys(&self) -> Result<KeySet>;

    async fn read(&self, key: Key) -> Result<Vec<u8>>;
}
