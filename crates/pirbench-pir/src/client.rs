// Two-server XOR retrieval client.
use crate::{BackendProxy, Key, KeySet, PirError, Query, Result, RetrievalClient};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

struct ClientState {
    keys: KeySet,
    rows_by_key: HashMap<Key, usize>,
    rows: usize,
    record_len: usize,
}

/// Reads records from a pair of non-colluding backends.
///
/// ```
/// use pirbench_pir::{Database, LocalBackend, RetrievalClient, TwoServerClient};
/// use std::sync::Arc;
///
/// let db = Arc::new(Database::generate(32, 8, 3).expect("db"));
/// let left = LocalBackend::new("left", db.clone());
/// let right = LocalBackend::new("right", db.clone());
/// let client = TwoServerClient::new(left, right, 99);
/// let rt = tokio::runtime::Builder::new_current_thread()
///     .enable_all()
///     .build()
///     .expect("rt");
/// rt.block_on(async {
///     client.init().await.expect("init");
///     let key = db.keys()[5];
///     assert_eq!(client.read(key).await.expect("read"), db.record(5));
/// });
/// ```
pub struct TwoServerClient<L, R> {
    left: L,
    right: R,
    // Issue both backend calls concurrently instead of one after the other.
    call_async: bool,
    rng: Mutex<StdRng>,
    state: OnceLock<ClientState>,
}

impl<L: BackendProxy, R: BackendProxy> TwoServerClient<L, R> {
    pub fn new(left: L, right: R, seed: u64) -> Self {
        Self {
            left,
            right,
            call_async: true,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            state: OnceLock::new(),
        }
    }

    pub fn with_call_async(mut self, call_async: bool) -> Self {
        self.call_async = call_async;
        self
    }

    pub fn left(&self) -> &L {
        &self.left
    }

    pub fn right(&self) -> &R {
        &self.right
    }

    fn split_query(&self, rows: usize, target: usize) -> (Query, Query) {
        let left = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Query::random(rows, &mut *rng)
        };
        let mut right = left.clone();
        right.toggle(target);
        (left, right)
    }
}

#[async_trait]
impl<L: BackendProxy, R: BackendProxy> RetrievalClient for TwoServerClient<L, R> {
    async fn init(&self) -> Result<()> {
        if self.state.get().is_some() {
            return Ok(());
        }
        let (left, right) = tokio::join!(self.left.hint(), self.right.hint());
        let (left, right) = (left?, right?);
        if left != right {
            return Err(PirError::HintMismatch(format!(
                "{} serves {} rows of {} bytes, {} serves {} rows of {} bytes",
                self.left.name(),
                left.keys.len(),
                left.record_len,
                self.right.name(),
                right.keys.len(),
                right.record_len
            )));
        }
        let rows = left.keys.len();
        let rows_by_key = left
            .keys
            .iter()
            .enumerate()
            .map(|(row, key)| (*key, row))
            .collect();
        let keys = KeySet::new(left.keys)?;
        tracing::debug!(rows, record_len = left.record_len, "hint installed");
        let _ = self.state.set(ClientState {
            keys,
            rows_by_key,
            rows,
            record_len: left.record_len,
        });
        Ok(())
    }

    fn keys(&self) -> Result<KeySet> {
        self.state
            .get()
            .map(|state| state.keys.clone())
            .ok_or(PirError::NotInitialized)
    }

    async fn read(&self, key: Key) -> Result<Vec<u8>> {
        let state = self.state.get().ok_or(PirError::NotInitialized)?;
        let row = *state
            .rows_by_key
            .get(&key)
            .ok_or(PirError::UnknownKey(key))?;
        let (left_query, right_query) = self.split_query(state.rows, row);
        let (left, right) = if self.call_async {
            tokio::join!(
                self.left.answer(&left_query),
                self.right.answer(&right_query)
            )
        } else {
            let left = self.left.answer(&left_query).await;
            let right = self.right.answer(&right_query).await;
            (left, right)
        };
        let (left, right) = (left?, right?);
        if left.len() != state.record_len || right.len() != state.record_len {
            return Err(PirError::MalformedQuery(format!(
                "answer widths {} and {} do not match record length {}",
                left.len(),
                right.len(),
                state.record_len
            )));
        }
        Ok(left.iter().zip(&right).map(|(a, b)| a ^ b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, LocalBackend, ONLINE_TIMER_INDEX};
    use std::sync::Arc;
    use std::time::Duration;

    fn pair(db: &Arc<Database>) -> TwoServerClient<Arc<LocalBackend>, Arc<LocalBackend>> {
        TwoServerClient::new(
            Arc::new(LocalBackend::new("left", db.clone())),
            Arc::new(LocalBackend::new("right", db.clone())),
            7,
        )
    }

    #[tokio::test]
    async fn read_returns_stored_record_for_every_key() {
        let db = Arc::new(Database::generate(130, 12, 21).expect("db"));
        let client = pair(&db);
        client.init().await.expect("init");
        for (row, key) in db.keys().iter().enumerate() {
            assert_eq!(client.read(*key).await.expect("read"), db.record(row));
        }
    }

    #[tokio::test]
    async fn sequential_calls_return_same_records() {
        let db = Arc::new(Database::generate(20, 4, 2).expect("db"));
        let client = pair(&db).with_call_async(false);
        client.init().await.expect("init");
        let key = db.keys()[19];
        assert_eq!(client.read(key).await.expect("read"), db.record(19));
    }

    #[tokio::test]
    async fn read_before_init_fails() {
        let db = Arc::new(Database::generate(4, 4, 2).expect("db"));
        let client = pair(&db);
        assert_eq!(
            client.read(db.keys()[0]).await.unwrap_err(),
            PirError::NotInitialized
        );
        assert_eq!(client.keys().unwrap_err(), PirError::NotInitialized);
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let db = Arc::new(Database::generate(4, 4, 2).expect("db"));
        let client = pair(&db);
        client.init().await.expect("init");
        let missing = (0..).map(Key::new).find(|k| !db.keys().contains(k)).expect("key");
        assert_eq!(
            client.read(missing).await.unwrap_err(),
            PirError::UnknownKey(missing)
        );
    }

    #[tokio::test]
    async fn init_rejects_mismatched_hints() {
        let left = LocalBackend::new("left", Arc::new(Database::generate(8, 4, 1).expect("db")));
        let right = LocalBackend::new("right", Arc::new(Database::generate(8, 4, 2).expect("db")));
        let client = TwoServerClient::new(left, right, 1);
        assert!(matches!(
            client.init().await.unwrap_err(),
            PirError::HintMismatch(_)
        ));
    }

    #[tokio::test]
    async fn keys_follow_hint_order() {
        let db = Arc::new(Database::generate(16, 4, 8).expect("db"));
        let client = pair(&db);
        client.init().await.expect("init");
        assert_eq!(client.keys().expect("keys").as_slice(), db.keys());
    }

    #[tokio::test]
    async fn reads_advance_both_online_timers() {
        let db = Arc::new(Database::generate(256, 64, 4).expect("db"));
        let client = pair(&db);
        client.init().await.expect("init");
        for key in db.keys().iter().take(20) {
            client.read(*key).await.expect("read");
        }
        assert_eq!(client.left().answered(), 20);
        assert_eq!(client.right().answered(), 20);
        let left = client.left().online_timer(ONLINE_TIMER_INDEX).await.expect("timer");
        assert!(left > Duration::ZERO);
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_error() {
        let db = Arc::new(Database::generate(8, 4, 8).expect("db"));
        let client = TwoServerClient::new(
            LocalBackend::new("left", db.clone()),
            LocalBackend::new("right", db.clone()).with_fail_every(1),
            3,
        );
        client.init().await.expect("init");
        let err = client.read(db.keys()[0]).await.unwrap_err();
        assert!(matches!(err, PirError::Backend { .. }));
    }
}
