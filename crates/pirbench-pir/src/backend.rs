// In-process backend proxy with server-side timers.
use crate::{BackendProxy, Database, Hint, PirError, Query, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Timer slot accumulating time spent answering queries.
pub const ONLINE_TIMER_INDEX: usize = 0;
/// Timer slot accumulating time spent serving hints.
pub const HINT_TIMER_INDEX: usize = 1;
const TIMER_SLOTS: usize = 2;

/// Backend that answers queries against a shared in-memory table.
///
/// ```
/// use pirbench_pir::{BackendProxy, Database, LocalBackend, ONLINE_TIMER_INDEX};
/// use std::sync::Arc;
///
/// let db = Arc::new(Database::generate(8, 4, 1).expect("db"));
/// let backend = LocalBackend::new("left", db);
/// let rt = tokio::runtime::Builder::new_current_thread()
///     .enable_all()
///     .build()
///     .expect("rt");
/// rt.block_on(async {
///     let hint = backend.hint().await.expect("hint");
///     assert_eq!(hint.keys.len(), 8);
///     let online = backend.online_timer(ONLINE_TIMER_INDEX).await.expect("timer");
///     assert_eq!(online.as_nanos(), 0);
/// });
/// ```
#[derive(Debug)]
pub struct LocalBackend {
    name: String,
    db: Arc<Database>,
    // Simulated one-way network delay added to every call.
    delay: Duration,
    // Fail every n-th answered query; 0 disables injection.
    fail_every: u64,
    answered: AtomicU64,
    timers_ns: [AtomicU64; TIMER_SLOTS],
}

impl LocalBackend {
    pub fn new(name: impl Into<String>, db: Arc<Database>) -> Self {
        Self {
            name: name.into(),
            db,
            delay: Duration::ZERO,
            fail_every: 0,
            answered: AtomicU64::new(0),
            timers_ns: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_fail_every(mut self, every: u64) -> Self {
        self.fail_every = every;
        self
    }

    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    fn record(&self, index: usize, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.timers_ns[index].fetch_add(nanos, Ordering::Relaxed);
    }

    async fn simulate_network(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl BackendProxy for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn hint(&self) -> Result<Hint> {
        self.simulate_network().await;
        let started = Instant::now();
        let hint = self.db.hint();
        self.record(HINT_TIMER_INDEX, started.elapsed());
        Ok(hint)
    }

    async fn answer(&self, query: &Query) -> Result<Vec<u8>> {
        self.simulate_network().await;
        let seq = self.answered.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && seq % self.fail_every == 0 {
            return Err(PirError::Backend {
                backend: self.name.clone(),
                reason: format!("injected failure on query {seq}"),
            });
        }
        let started = Instant::now();
        let answer = self.db.xor_rows(query);
        self.record(ONLINE_TIMER_INDEX, started.elapsed());
        answer
    }

    async fn online_timer(&self, index: usize) -> Result<Duration> {
        let slot = self
            .timers_ns
            .get(index)
            .ok_or(PirError::UnknownTimer(index))?;
        Ok(Duration::from_nanos(slot.load(Ordering::Relaxed)))
    }
}
