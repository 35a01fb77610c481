// Request loop: issues randomized reads and forwards their timings to the collector.
use pirbench_pir::{KeySet, RetrievalClient};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;

use crate::shutdown::ShutdownFlag;

/// Capacity of the queue between the request loop and the collector.
pub const SAMPLE_QUEUE_DEPTH: usize = 1000;

/// Start/end instants of one successful read.
#[derive(Clone, Copy, Debug)]
pub struct RequestTiming {
    // Wall-clock twin of `start`, only used for the CSV timestamp.
    pub wall_start: SystemTime,
    pub start: Instant,
    pub end: Instant,
}

impl RequestTiming {
    pub fn latency(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    /// Reads started.
    pub issued: usize,
    /// Reads that completed and were queued.
    pub succeeded: usize,
    pub failed: usize,
    /// Stopped by the shutdown flag or a closed queue before `count` iterations.
    pub stopped_early: bool,
}

pub struct Workload<C: ?Sized> {
    client: Arc<C>,
    keys: KeySet,
    count: usize,
    shutdown: ShutdownFlag,
    rng: StdRng,
}

impl<C> Workload<C>
where
    C: RetrievalClient + ?Sized,
{
    pub fn new(
        client: Arc<C>,
        keys: KeySet,
        count: usize,
        shutdown: ShutdownFlag,
        rng: StdRng,
    ) -> Self {
        Self {
            client,
            keys,
            count,
            shutdown,
            rng,
        }
    }

    /// Runs up to `count` reads, one at a time.
    ///
    /// Consumes the sender, so the queue closes exactly once when this returns.
    /// A full queue blocks the loop until the collector catches up.
    pub async fn run(mut self, tx: mpsc::Sender<RequestTiming>) -> GeneratorStats {
        let mut stats = GeneratorStats::default();
        for _ in 0..self.count {
            if self.shutdown.is_triggered() {
                tracing::info!(issued = stats.issued, "shutdown requested, no new reads");
                stats.stopped_early = true;
                break;
            }
            let key = self.keys.choose(&mut self.rng);
            let wall_start = SystemTime::now();
            let start = Instant::now();
            stats.issued += 1;
            if let Err(err) = self.client.read(key).await {
                stats.failed += 1;
                tracing::warn!(%key, error = %err, "failed to read key");
                continue;
            }
            let timing = RequestTiming {
                wall_start,
                start,
                end: Instant::now(),
            };
            if tx.send(timing).await.is_err() {
                tracing::warn!(issued = stats.issued, "sample queue closed by collector");
                stats.stopped_early = true;
                break;
            }
            stats.succeeded += 1;
        }
        drop(tx);
        tracing::debug!(
            issued = stats.issued,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "request loop finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pirbench_pir::{Key, PirError};
    use rand::SeedableRng;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        reads: Mutex<Vec<Key>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl RetrievalClient for RecordingClient {
        async fn init(&self) -> pirbench_pir::Result<()> {
            Ok(())
        }

        fn keys(&self) -> pirbench_pir::Result<KeySet> {
            KeySet::new(vec![Key::new(1), Key::new(2), Key::new(3)])
        }

        async fn read(&self, key: Key) -> pirbench_pir::Result<Vec<u8>> {
            let call = {
                let mut reads = self.reads.lock().expect("reads lock");
                reads.push(key);
                reads.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(PirError::UnknownKey(key));
            }
            Ok(vec![0])
        }
    }

    fn workload(
        client: Arc<RecordingClient>,
        count: usize,
        flag: ShutdownFlag,
    ) -> Workload<RecordingClient> {
        let keys = client.keys().expect("keys");
        Workload::new(client, keys, count, flag, StdRng::seed_from_u64(5))
    }

    #[test]
    fn latency_is_end_minus_start() {
        let start = Instant::now();
        let timing = RequestTiming {
            wall_start: SystemTime::now(),
            start,
            end: start + Duration::from_millis(12),
        };
        assert_eq!(timing.latency(), Duration::from_millis(12));
    }

    #[tokio::test]
    async fn issues_exactly_count_reads() {
        let client = Arc::new(RecordingClient::default());
        let (tx, mut rx) = mpsc::channel(16);
        let stats = workload(client.clone(), 5, ShutdownFlag::new()).run(tx).await;
        assert_eq!(
            stats,
            GeneratorStats {
                issued: 5,
                succeeded: 5,
                failed: 0,
                stopped_early: false
            }
        );
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);
        let reads = client.reads.lock().expect("reads lock");
        assert!(reads.iter().all(|key| (1..=3).contains(&key.as_u64())));
    }

    #[tokio::test]
    async fn zero_count_closes_queue_immediately() {
        let client = Arc::new(RecordingClient::default());
        let (tx, mut rx) = mpsc::channel(1);
        let stats = workload(client, 0, ShutdownFlag::new()).run(tx).await;
        assert_eq!(stats.issued, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failed_read_consumes_iteration_but_not_sample() {
        let client = Arc::new(RecordingClient {
            fail_on_call: Some(3),
            ..RecordingClient::default()
        });
        let (tx, mut rx) = mpsc::channel(16);
        let stats = workload(client.clone(), 5, ShutdownFlag::new()).run(tx).await;
        assert_eq!(stats.issued, 5);
        assert_eq!(stats.succeeded, 4);
        assert_eq!(stats.failed, 1);
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 4);
        assert_eq!(client.reads.lock().expect("reads lock").len(), 5);
    }

    #[tokio::test]
    async fn failed_read_is_logged_with_its_key() {
        let logs = crate::test_support::LogCapture::install();
        let client = Arc::new(RecordingClient {
            fail_on_call: Some(2),
            ..RecordingClient::default()
        });
        let (tx, mut rx) = mpsc::channel(16);
        let stats = workload(client.clone(), 4, ShutdownFlag::new()).run(tx).await;
        while rx.recv().await.is_some() {}
        assert_eq!(stats.failed, 1);

        let failed_key = client.reads.lock().expect("reads lock")[1];
        let output = logs.contents();
        let failures: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("failed to read key"))
            .collect();
        assert_eq!(failures.len(), 1, "{output}");
        assert!(failures[0].contains("WARN"), "{output}");
        assert!(failures[0].contains(&format!("key={failed_key}")), "{output}");
    }

    #[tokio::test]
    async fn triggered_flag_prevents_any_read() {
        let client = Arc::new(RecordingClient::default());
        let flag = ShutdownFlag::new();
        flag.trigger();
        let (tx, mut rx) = mpsc::channel(16);
        let stats = workload(client.clone(), 1000, flag).run(tx).await;
        assert_eq!(stats.issued, 0);
        assert!(stats.stopped_early);
        assert!(rx.recv().await.is_none());
        assert!(client.reads.lock().expect("reads lock").is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_stops_loop() {
        let client = Arc::new(RecordingClient::default());
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let stats = workload(client, 10, ShutdownFlag::new()).run(tx).await;
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.succeeded, 0);
        assert!(stats.stopped_early);
    }

    #[tokio::test]
    async fn full_queue_blocks_instead_of_dropping() {
        let client = Arc::new(RecordingClient::default());
        let (tx, mut rx) = mpsc::channel(2);
        let handle = tokio::spawn(workload(client.clone(), 6, ShutdownFlag::new()).run(tx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Two buffered samples plus one read parked on the full queue.
        assert_eq!(client.reads.lock().expect("reads lock").len(), 3);
        assert!(!handle.is_finished());
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 6);
        assert_eq!(handle.await.expect("generator").succeeded, 6);
    }
}
