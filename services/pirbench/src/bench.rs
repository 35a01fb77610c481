// Wires the request loop, the collector and the optional latency sink for one run.
use anyhow::{Context, Result, ensure};
use pirbench_pir::{KeySet, RetrievalClient};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::collector::{self, Collected};
use crate::shutdown::ShutdownFlag;
use crate::sink::LatencySink;
use crate::workload::{GeneratorStats, SAMPLE_QUEUE_DEPTH, Workload};

#[derive(Clone, Debug)]
pub struct BenchOptions {
    pub queries: usize,
    pub queue_depth: usize,
    pub latencies_file: Option<PathBuf>,
    pub seed: u64,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            queries: crate::config::DEFAULT_QUERIES,
            queue_depth: SAMPLE_QUEUE_DEPTH,
            latencies_file: None,
            seed: 0,
        }
    }
}

#[derive(Debug)]
pub struct BenchOutcome {
    pub collected: Collected,
    pub generator: GeneratorStats,
    pub elapsed: Duration,
    /// Data lines written to the latencies file, if one was configured.
    pub sink_records: Option<usize>,
}

/// Runs one benchmark to completion.
///
/// The request loop runs as its own task; the collector drains on the calling
/// task until the loop closes the queue. The latencies file is created before
/// any read is issued and is closed on every exit path.
pub async fn run_benchmark<C>(
    client: Arc<C>,
    keys: KeySet,
    options: &BenchOptions,
    shutdown: ShutdownFlag,
) -> Result<BenchOutcome>
where
    C: RetrievalClient + ?Sized + 'static,
{
    ensure!(options.queue_depth > 0, "queue depth must be > 0");
    let mut sink = match &options.latencies_file {
        Some(path) => Some(LatencySink::create(path)?),
        None => None,
    };

    let (tx, rx) = mpsc::channel(options.queue_depth);
    let workload = Workload::new(
        client,
        keys,
        options.queries,
        shutdown,
        StdRng::seed_from_u64(options.seed),
    );
    let started = Instant::now();
    let generator = tokio::spawn(workload.run(tx));

    let collected = collector::collect(rx, sink.as_mut()).await;
    let generator = generator.await.context("request loop task failed")?;
    let elapsed = started.elapsed();
    let collected = collected.context("record latency sample")?;
    let sink_records = sink.map(LatencySink::finish).transpose()?;

    tracing::info!(
        issued = generator.issued,
        collected = collected.count(),
        failed = generator.failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "benchmark finished"
    );
    Ok(BenchOutcome {
        collected,
        generator,
        elapsed,
        sink_records,
    })
}
