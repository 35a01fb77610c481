// pirbench entry point.
use anyhow::{Context, Result};
use clap::Parser;
use pirbench::config::{Args, BenchConfig};
use pirbench::report::{self, Report};
use pirbench::{BenchOptions, ShutdownFlag, observability, run_benchmark, shutdown};
use pirbench_pir::{Database, LocalBackend, RetrievalClient, TwoServerClient};
use std::io::Write;
use std::sync::Arc;

type Client = TwoServerClient<Arc<LocalBackend>, Arc<LocalBackend>>;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let config = BenchConfig::from_args(&Args::parse())?;
    let flag = ShutdownFlag::new();
    shutdown::spawn_signal_listener(flag.clone());
    run(config, flag).await.map(|_| ())
}

async fn run(config: BenchConfig, flag: ShutdownFlag) -> Result<Report> {
    println!("Configured to make {} queries", config.queries);
    let seed = config.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, records = config.records, record_len = config.record_len, "starting run");

    let client = Arc::new(connect(&config, seed).context("connection error")?);

    print!("Obtaining hint (this may take a while)...");
    std::io::stdout().flush().context("flush stdout")?;
    client.init().await.context("failed to initialize client")?;
    println!("[OK]");

    let keys = client.keys()?;
    println!("Got {} keys from server", keys.len());

    let options = BenchOptions {
        queries: config.queries,
        queue_depth: config.queue_depth,
        latencies_file: config.latencies_file.clone(),
        seed: seed.wrapping_add(1),
    };
    let outcome = run_benchmark(client.clone(), keys, &options, flag).await?;
    let backends = report::fetch_backend_times(client.left(), client.right()).await;
    let report = Report {
        total_latency: outcome.collected.total,
        summary: outcome.collected.summary(),
        generator: outcome.generator,
        elapsed: outcome.elapsed,
        backends,
    };
    report.print();
    Ok(report)
}

// Both backends serve the same seeded table, like two replicas of one database.
fn connect(config: &BenchConfig, seed: u64) -> Result<Client> {
    let db = Arc::new(
        Database::generate(config.records, config.record_len, seed).context("build database")?,
    );
    let left = LocalBackend::new("left", db.clone()).with_delay(config.backend_delay);
    let right = LocalBackend::new("right", db).with_delay(config.backend_delay);
    Ok(
        TwoServerClient::new(Arc::new(left), Arc::new(right), seed.rotate_left(17))
            .with_call_async(config.call_async),
    )
}
