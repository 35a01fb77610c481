// Latency collector: drains the sample queue until the request loop closes it.
use std::time::Duration;
use tokio::sync::mpsc;

use crate::sink::{LatencySink, SinkError};
use crate::workload::RequestTiming;

/// Everything the collector saw, in arrival order.
#[derive(Clone, Debug, Default)]
pub struct Collected {
    pub total: Duration,
    pub samples: Vec<Duration>,
}

impl Collected {
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary::from_samples(&self.samples)
    }
}

/// Receives until the queue is closed and empty.
///
/// Never closes the queue itself. A sink failure returns early; dropping the
/// receiver then stops the request loop at its next send.
pub async fn collect(
    mut rx: mpsc::Receiver<RequestTiming>,
    mut sink: Option<&mut LatencySink>,
) -> Result<Collected, SinkError> {
    let mut collected = Collected::default();
    while let Some(timing) = rx.recv().await {
        let latency = timing.latency();
        if let Some(sink) = sink.as_deref_mut() {
            sink.append(&timing)?;
        }
        collected.total += latency;
        collected.samples.push(latency);
    }
    tracing::debug!(samples = collected.count(), "sample queue drained");
    Ok(collected)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub min: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub p999: Duration,
    pub max: Duration,
}

impl LatencySummary {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        let count = sorted.len();
        Self {
            count,
            total,
            mean: mean(total, count),
            min: sorted[0],
            p50: percentile(&sorted, 0.50),
            p99: percentile(&sorted, 0.99),
            p999: percentile(&sorted, 0.999),
            max: sorted[count - 1],
        }
    }
}

fn mean(total: Duration, count: usize) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / count as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

// Nearest-rank over already sorted values.
fn percentile(values: &[Duration], p: f64) -> Duration {
    let len = values.len();
    if len == 0 {
        return Duration::ZERO;
    }
    let idx = ((len - 1) as f64 * p).round() as usize;
    values[idx.min(len - 1)]
}
