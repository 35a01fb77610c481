// End-of-run report: client-side totals plus each backend's online timer.
use pirbench_pir::{BackendProxy, ONLINE_TIMER_INDEX};
use std::time::Duration;

use crate::collector::LatencySummary;
use crate::workload::GeneratorStats;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendTime {
    pub label: &'static str,
    pub backend: String,
    pub online: Duration,
    /// False when the timer query failed and `online` is a zero placeholder.
    pub ok: bool,
}

/// Queries both backends' aggregate online timer, left then right.
///
/// A failed query is logged and reported as zero; it never invalidates the
/// latencies already collected.
pub async fn fetch_backend_times<L, R>(left: &L, right: &R) -> [BackendTime; 2]
where
    L: BackendProxy + ?Sized,
    R: BackendProxy + ?Sized,
{
    [
        fetch_one("Server 1", left).await,
        fetch_one("Server 2", right).await,
    ]
}

async fn fetch_one<B: BackendProxy + ?Sized>(label: &'static str, backend: &B) -> BackendTime {
    match backend.online_timer(ONLINE_TIMER_INDEX).await {
        Ok(online) => BackendTime {
            label,
            backend: backend.name().to_string(),
            online,
            ok: true,
        },
        Err(err) => {
            tracing::warn!(backend = backend.name(), error = %err, "failed to fetch online timer");
            BackendTime {
                label,
                backend: backend.name().to_string(),
                online: Duration::ZERO,
                ok: false,
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Report {
    pub total_latency: Duration,
    pub summary: LatencySummary,
    pub generator: GeneratorStats,
    pub elapsed: Duration,
    pub backends: [BackendTime; 2],
}

impl Report {
    /// Console lines, in print order.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!("{:?}", self.total_latency)];
        for backend in &self.backends {
            let suffix = if backend.ok { "" } else { " (unavailable)" };
            lines.push(format!("{} time: {:?}{suffix}", backend.label, backend.online));
        }
        lines.push(format!(
            "Requests: {} issued, {} ok, {} failed{}",
            self.generator.issued,
            self.generator.succeeded,
            self.generator.failed,
            if self.generator.stopped_early {
                " (stopped early)"
            } else {
                ""
            }
        ));
        if self.summary.count > 0 {
            lines.push(format!("  mean = {}", format_duration(self.summary.mean)));
            lines.push(format!("  p50  = {}", format_duration(self.summary.p50)));
            lines.push(format!("  p99  = {}", format_duration(self.summary.p99)));
            lines.push(format!("  p999 = {}", format_duration(self.summary.p999)));
            lines.push(format!("  max  = {}", format_duration(self.summary.max)));
            lines.push(format!(
                "  throughput = {:.2} reads/s",
                throughput(self.summary.count, self.elapsed)
            ));
        }
        lines
    }

    pub fn print(&self) {
        for line in self.render() {
            println!("{line}");
        }
    }
}

fn throughput(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { 0.0 } else { count as f64 / secs }
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1000 {
        format!("{:.3} ms", micros as f64 / 1000.0)
    } else {
        format!("{micros} us")
    }
}
