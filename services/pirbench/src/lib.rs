// Point-read latency benchmark for two-server retrieval.
//
// A single request loop issues reads one at a time and pushes their timings
// into a bounded queue; the collector drains that queue on the main task and
// the reporter adds each backend's server-side online time at the end. An
// interrupt only stops new reads: the queue is still closed by the loop and
// drained to completion, so no sample is lost.
pub mod bench;
pub mod collector;
pub mod config;
pub mod observability;
pub mod report;
pub mod shutdown;
pub mod sink;
pub mod workload;

#[cfg(test)]
mod test_support;

pub use bench::{BenchOptions, BenchOutcome, run_benchmark};
pub use shutdown::ShutdownFlag;
