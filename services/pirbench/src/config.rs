// Benchmark configuration: command-line flags layered over optional YAML overrides.
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::workload::SAMPLE_QUEUE_DEPTH;

pub const DEFAULT_QUERIES: usize = 10_000;
const DEFAULT_RECORDS: usize = 1024;
const DEFAULT_RECORD_LEN: usize = 32;
const CONFIG_ENV: &str = "PIRBENCH_CONFIG";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot parse number of queries from {input:?}: {source}")]
    QueryCount {
        input: String,
        #[source]
        source: ParseIntError,
    },
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pirbench")]
#[command(about = "Measures client-side latency of randomized two-server point reads")]
pub struct Args {
    /// Latencies output filename (empty disables the CSV output)
    #[arg(long)]
    pub latencies_file: Option<String>,

    /// Number of records served by each backend
    #[arg(long)]
    pub records: Option<usize>,

    /// Record size in bytes
    #[arg(long)]
    pub record_len: Option<usize>,

    /// Seed for the database, the client and the key picker (random if unset)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Simulated network delay added to every backend call, in milliseconds
    #[arg(long)]
    pub backend_delay_ms: Option<u64>,

    /// Query the two backends one after the other instead of concurrently
    #[arg(long)]
    pub sequential: bool,

    /// Capacity of the queue between the request loop and the collector
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// YAML file with overrides (falls back to PIRBENCH_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of queries, written as q<count> (e.g. q500)
    pub queries: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub queries: usize,
    pub latencies_file: Option<PathBuf>,
    pub records: usize,
    pub record_len: usize,
    pub seed: Option<u64>,
    pub backend_delay: Duration,
    pub call_async: bool,
    pub queue_depth: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            queries: DEFAULT_QUERIES,
            latencies_file: None,
            records: DEFAULT_RECORDS,
            record_len: DEFAULT_RECORD_LEN,
            seed: None,
            backend_delay: Duration::ZERO,
            call_async: true,
            queue_depth: SAMPLE_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct BenchConfigOverride {
    latencies_file: Option<String>,
    records: Option<usize>,
    record_len: Option<usize>,
    seed: Option<u64>,
    backend_delay_ms: Option<u64>,
    call_async: Option<bool>,
    queue_depth: Option<usize>,
}

impl BenchConfigOverride {
    fn apply(self, config: &mut BenchConfig) {
        if let Some(value) = self.latencies_file {
            config.latencies_file = sink_path(&value);
        }
        if let Some(value) = self.records {
            config.records = value;
        }
        if let Some(value) = self.record_len {
            config.record_len = value;
        }
        if let Some(value) = self.seed {
            config.seed = Some(value);
        }
        if let Some(value) = self.backend_delay_ms {
            config.backend_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.call_async {
            config.call_async = value;
        }
        if let Some(value) = self.queue_depth {
            config.queue_depth = value;
        }
    }
}

impl BenchConfig {
    /// Defaults, then the YAML override file, then explicit flags.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Self {
            queries: parse_query_count(args.queries.as_deref())?,
            ..Self::default()
        };
        let override_path = args
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        if let Some(path) = override_path {
            load_override(&path)?.apply(&mut config);
        }
        if let Some(value) = &args.latencies_file {
            config.latencies_file = sink_path(value);
        }
        if let Some(value) = args.records {
            config.records = value;
        }
        if let Some(value) = args.record_len {
            config.record_len = value;
        }
        if let Some(value) = args.seed {
            config.seed = Some(value);
        }
        if let Some(value) = args.backend_delay_ms {
            config.backend_delay = Duration::from_millis(value);
        }
        if args.sequential {
            config.call_async = false;
        }
        if let Some(value) = args.queue_depth {
            config.queue_depth = value;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.records == 0 {
            return Err(ConfigError::Invalid("records must be > 0".into()));
        }
        if self.record_len == 0 {
            return Err(ConfigError::Invalid("record_len must be > 0".into()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be > 0".into()));
        }
        Ok(())
    }
}

/// Parses the trailing `q<count>` argument.
///
/// Anything not starting with `q` leaves the default in place; a `q` followed
/// by something other than a count is an error.
///
/// ```
/// use pirbench::config::parse_query_count;
///
/// assert_eq!(parse_query_count(Some("q250")).unwrap(), 250);
/// assert_eq!(parse_query_count(None).unwrap(), 10_000);
/// assert!(parse_query_count(Some("qten")).is_err());
/// ```
pub fn parse_query_count(arg: Option<&str>) -> Result<usize, ConfigError> {
    let Some(count) = arg.and_then(|value| value.strip_prefix('q')) else {
        return Ok(DEFAULT_QUERIES);
    };
    count.parse().map_err(|source| ConfigError::QueryCount {
        input: count.to_string(),
        source,
    })
}

// An empty path means "no sink".
fn sink_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

fn load_override(path: &Path) -> Result<BenchConfigOverride, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
