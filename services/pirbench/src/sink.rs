// CSV output of per-request latencies.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::workload::RequestTiming;

pub const HEADER: &str = "Seconds,Latency";

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to create output file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only `Seconds,Latency` file, truncated on open.
///
/// Buffered writes are flushed by [`LatencySink::finish`]; any other exit
/// path flushes on drop and logs failures.
#[derive(Debug)]
pub struct LatencySink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: usize,
}

impl LatencySink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| SinkError::Create {
            path: path.clone(),
            source,
        })?;
        let mut sink = Self {
            path,
            writer: Some(BufWriter::new(file)),
            records: 0,
        };
        sink.write_line(format_args!("{HEADER}"))?;
        Ok(sink)
    }

    /// Writes `<unix seconds of start>,<latency in whole milliseconds>`.
    pub fn append(&mut self, timing: &RequestTiming) -> Result<(), SinkError> {
        let seconds = timing
            .wall_start
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs())
            .unwrap_or(0);
        let millis = timing.latency().as_millis();
        self.write_line(format_args!("{seconds},{millis}"))?;
        self.records += 1;
        Ok(())
    }

    /// Flushes and closes the file, returning the number of data lines.
    pub fn finish(mut self) -> Result<usize, SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(self.records)
    }

    fn write_line(&mut self, line: std::fmt::Arguments<'_>) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{line}").map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for LatencySink {
    fn drop(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if let Err(err) = writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to flush latencies file");
        }
    }
}
