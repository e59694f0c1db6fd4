// Process-wide logging sink
//
// Opened once when the process is detached, closed once on terminate. The
// tracing fmt layer writes through it; writes after close are dropped.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

struct SinkInner {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl SinkInner {
    fn file(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Append-only log file shared by every writer in the process
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    /// Open (or create) the log file in append mode
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open daemon log: {}", path.display()))?;

        Ok(Self {
            inner: Arc::new(SinkInner {
                path: path.to_path_buf(),
                file: Mutex::new(Some(file)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_open(&self) -> bool {
        self.inner.file().is_some()
    }

    /// Flush and release the file; a second close is a no-op
    pub fn close(&self) -> io::Result<()> {
        let file = self.inner.file().take();
        match file {
            Some(mut file) => {
                file.flush()?;
                file.sync_all()
            }
            None => Ok(()),
        }
    }

    /// Install this sink as the global tracing subscriber
    ///
    /// `RUST_LOG` wins over `default_level`. With `echo_stderr` every record
    /// is also written to stderr.
    pub fn install_global(&self, default_level: &str, echo_stderr: bool) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(self.clone())
            .with_ansi(false);
        let stderr_layer = echo_stderr.then(|| {
            tracing_subscriber::fmt::layer().with_writer(io::stderr)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .try_init()
            .context("Failed to install log subscriber")
    }
}

/// Writer handed out to the fmt layer for each record
pub struct SinkWriter {
    inner: Arc<SinkInner>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.file().as_mut() {
            Some(file) => file.write_all(buf).map(|()| buf.len()),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.file().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}
