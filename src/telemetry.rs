//! Newline-delimited JSON event log for boundary responses.
//!
//! One line per handled request.  The log file rotates by size with a small
//! number of backups; the freshest backup can optionally be gzip-compressed.
//! Write failures are counted and logged, never fatal.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::RotationConfig;
use crate::util::short_session;
use crate::ErrorKind;

/// Size-based rotating writer keeping `keep` numbered backup files.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes,
            keep,
            compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            let size = self.path.metadata().map(|m| m.len()).unwrap_or(0);
            if size >= limit {
                self.rotate();
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> u64 {
        self.path.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn rotate(&mut self) {
        if self.keep > 0 {
            for idx in (1..=self.keep).rev() {
                let old = if idx == 1 {
                    self.path.clone()
                } else {
                    self.path.with_extension(format!("{}", idx - 1))
                };
                if old.exists() {
                    let _ = fs::rename(&old, self.path.with_extension(format!("{}", idx)));
                }
            }
            if self.compress {
                self.compress_first_backup();
            }
        }
        if let Ok(fresh) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = fresh;
        }
    }

    fn compress_first_backup(&self) {
        let rotated = self.path.with_extension("1");
        let Ok(data) = fs::read(&rotated) else {
            return;
        };
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        if gz.write_all(&data).is_ok() {
            if let Ok(buf) = gz.finish() {
                let _ = fs::write(rotated.with_extension("1.gz"), buf);
                let _ = fs::remove_file(&rotated);
            }
        }
    }
}

/// What one boundary response looked like, for the event log.
pub struct ChatEvent<'a> {
    pub kind: &'a str,
    pub session: &'a str,
    pub ok: bool,
    pub error_kind: Option<ErrorKind>,
    pub latency_ms: u128,
    pub flagged: bool,
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl TelemetrySink {
    /// Open the configured log file; a missing or unopenable path disables
    /// file output with a warning.
    pub fn open(path: Option<&str>, rotation: &RotationConfig, log_stdout: bool) -> Self {
        let writer = match path {
            Some(p) => {
                match RotatingWriter::open(p, rotation.max_bytes, rotation.keep, rotation.compress)
                {
                    Ok(w) => Some(Arc::new(Mutex::new(w))),
                    Err(e) => {
                        tracing::warn!(path=%p, error=%e, "failed to open LOG_FILE; event log disabled");
                        None
                    }
                }
            }
            None => None,
        };
        Self {
            writer,
            log_stdout,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: &ChatEvent<'_>) {
        let payload = serde_json::json!({
            "schemaVersion": 1,
            "ts": chrono::Utc::now().to_rfc3339(),
            "event": event.kind,
            "session": short_session(event.session),
            "ok": event.ok,
            "errorKind": event.error_kind,
            "latencyMs": event.latency_ms,
            "flagged": event.flagged,
        });
        if let Some(writer) = &self.writer {
            if let Ok(mut guard) = writer.lock() {
                match guard.write_line(&payload.to_string()) {
                    Ok(()) => {
                        self.lines_total.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(error=%e, "failed to write event log line");
                        self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        if self.log_stdout {
            tracing::info!(
                target = "telemetry",
                event = event.kind,
                session = %short_session(event.session),
                ok = event.ok,
                errorKind = ?event.error_kind,
                latencyMs = event.latency_ms as u64,
                flagged = event.flagged
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.writer
            .as_ref()
            .and_then(|w| w.lock().ok().map(|g| g.current_size()))
            .unwrap_or(0)
    }
}
