//! Structured logging for flagmon.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a log
//! file. Output is either human-readable plain text or newline-delimited JSON
//! (NDJSON) for log shippers.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that flagmon can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in every JSON
/// line so consumers can filter by type.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// The capture handle is open and the filter is installed.
    CaptureStarted {
        source:   &'a str,
        filter:   &'a str,
        snaplen:  u32,
        linktype: u32,
    },

    /// The capture source failed after startup; the monitor shuts down.
    CaptureError { source: &'a str, error: &'a str },

    /// A capture file was flushed and closed.
    FileClosed { path: &'a str },

    /// A post-close command could not be started or exited unsuccessfully.
    HookFailed {
        command: &'a str,
        path:    &'a str,
        error:   &'a str,
    },

    /// An evicted session matched the pattern and was written out.
    SessionMatched {
        key:     &'a str,
        packets: usize,
        path:    &'a str,
    },

    /// A matched session could not be written out.
    DumpFailed { key: &'a str, error: &'a str },

    /// A periodic flush evicted at least one session.
    FlushPass { evicted: usize, live: usize },

    /// A non-fatal error on the packet path.
    Error { message: &'a str },

    /// Session summary emitted on shutdown.
    SessionSummary {
        duration_secs:    u64,
        packets_archived: u64,
        packets_tracked:  u64,
        packets_skipped:  u64,
        sessions_evicted: u64,
        sessions_matched: u64,
        files_closed:     u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every
/// component that emits events. The internal `Mutex` serialises file writes
/// so lines from the control loop and hook waiter threads never interleave.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json: bool,
    /// Optional buffered file writer. `None` when `--log-file` was not given.
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

/// Type alias used throughout the codebase for convenience.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&Path>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, file })
    }

    /// Logs a single [`Event`] to stdout and, if configured, the log file.
    pub fn log(&self, event: &Event) {
        let line = self.render(event);

        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats one event as a full output line, timestamp included.
    fn render(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            // Go through a Value so the timestamp sits next to the event fields.
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, Self::plain_text(event))
        }
    }

    /// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
    fn plain_text(event: &Event) -> String {
        match event {
            Event::Info { message } =>
                format!("[INFO] {}", message),

            Event::CaptureStarted { source, filter, snaplen, linktype } =>
                format!("[CAPTURE] {} filter=\"{}\" snaplen={} linktype={}",
                        source, filter, snaplen, linktype),

            Event::CaptureError { source, error } =>
                format!("[CAPTURE ERROR] {}: {}", source, error),

            Event::FileClosed { path } =>
                format!("[CLOSED] {}", path),

            Event::HookFailed { command, path, error } =>
                format!("[HOOK FAILED] {} {}: {}", command, path, error),

            Event::SessionMatched { key, packets, path } =>
                format!("[MATCH] session {} ({} packets) → {}", key, packets, path),

            Event::DumpFailed { key, error } =>
                format!("[DUMP FAILED] session {}: {}", key, error),

            Event::FlushPass { evicted, live } =>
                format!("[FLUSH] evicted={} live={}", evicted, live),

            Event::Error { message } =>
                format!("[ERROR] {}", message),

            Event::SessionSummary {
                duration_secs, packets_archived, packets_tracked, packets_skipped,
                sessions_evicted, sessions_matched, files_closed,
            } => format!(
                "[SUMMARY] duration={}s archived={} tracked={} skipped={} evicted={} matched={} files={}",
                duration_secs, packets_archived, packets_tracked, packets_skipped,
                sessions_evicted, sessions_matched, files_closed
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_carries_tag_and_timestamp() {
        let logger = Logger::new(true, None).unwrap();
        let line = logger.render(&Event::FlushPass { evicted: 2, live: 5 });
        let val: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(val["event"], "flush_pass");
        assert_eq!(val["evicted"], 2);
        assert_eq!(val["live"], 5);
        assert!(val["timestamp"].is_string());
    }

    #[test]
    fn test_plain_text_line() {
        let logger = Logger::new(false, None).unwrap();
        let line = logger.render(&Event::FileClosed { path: "/tmp/a.pcap" });
        assert!(line.starts_with('['));
        assert!(line.ends_with("[CLOSED] /tmp/a.pcap"));
    }

    #[test]
    fn test_log_file_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flagmon.log");
        let logger = Logger::new(true, Some(path.as_path())).unwrap();

        logger.log(&Event::Info { message: "one" });
        logger.log(&Event::Error { message: "two" });

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"info\""));
        assert!(lines[1].contains("\"message\":\"two\""));
    }
}
