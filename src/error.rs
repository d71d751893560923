//! Error type shared by the capture pipeline.
//!
//! Every variant names the operation that failed and, for file errors, the
//! path involved, so a message printed at the top of `main` is enough to tell
//! which writer or which startup step went wrong.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    // ── Packet classification ────────────────────────────────────────────────
    #[error("packet has no network layer")]
    NoNetworkLayer,

    #[error("packet is not a TCP segment")]
    NotTcp,

    // ── Capture files ────────────────────────────────────────────────────────
    #[error("invalid file name template {template:?}")]
    InvalidTemplate { template: String },

    #[error("cannot create capture file '{}': {source}", path.display())]
    CreateFile { path: PathBuf, source: io::Error },

    #[error("cannot write to capture file '{}': {source}", path.display())]
    WriteFile {
        path:   PathBuf,
        source: pcap_file::PcapError,
    },

    #[error("cannot flush capture file '{}': {source}", path.display())]
    FlushFile { path: PathBuf, source: io::Error },

    #[error("cannot close capture file '{}': {source}", path.display())]
    CloseFile { path: PathBuf, source: io::Error },

    #[error("capture file '{}' is already closed", path.display())]
    AlreadyClosed { path: PathBuf },

    // ── Startup configuration ────────────────────────────────────────────────
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Packet source ────────────────────────────────────────────────────────
    #[error("cannot open capture on '{source_name}': {error}")]
    CaptureOpen {
        source_name: String,
        error:       pcap::Error,
    },

    #[error("cannot apply capture filter {filter:?}: {error}")]
    CaptureFilter { filter: String, error: pcap::Error },

    #[error("cannot install shutdown handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
