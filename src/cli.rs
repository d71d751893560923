use crate::monitor::config::{DEFAULT_FLUSH_INTERVAL, DEFAULT_ROTATE_INTERVAL};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// flagmon: archive TCP traffic on one port and flag sessions carrying a secret.
///
/// Every packet to or from the monitored port is written to a rotating
/// capture archive. TCP sessions are reassembled in memory; when a session
/// closes or goes idle its payload is matched against `--flag` and matching
/// sessions get a capture file of their own.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "flagmon",
    version = "0.1.0",
    about   = "Rotating TCP capture with per-session pattern dumps",
    long_about = None,
)]
pub struct Cli {
    // ── Packet source ────────────────────────────────────────────────────────

    /// Network interface to capture on.
    ///
    /// If omitted, libpcap picks the default device.
    #[arg(short = 'i', long = "interface", value_name = "IFACE", conflicts_with = "pcap_file")]
    pub interface: Option<String>,

    /// Read packets from a saved capture file instead of a live interface.
    ///
    /// The monitor exits once the file is exhausted, after a final flush.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub pcap_file: Option<PathBuf>,

    /// TCP port to monitor.
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: u16,

    /// Bytes kept per packet (default 1600 live, 262144 on replay).
    #[arg(
        short = 's',
        long = "snaplen",
        value_name = "BYTES",
        value_parser = clap::value_parser!(u32).range(1..=i32::MAX as i64),
    )]
    pub snaplen: Option<u32>,

    // ── Archive ──────────────────────────────────────────────────────────────

    /// Archive file name, strftime-style (e.g. `/data/dump-%Y%m%d-%H%M%S.pcap`).
    #[arg(short = 'w', long = "write", value_name = "TEMPLATE")]
    pub write: String,

    /// Time after which the archive is rotated (e.g. `1h`, `30m`, `1h30m`).
    #[arg(
        short = 'd',
        long = "rotate-interval",
        value_name = "DURATION",
        default_value = DEFAULT_ROTATE_INTERVAL,
        value_parser = parse_duration,
    )]
    pub rotate_interval: Duration,

    /// Command run with the path of each closed archive file.
    #[arg(short = 'z', long = "post-rotate", value_name = "CMD")]
    pub post_rotate: Option<String>,

    // ── Flagged sessions ─────────────────────────────────────────────────────

    /// Regular expression matched against each session's payload.
    #[arg(long = "flag", value_name = "REGEX", requires = "flag_write")]
    pub flag: Option<String>,

    /// File name template for sessions matching `--flag`, strftime-style.
    #[arg(long = "flag-w", value_name = "TEMPLATE", requires = "flag")]
    pub flag_write: Option<String>,

    /// Command run with the path of each flagged-session file.
    #[arg(long = "flag-z", value_name = "CMD", requires = "flag")]
    pub flag_post: Option<String>,

    /// Session flush interval; sessions idle for longer are evicted.
    #[arg(
        long = "flag-d",
        value_name = "DURATION",
        default_value = DEFAULT_FLUSH_INTERVAL,
        value_parser = parse_duration,
    )]
    pub flush_interval: Duration,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    ///
    /// The file is created if it does not exist and appended to if it does.
    /// JSON mode (--json) affects the format written to this file as well.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}

/// Parses durations such as `90s`, `5m`, `1h30m` or `250ms`.
///
/// Each component is an unsigned integer followed by `h`, `m`, `s` or `ms`.
/// The total must be non-zero.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let mut total = Duration::ZERO;
    let mut rest = input.trim();
    if rest.is_empty() {
        return Err("empty duration".to_string());
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in {:?}", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("number too large in {:?}", input))?;
        rest = &rest[digits..];

        let (unit, len) = if rest.starts_with("ms") {
            (Duration::from_millis(1), 2)
        } else if rest.starts_with('h') {
            (Duration::from_secs(3600), 1)
        } else if rest.starts_with('m') {
            (Duration::from_secs(60), 1)
        } else if rest.starts_with('s') {
            (Duration::from_secs(1), 1)
        } else {
            return Err(format!("missing or unknown unit in {:?} (use h, m, s or ms)", input));
        };
        rest = &rest[len..];

        let part = u32::try_from(value)
            .ok()
            .and_then(|v| unit.checked_mul(v))
            .ok_or_else(|| format!("duration too large: {:?}", input))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration too large: {:?}", input))?;
    }

    if total.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(total)
}
