//! Capture engine entry point.
//!
//! [`start_monitor`] opens the packet source (a live interface or a saved
//! capture file), installs the `tcp and port N` filter and splits the work
//! over two threads:
//!
//! * the capture thread reads packets from libpcap and sends owned copies over
//!   a bounded channel;
//! * the calling thread runs the [`Pipeline`](pipeline::Pipeline) control loop,
//!   which archives every packet, tracks TCP sessions and flushes them on a
//!   timer.
//!
//! On shutdown the capture thread stops at its next read timeout, the loop
//! drains what is still queued, evicts every remaining session and closes the
//! archive.

pub mod config;
pub mod eviction;
pub mod flow;
pub mod parsers;
pub mod pipeline;
pub mod pool;
pub mod scanner;
pub mod types;

use crate::dump::{CaptureParams, NameTemplate};
use crate::error::{MonitorError, MonitorResult};
use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{OFFLINE_SNAPLEN, PACKET_CHANNEL_CAPACITY, READ_TIMEOUT_MS};
use crate::monitor::parsers::CapturedPacket;
use crate::monitor::pipeline::{Pipeline, StopReason};
use crate::monitor::types::*;

use crossbeam_channel::{bounded, Receiver, Sender};
use pcap::{Activated, Capture, Device};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pattern matching settings. Present only when `--flag` was given.
pub struct FlagConfig {
    /// Regular expression tested against each session's payload.
    pub pattern:   String,
    /// Name template of the per-match capture files.
    pub template:  NameTemplate,
    /// Command run with the path of every match file.
    pub post_dump: Option<String>,
}

/// Configuration bundle passed from `main` into the engine.
pub struct MonitorConfig {
    /// Interface for live capture. `None` lets libpcap pick the default device.
    pub interface:        Option<String>,
    /// Saved capture to replay instead of capturing live.
    pub pcap_file:        Option<PathBuf>,
    /// TCP port to monitor.
    pub port:             u16,
    /// Bytes kept per packet. `None` uses the compile-time default.
    pub snaplen:          Option<u32>,
    /// Name template of the rotating archive.
    pub archive_template: NameTemplate,
    /// How long one archive file stays open.
    pub rotate_interval:  Duration,
    /// Command run with the path of every closed archive file.
    pub post_rotate:      Option<String>,
    pub flag:             Option<FlagConfig>,
    /// Session flush period, also the idle timeout of a session.
    pub flush_interval:   Duration,
    /// Shared structured logger.
    pub logger:           SharedLogger,
    /// Shared session statistics for the shutdown summary.
    pub stats:            SharedStats,
    /// Set to `true` by the signal handler; the capture thread exits on its
    /// next read.
    pub shutdown:         ShutdownFlag,
}

impl MonitorConfig {
    /// BPF filter installed on the capture handle.
    pub fn filter(&self) -> String {
        format!("tcp and port {}", self.port)
    }
}

/// Runs the monitor until `shutdown_rx` fires or the packet source ends.
///
/// # Errors
/// Startup failures (capture cannot be opened, filter rejected, archive
/// cannot be created, pattern invalid) and archive write failures. Errors
/// from match dumps and hooks are logged instead.
pub fn start_monitor(cfg: MonitorConfig, shutdown_rx: Receiver<()>) -> MonitorResult<()> {
    let (cap, source, snaplen) = open_capture(&cfg)?;
    let filter = cfg.filter();
    let cap = apply_filter(cap, &filter)?;
    let linktype = link_type(&cap);

    cfg.logger.log(&Event::CaptureStarted {
        source:   &source,
        filter:   &filter,
        snaplen,
        linktype,
    });

    let mut pipeline = Pipeline::build(&cfg, CaptureParams { snaplen, linktype })?;

    let (tx, rx) = bounded(PACKET_CHANNEL_CAPACITY);
    let capture_handle = {
        let shutdown = Arc::clone(&cfg.shutdown);
        let logger = Arc::clone(&cfg.logger);
        let source = source.clone();
        thread::spawn(move || pump(cap, linktype, tx, shutdown, logger, source))
    };

    let outcome = pipeline.run(&rx, &shutdown_rx, cfg.flush_interval);
    cfg.shutdown.store(true, Ordering::Relaxed);

    let result = match outcome {
        Ok(reason) => {
            if reason == StopReason::SourceClosed {
                cfg.logger.log(&Event::Info {
                    message: "Packet source ended",
                });
            }
            pipeline.finish(rx.iter())
        }
        Err(e) => {
            // Unblock the capture thread before joining it.
            drop(rx);
            if let Err(abort_err) = pipeline.abort() {
                cfg.logger.log(&Event::Error {
                    message: &format!("Final flush after failure: {}", abort_err),
                });
            }
            Err(e)
        }
    };

    join_capture(capture_handle, &source, &cfg.logger);
    result
}

/// Waits for the capture thread, logging a panic instead of dropping it.
fn join_capture(handle: thread::JoinHandle<()>, source: &str, logger: &SharedLogger) {
    if handle.join().is_err() {
        logger.log(&Event::CaptureError {
            source,
            error: "capture thread panicked",
        });
    }
}

// ── Packet source ─────────────────────────────────────────────────────────────

/// Opens the replay file or live device named by `cfg`.
///
/// Returns the activated handle, a printable source name and the snap length
/// recorded in archive headers.
fn open_capture(cfg: &MonitorConfig) -> MonitorResult<(Capture<dyn Activated>, String, u32)> {
    if let Some(path) = &cfg.pcap_file {
        let name = path.display().to_string();
        let cap = Capture::from_file(path).map_err(|error| MonitorError::CaptureOpen {
            source_name: name.clone(),
            error,
        })?;
        return Ok((cap.into(), name, effective_snaplen(cfg.snaplen, OFFLINE_SNAPLEN)));
    }

    let device = match &cfg.interface {
        Some(name) => Device::from(name.as_str()),
        None => pcap::Device::lookup()
            .map_err(|error| MonitorError::CaptureOpen {
                source_name: "default device".to_string(),
                error,
            })?
            .ok_or_else(|| MonitorError::Config("no capture device found".to_string()))?,
    };
    let name = device.name.clone();
    let snaplen = effective_snaplen(cfg.snaplen, config::DEFAULT_SNAPLEN);

    let cap = Capture::from_device(device)
        .map_err(|error| MonitorError::CaptureOpen {
            source_name: name.clone(),
            error,
        })?
        .promisc(false)
        .snaplen(snaplen as i32)
        .timeout(READ_TIMEOUT_MS) // wake regularly so the shutdown flag is seen
        .open()
        .map_err(|error| MonitorError::CaptureOpen {
            source_name: name.clone(),
            error,
        })?;

    Ok((cap.into(), name, snaplen))
}

/// Snap length written to archive headers and handed to libpcap.
///
/// A requested 0 means "whole packet", as it does for libpcap. The result is
/// always in `1..=i32::MAX`, so the header and the live handle agree.
fn effective_snaplen(requested: Option<u32>, default: u32) -> u32 {
    match requested {
        Some(0) => OFFLINE_SNAPLEN,
        Some(n) => n.min(i32::MAX as u32),
        None => default,
    }
}

fn apply_filter(
    mut cap: Capture<dyn Activated>,
    filter:  &str,
) -> MonitorResult<Capture<dyn Activated>> {
    cap.filter(filter, true)
        .map_err(|error| MonitorError::CaptureFilter {
            filter: filter.to_string(),
            error,
        })?;
    Ok(cap)
}

fn link_type(cap: &Capture<dyn Activated>) -> u32 {
    u32::try_from(cap.get_datalink().0).unwrap_or(parsers::linktype::ETHERNET)
}

/// Capture thread body. Returns when shutdown is flagged, the source is
/// exhausted or fails, or the control loop hangs up.
fn pump<T: Activated + ?Sized>(
    mut cap:  Capture<T>,
    linktype: u32,
    tx:       Sender<CapturedPacket>,
    shutdown: ShutdownFlag,
    logger:   SharedLogger,
    source:   String,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(pkt) => {
                if tx.send(CapturedPacket::from_pcap(&pkt, linktype)).is_err() {
                    break;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue, // woke up to check shutdown flag
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                logger.log(&Event::CaptureError {
                    source: &source,
                    error:  &e.to_string(),
                });
                break;
            }
        }
    }
}
