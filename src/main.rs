mod cli;
mod dump;
mod error;
mod logger;
mod monitor;

use clap::Parser;
use cli::Cli;
use crossbeam_channel::{bounded, Sender};
use dump::NameTemplate;
use error::MonitorResult;
use logger::{Event, Logger, SharedLogger};
use monitor::types::{SessionStats, SharedStats, ShutdownFlag};
use monitor::{start_monitor, FlagConfig, MonitorConfig};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let cli = Cli::parse();

    // Initialize logger with optional JSON output and file logging
    let logger: SharedLogger = match Logger::new(cli.json, cli.log_file.as_deref()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            eprintln!("[!] Cannot open log file: {}", e);
            process::exit(1);
        }
    };

    let session_start = Instant::now();
    let stats = SessionStats::new();
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));

    let result = run(&cli, Arc::clone(&logger), Arc::clone(&stats), shutdown);

    print_summary(&logger, &stats, session_start);

    if let Err(e) = result {
        logger.log(&Event::Error {
            message: &e.to_string(),
        });
        process::exit(1);
    }
}

/// Validates the configuration, installs the signal handler and runs the
/// monitor to completion.
fn run(cli: &Cli, logger: SharedLogger, stats: SharedStats, shutdown: ShutdownFlag) -> MonitorResult<()> {
    let cfg = build_config(cli, logger, stats, Arc::clone(&shutdown))?;

    let (stop_tx, stop_rx) = bounded(1);
    register_shutdown_handler(shutdown, stop_tx, Arc::clone(&cfg.logger))?;

    cfg.logger.log(&Event::Info {
        message: "flagmon started",
    });
    start_monitor(cfg, stop_rx)
}

/// Turns parsed arguments into a [`MonitorConfig`], validating templates up
/// front so a typo fails before any capture is opened.
fn build_config(
    cli:      &Cli,
    logger:   SharedLogger,
    stats:    SharedStats,
    shutdown: ShutdownFlag,
) -> MonitorResult<MonitorConfig> {
    let flag = match (&cli.flag, &cli.flag_write) {
        (Some(pattern), Some(template)) => Some(FlagConfig {
            pattern:   pattern.clone(),
            template:  NameTemplate::parse(template)?,
            post_dump: cli.flag_post.clone(),
        }),
        _ => None,
    };

    Ok(MonitorConfig {
        interface:        cli.interface.clone(),
        pcap_file:        cli.pcap_file.clone(),
        port:             cli.port,
        snaplen:          cli.snaplen,
        archive_template: NameTemplate::parse(&cli.write)?,
        rotate_interval:  cli.rotate_interval,
        post_rotate:      cli.post_rotate.clone(),
        flag,
        flush_interval:   cli.flush_interval,
        logger,
        stats,
        shutdown,
    })
}

/// Turns SIGINT/SIGTERM into a shutdown: the flag stops the capture thread
/// and the channel wakes the control loop.
fn register_shutdown_handler(
    shutdown: ShutdownFlag,
    stop_tx:  Sender<()>,
    logger:   SharedLogger,
) -> MonitorResult<()> {
    ctrlc::set_handler(move || {
        logger.log(&Event::Info {
            message: "Signal received, shutting down...",
        });
        shutdown.store(true, Ordering::SeqCst);
        let _ = stop_tx.try_send(());
    })?;
    Ok(())
}

/// Prints session summary statistics.
fn print_summary(logger: &SharedLogger, stats: &SharedStats, session_start: Instant) {
    logger.log(&Event::SessionSummary {
        duration_secs:    session_start.elapsed().as_secs(),
        packets_archived: stats.packets_archived.load(Ordering::Relaxed),
        packets_tracked:  stats.packets_tracked.load(Ordering::Relaxed),
        packets_skipped:  stats.packets_skipped.load(Ordering::Relaxed),
        sessions_evicted: stats.sessions_evicted.load(Ordering::Relaxed),
        sessions_matched: stats.sessions_matched.load(Ordering::Relaxed),
        files_closed:     stats.files_closed.load(Ordering::Relaxed),
    });
}
