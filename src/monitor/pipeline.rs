//! The control loop.
//!
//! One thread owns the rotating archive and drives the session pool. It waits
//! on three sources at once: captured packets, flush ticks and the shutdown
//! signal, and handles whichever is ready first. Nothing else ever writes to
//! the archive, so rotation needs no locking.

use crate::dump::{command_hook, CaptureParams, CloseHook, PacketSink, RotatingWriter};
use crate::error::MonitorResult;
use crate::logger::{Event, SharedLogger};
use crate::monitor::eviction::FlushHandler;
use crate::monitor::parsers::CapturedPacket;
use crate::monitor::pool::SessionPool;
use crate::monitor::scanner::FlagScanner;
use crate::monitor::types::SharedStats;
use crate::monitor::MonitorConfig;
use crossbeam_channel::{select, tick, Receiver};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why [`Pipeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown channel fired.
    Shutdown,
    /// The capture thread hung up (end of a replayed file or capture error).
    SourceClosed,
}

pub struct Pipeline {
    archive: RotatingWriter,
    pool:    SessionPool,
    flusher: FlushHandler,
    logger:  SharedLogger,
    stats:   SharedStats,
}

impl Pipeline {
    /// Opens the first archive file and compiles the pattern.
    ///
    /// # Errors
    /// Any startup failure: the archive cannot be created or the pattern does
    /// not compile.
    pub fn build(cfg: &MonitorConfig, params: CaptureParams) -> MonitorResult<Self> {
        let mut archive =
            RotatingWriter::create(cfg.archive_template.clone(), params, cfg.rotate_interval)?;
        archive.set_close_hook(archive_hook(cfg));

        let scanner = match &cfg.flag {
            Some(flag) => {
                let scanner = FlagScanner::new(&flag.pattern, flag.template.clone(), params)?;
                Some(match &flag.post_dump {
                    Some(cmd) => scanner.with_close_hook(command_hook(cmd, Arc::clone(&cfg.logger))),
                    None => scanner,
                })
            }
            None => None,
        };

        let flusher = FlushHandler::new(
            scanner,
            cfg.flush_interval,
            Arc::clone(&cfg.logger),
            Arc::clone(&cfg.stats),
        );

        Ok(Self {
            archive,
            pool: SessionPool::new(),
            flusher,
            logger: Arc::clone(&cfg.logger),
            stats: Arc::clone(&cfg.stats),
        })
    }

    /// Path of the archive file currently open.
    pub fn archive_path(&self) -> &Path {
        self.archive.path()
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Archives one packet, then tracks it if it carries a TCP segment.
    ///
    /// # Errors
    /// Only archive write failures, which end the monitor.
    pub fn handle_packet(&mut self, packet: CapturedPacket) -> MonitorResult<()> {
        self.archive.write_packet(&packet)?;
        self.stats.packets_archived.fetch_add(1, Ordering::Relaxed);

        match self.pool.insert(packet, Instant::now()) {
            Ok(_) => self.stats.packets_tracked.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.packets_skipped.fetch_add(1, Ordering::Relaxed),
        };
        Ok(())
    }

    /// Runs one timed flush and pushes buffered archive records to disk.
    ///
    /// # Errors
    /// Archive flush failures, which end the monitor like write failures do.
    pub fn on_tick(&mut self) -> MonitorResult<()> {
        self.flusher.on_tick(&self.pool);
        self.archive.flush()
    }

    /// Handles events until shutdown is signalled or the packet source hangs
    /// up.
    pub fn run(
        &mut self,
        packets:        &Receiver<CapturedPacket>,
        shutdown:       &Receiver<()>,
        flush_interval: Duration,
    ) -> MonitorResult<StopReason> {
        let ticker = tick(flush_interval);

        loop {
            select! {
                recv(packets) -> msg => match msg {
                    Ok(packet) => self.handle_packet(packet)?,
                    Err(_) => return Ok(StopReason::SourceClosed),
                },
                recv(ticker) -> _ => self.on_tick()?,
                recv(shutdown) -> _ => return Ok(StopReason::Shutdown),
            }
        }
    }

    /// Archives and tracks whatever is still queued, evicts every session and
    /// closes the archive.
    ///
    /// `remaining` is consumed until the capture thread hangs up.
    pub fn finish<I>(mut self, remaining: I) -> MonitorResult<()>
    where
        I: IntoIterator<Item = CapturedPacket>,
    {
        let mut result = Ok(());
        for packet in remaining {
            if let Err(e) = self.handle_packet(packet) {
                result = Err(e);
                break;
            }
        }

        let evicted = self.flusher.drain(&self.pool);
        if evicted > 0 {
            self.logger.log(&Event::FlushPass { evicted, live: 0 });
        }

        let closed = self.archive.close();
        result.and(closed)
    }

    /// Evicts every session and closes the archive without touching queued
    /// packets. Used when the loop already failed.
    pub fn abort(self) -> MonitorResult<()> {
        self.finish(std::iter::empty())
    }
}

/// Close hook of the archive: counts and logs the file, then runs the
/// post-rotate command if one was given.
fn archive_hook(cfg: &MonitorConfig) -> CloseHook {
    let logger = Arc::clone(&cfg.logger);
    let stats = Arc::clone(&cfg.stats);
    let command = cfg
        .post_rotate
        .as_deref()
        .map(|cmd| command_hook(cmd, Arc::clone(&cfg.logger)));

    Arc::new(move |path: &Path| {
        stats.files_closed.fetch_add(1, Ordering::Relaxed);
        logger.log(&Event::FileClosed {
            path: &path.display().to_string(),
        });
        if let Some(command) = &command {
            command(path);
        }
    })
}
