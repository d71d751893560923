//! Timed eviction of sessions from the pool.
//!
//! The control loop calls [`FlushHandler::on_tick`] every flush interval and
//! [`FlushHandler::drain`] once on shutdown. Every evicted session goes
//! through [`FlushHandler::handle`], which counts it and, when a pattern was
//! configured, hands it to the [`FlagScanner`].

use crate::logger::{Event, SharedLogger};
use crate::monitor::pool::SessionPool;
use crate::monitor::scanner::FlagScanner;
use crate::monitor::types::{Session, SharedStats};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

pub struct FlushHandler {
    scanner:    Option<FlagScanner>,
    logger:     SharedLogger,
    stats:      SharedStats,
    /// Sessions idle for longer than this are evicted on the next tick.
    timeout:    Duration,
    started_at: Instant,
}

impl FlushHandler {
    pub fn new(
        scanner: Option<FlagScanner>,
        timeout: Duration,
        logger:  SharedLogger,
        stats:   SharedStats,
    ) -> Self {
        Self {
            scanner,
            logger,
            stats,
            timeout,
            started_at: Instant::now(),
        }
    }

    /// Evicts closed sessions and sessions idle for longer than the timeout.
    pub fn on_tick(&self, pool: &SessionPool) -> usize {
        self.on_tick_at(pool, Instant::now())
    }

    pub fn on_tick_at(&self, pool: &SessionPool, now: Instant) -> usize {
        // Early in the process lifetime `now - timeout` may predate every
        // Instant we can represent; nothing can be older than our own start.
        let cutoff = now.checked_sub(self.timeout).unwrap_or(self.started_at);
        let evicted = pool.flush(cutoff, |session| self.handle(session));

        if evicted > 0 {
            self.logger.log(&Event::FlushPass {
                evicted,
                live: pool.len(),
            });
        }
        evicted
    }

    /// Evicts every remaining session.
    pub fn drain(&self, pool: &SessionPool) -> usize {
        pool.flush_all(|session| self.handle(session))
    }

    /// Counts one evicted session and scans it. Failures are logged only.
    pub fn handle(&self, session: Session) {
        self.stats.sessions_evicted.fetch_add(1, Ordering::Relaxed);

        let Some(scanner) = &self.scanner else {
            return;
        };

        match scanner.scan(&session) {
            Ok(None) => {}
            Ok(Some(path)) => {
                self.stats.sessions_matched.fetch_add(1, Ordering::Relaxed);
                self.logger.log(&Event::SessionMatched {
                    key:     &session.key.to_string(),
                    packets: session.packets.len(),
                    path:    &path.display().to_string(),
                });
            }
            Err(e) => self.logger.log(&Event::DumpFailed {
                key:   &session.key.to_string(),
                error: &e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{CaptureParams, NameTemplate};
    use crate::logger::Logger;
    use crate::monitor::parsers::linktype;
    use crate::monitor::parsers::testing::*;
    use crate::monitor::types::SessionStats;
    use std::path::Path;
    use std::sync::Arc;

    const PARAMS: CaptureParams = CaptureParams {
        snaplen:  1600,
        linktype: linktype::ETHERNET,
    };

    fn handler(dir: Option<&Path>, timeout: Duration) -> (FlushHandler, SharedStats) {
        let scanner = dir.map(|d| {
            let t = NameTemplate::parse(&format!("{}/m-%H%M%S.pcap", d.display())).unwrap();
            FlagScanner::new(r"flag\{[a-z]+\}", t, PARAMS).unwrap()
        });
        let stats = SessionStats::new();
        let logger = Arc::new(Logger::new(false, None).unwrap());
        (FlushHandler::new(scanner, timeout, logger, Arc::clone(&stats)), stats)
    }

    #[test]
    fn test_tick_evicts_only_closed_before_timeout() {
        let (h, stats) = handler(None, Duration::from_secs(300));
        let pool = SessionPool::new();
        let now = Instant::now();
        pool.insert(client(FIN, b""), now).unwrap();
        pool.insert(tcp_packet(([10, 0, 0, 5], 1), ([10, 0, 0, 2], 1337), NONE, b""), now)
            .unwrap();

        assert_eq!(h.on_tick_at(&pool, now), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(stats.sessions_evicted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tick_evicts_idle_sessions() {
        let (h, _) = handler(None, Duration::from_secs(5));
        let pool = SessionPool::new();
        let t0 = Instant::now();
        pool.insert(client(NONE, b""), t0).unwrap();

        assert_eq!(h.on_tick_at(&pool, t0 + Duration::from_secs(5)), 0);
        assert_eq!(h.on_tick_at(&pool, t0 + Duration::from_secs(6)), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_drain_scans_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (h, stats) = handler(Some(dir.path()), Duration::from_secs(300));
        let pool = SessionPool::new();
        let now = Instant::now();
        pool.insert(client(NONE, b"flag{live}"), now).unwrap();
        pool.insert(tcp_packet(([10, 0, 0, 5], 1), ([10, 0, 0, 2], 1337), NONE, b"nope"), now)
            .unwrap();

        assert_eq!(h.drain(&pool), 2);
        assert_eq!(stats.sessions_evicted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.sessions_matched.load(Ordering::Relaxed), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dump_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let (h, stats) = handler(Some(missing.as_path()), Duration::from_secs(300));
        let pool = SessionPool::new();
        pool.insert(client(FIN, b"flag{x}"), Instant::now()).unwrap();

        assert_eq!(h.drain(&pool), 1);
        assert_eq!(stats.sessions_matched.load(Ordering::Relaxed), 0);
    }
}
