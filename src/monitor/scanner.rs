//! Pattern matching over evicted sessions.

use crate::dump::{CaptureFile, CaptureParams, CloseHook, NameTemplate, PacketSink};
use crate::error::MonitorResult;
use crate::monitor::types::Session;
use regex::bytes::Regex;
use std::path::PathBuf;

/// Tests the reassembled payload of each evicted session against a pattern
/// and writes matching sessions to their own capture file.
///
/// Payload bytes are matched as raw bytes, so binary protocols work without a
/// UTF-8 round trip.
pub struct FlagScanner {
    pattern:    Regex,
    template:   NameTemplate,
    params:     CaptureParams,
    close_hook: Option<CloseHook>,
}

impl FlagScanner {
    /// # Errors
    /// [`MonitorError::Pattern`](crate::error::MonitorError::Pattern) if the
    /// pattern does not compile.
    pub fn new(pattern: &str, template: NameTemplate, params: CaptureParams) -> MonitorResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            template,
            params,
            close_hook: None,
        })
    }

    /// Hook run on every match file after it is closed.
    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.close_hook = Some(hook);
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.pattern.is_match(&session.payload())
    }

    /// Writes `session` to a new capture file if its payload matches.
    ///
    /// Returns the path of the file written, or `None` when the session did
    /// not match.
    pub fn scan(&self, session: &Session) -> MonitorResult<Option<PathBuf>> {
        if !self.matches(session) {
            return Ok(None);
        }

        let mut file = CaptureFile::create(&self.template, self.params)?;
        if let Some(hook) = &self.close_hook {
            file.set_close_hook(hook.clone());
        }
        let path = file.path().to_path_buf();

        // Close even when a write fails so the descriptor is released; the
        // write error wins.
        let written = session
            .packets
            .iter()
            .try_for_each(|packet| file.write_packet(packet));
        let closed = file.close();
        written?;
        closed?;
        Ok(Some(path))
    }
}
