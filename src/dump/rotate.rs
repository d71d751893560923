//! Time-based rotation of capture files.

use crate::dump::template::NameTemplate;
use crate::dump::writer::CaptureFile;
use crate::dump::{CaptureParams, CloseHook, PacketSink, RecordMeta};
use crate::error::MonitorResult;
use chrono::{DateTime, Local};
use std::path::Path;
use std::time::Duration;

/// A capture writer that switches to a freshly named file whenever the
/// current one has been open for longer than `interval`.
///
/// Rotation is checked on every write, so a quiet capture keeps its file open
/// until the next packet arrives. The close hook is carried over to every
/// file the writer opens.
pub struct RotatingWriter {
    template:   NameTemplate,
    params:     CaptureParams,
    interval:   Duration,
    created_at: DateTime<Local>,
    current:    CaptureFile,
    close_hook: Option<CloseHook>,
}

impl RotatingWriter {
    /// Opens the first file immediately.
    pub fn create(
        template: NameTemplate,
        params:   CaptureParams,
        interval: Duration,
    ) -> MonitorResult<Self> {
        Self::create_at(template, params, interval, Local::now())
    }

    pub fn create_at(
        template: NameTemplate,
        params:   CaptureParams,
        interval: Duration,
        now:      DateTime<Local>,
    ) -> MonitorResult<Self> {
        let current = CaptureFile::create_at(&template, params, now)?;
        Ok(Self {
            template,
            params,
            interval,
            created_at: now,
            current,
            close_hook: None,
        })
    }

    /// Path of the file currently being written.
    pub fn path(&self) -> &Path {
        self.current.path()
    }

    /// Whether the current file has been open strictly longer than the
    /// rotation interval at `now`.
    pub fn due(&self, now: DateTime<Local>) -> bool {
        (now - self.created_at)
            .to_std()
            .map_or(false, |elapsed| elapsed > self.interval)
    }

    /// Closes the current file and opens the next one, named for `now`.
    ///
    /// The old file is closed (and its hook run) before the new name is
    /// rendered, so a template without time specifiers reuses the same name
    /// only through the collision suffix.
    pub fn rotate(&mut self, now: DateTime<Local>) -> MonitorResult<()> {
        self.current.close()?;

        let mut next = CaptureFile::create_at(&self.template, self.params, now)?;
        if let Some(hook) = &self.close_hook {
            next.set_close_hook(hook.clone());
        }
        self.current = next;
        self.created_at = now;
        Ok(())
    }

    /// Writes one record, rotating first if the current file is due.
    pub fn write_at(
        &mut self,
        now:  DateTime<Local>,
        meta: RecordMeta,
        data: &[u8],
    ) -> MonitorResult<()> {
        if self.due(now) {
            self.rotate(now)?;
        }
        self.current.write(meta, data)
    }
}

impl PacketSink for RotatingWriter {
    fn write(&mut self, meta: RecordMeta, data: &[u8]) -> MonitorResult<()> {
        self.write_at(Local::now(), meta, data)
    }

    fn flush(&mut self) -> MonitorResult<()> {
        self.current.flush()
    }

    fn close(&mut self) -> MonitorResult<()> {
        self.current.close()
    }

    fn set_close_hook(&mut self, hook: CloseHook) {
        self.current.set_close_hook(hook.clone());
        self.close_hook = Some(hook);
    }
}
