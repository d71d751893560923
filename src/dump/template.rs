//! strftime-style file name templates.

use crate::error::{MonitorError, MonitorResult};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::path::PathBuf;

/// A validated file name template such as `/data/dump-%Y%m%d-%H%M%S.pcap`.
///
/// The template is rendered against the current local time whenever a new
/// capture file is opened, so files from different rotations get different
/// names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    raw: String,
}

impl NameTemplate {
    /// Checks every conversion specifier of `template`.
    ///
    /// # Errors
    /// [`MonitorError::InvalidTemplate`] for an empty template or an unknown
    /// specifier.
    pub fn parse(template: &str) -> MonitorResult<Self> {
        let invalid = template.is_empty()
            || StrftimeItems::new(template).any(|item| matches!(item, Item::Error));
        if invalid {
            return Err(MonitorError::InvalidTemplate {
                template: template.to_string(),
            });
        }
        Ok(Self {
            raw: template.to_string(),
        })
    }

    /// Renders the template for `now`.
    pub fn render(&self, now: &DateTime<Local>) -> MonitorResult<PathBuf> {
        let mut name = String::with_capacity(self.raw.len() + 16);
        write!(name, "{}", now.format_with_items(StrftimeItems::new(&self.raw))).map_err(|_| {
            MonitorError::InvalidTemplate {
                template: self.raw.clone(),
            }
        })?;
        Ok(PathBuf::from(name))
    }
}
