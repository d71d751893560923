//! External commands run on closed capture files.

use crate::dump::CloseHook;
use crate::logger::{Event, SharedLogger};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::thread;

/// Builds a close hook that runs `command <path>` for every closed file.
///
/// The child is waited on from a detached thread so a slow command never
/// stalls the control loop. Spawn failures and non-zero exits are logged as
/// [`Event::HookFailed`] and otherwise ignored.
pub fn command_hook(command: &str, logger: SharedLogger) -> CloseHook {
    let command = command.to_string();

    Arc::new(move |path: &Path| {
        let display = path.display().to_string();

        let mut child = match Command::new(&command).arg(path).spawn() {
            Ok(child) => child,
            Err(e) => {
                logger.log(&Event::HookFailed {
                    command: &command,
                    path:    &display,
                    error:   &e.to_string(),
                });
                return;
            }
        };

        let command = command.clone();
        let logger = Arc::clone(&logger);
        thread::spawn(move || {
            let error = match child.wait() {
                Ok(status) if status.success() => return,
                Ok(status) => format!("exited with {}", status),
                Err(e) => e.to_string(),
            };
            logger.log(&Event::HookFailed {
                command: &command,
                path:    &display,
                error:   &error,
            });
        });
    })
}
