use std::path::Path;
use std::process::{Command, Stdio};

use sab_contracts::config::DisplayConfig;
use tracing::{debug, warn};

/// Which best-effort side effects run after an image is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    pub render_in_terminal: bool,
    pub open_in_viewer: bool,
}

impl DisplayOptions {
    pub fn apply(&self, display: &dyn ImageDisplay, path: &Path) {
        if self.render_in_terminal {
            display.render_in_terminal(path);
        }
        if self.open_in_viewer {
            display.open_in_viewer(path);
        }
    }
}

/// Failures are logged by the implementation and never returned.
pub trait ImageDisplay: Send + Sync {
    fn render_in_terminal(&self, path: &Path);
    fn open_in_viewer(&self, path: &Path);
}

/// Shells out to a terminal image renderer and the platform's viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDisplay {
    terminal_command: Vec<String>,
    viewer_command: Vec<String>,
}

impl SystemDisplay {
    pub fn from_config(config: &DisplayConfig) -> Self {
        let terminal_command = split_command(&config.terminal_command);
        let viewer_command = config
            .viewer_command
            .as_deref()
            .map(split_command)
            .filter(|argv| !argv.is_empty())
            .unwrap_or_else(platform_viewer);
        Self {
            terminal_command,
            viewer_command,
        }
    }

    fn argv_for(command: &[String], path: &Path) -> Option<Vec<String>> {
        if command.is_empty() {
            return None;
        }
        let mut argv = command.to_vec();
        argv.push(path.to_string_lossy().to_string());
        Some(argv)
    }
}

impl ImageDisplay for SystemDisplay {
    fn render_in_terminal(&self, path: &Path) {
        let Some(argv) = Self::argv_for(&self.terminal_command, path) else {
            warn!("no terminal image command configured");
            return;
        };
        debug!(command = ?argv, "rendering image in terminal");
        match Command::new(&argv[0]).args(&argv[1..]).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(command = %argv[0], %status, "terminal render exited unsuccessfully"),
            Err(err) => warn!(command = %argv[0], error = %err, "terminal render failed to start"),
        }
    }

    fn open_in_viewer(&self, path: &Path) {
        let Some(argv) = Self::argv_for(&self.viewer_command, path) else {
            warn!("no image viewer command available");
            return;
        };
        debug!(command = ?argv, "opening image viewer");
        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = spawned {
            warn!(command = %argv[0], error = %err, "image viewer failed to start");
        }
    }
}

fn split_command(raw: &str) -> Vec<String> {
    match shell_words::split(raw) {
        Ok(argv) => argv,
        Err(err) => {
            warn!(command = raw, error = %err, "ignoring unparsable display command");
            Vec::new()
        }
    }
}

fn platform_viewer() -> Vec<String> {
    let argv: &[&str] = if cfg!(target_os = "macos") {
        &["open"]
    } else if cfg!(target_os = "windows") {
        &["cmd", "/C", "start", ""]
    } else {
        &["xdg-open"]
    };
    argv.iter().map(|item| item.to_string()).collect()
}
