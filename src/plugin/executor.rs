// src/plugin/executor.rs
//! Subprocess execution for external plugins
//!
//! One request per process: the request line goes to stdin, stdin is closed,
//! and the single response is read from stdout. stdout and stderr are drained
//! on their own threads so a chatty plugin cannot fill a pipe and stall.
//! A plugin that outlives its time budget is killed.

use super::protocol::{Request, Response};
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default time budget for one plugin invocation
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of stderr lines kept in a failure message
const STDERR_TAIL_LINES: usize = 3;

/// Runs external plugin executables
#[derive(Debug, Clone)]
pub struct PluginExecutor {
    timeout: Duration,
}

impl Default for PluginExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_TIMEOUT)
    }
}

impl PluginExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `entrypoint` with `request` and parse its response
    ///
    /// The entrypoint must already have been validated against the plugin
    /// directory. The plugin runs with its own directory as working directory.
    pub fn run(&self, plugin_id: &str, entrypoint: &Path, workdir: &Path, request: &Request) -> Result<Response> {
        let line = request.to_line()?;
        info!("Running plugin {} ({})", plugin_id, request.command);

        let mut child = Command::new(entrypoint)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::PluginFailed {
                plugin: plugin_id.to_string(),
                message: format!("failed to start: {}", e),
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(line.as_bytes())
        {
            // A plugin may exit without reading its request
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                warn!("Could not write request to plugin {}: {}", plugin_id, e);
            }
        }

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                // Grandchildren may still hold the pipes; leave the readers detached
                drop(stdout);
                drop(stderr);
                warn!(
                    "Plugin {} killed after {} seconds",
                    plugin_id,
                    self.timeout.as_secs()
                );
                return Err(Error::PluginTimeout {
                    plugin: plugin_id.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        log_stderr(plugin_id, &stderr);

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let tail = stderr_tail(&stderr);
            let message = if tail.is_empty() {
                format!("exited with status {}", code)
            } else {
                format!("exited with status {}: {}", code, tail)
            };
            return Err(Error::PluginFailed {
                plugin: plugin_id.to_string(),
                message,
            });
        }

        Response::from_stdout(plugin_id, &stdout)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn log_stderr(plugin_id: &str, stderr: &[u8]) {
    for line in String::from_utf8_lossy(stderr).lines() {
        debug!("[{}] {}", plugin_id, line);
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
