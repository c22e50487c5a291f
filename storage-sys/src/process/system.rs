// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};
use which::which;

use super::{ToolCommand, ToolEvent, ToolOutput, ToolRunner};
use crate::error::{Result, SysError};
use crate::output::LineSplitter;

/// Runs tools as child processes, draining stdout and stderr on reader
/// threads so neither pipe can fill up and stall the tool.
#[derive(Debug, Default)]
pub struct SystemToolRunner {
    overrides: HashMap<String, PathBuf>,
}

impl SystemToolRunner {
    pub fn new() -> Self {
        Self::with_overrides(HashMap::new())
    }

    /// Use explicit binaries for some programs instead of a PATH lookup
    pub fn with_overrides(overrides: HashMap<String, PathBuf>) -> Self {
        if unsafe { libc::geteuid() } != 0 {
            warn!("Not running as root; partitioning and LVM tools will likely fail");
        }
        Self { overrides }
    }

    fn resolve(&self, program: &str) -> Result<PathBuf> {
        if let Some(path) = self.overrides.get(program) {
            return Ok(path.clone());
        }
        which(program).map_err(|_| SysError::ToolNotFound(program.to_string()))
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(
        &mut self,
        command: &ToolCommand,
        on_event: &mut dyn FnMut(&ToolEvent),
    ) -> Result<ToolOutput> {
        let binary = self.resolve(&command.program)?;
        debug!("Running {}", command);

        let mut child = Command::new(&binary)
            .args(&command.args)
            .env("LC_ALL", "C")
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SysError::OperationFailed(format!("Failed to execute {binary:?}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SysError::OperationFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SysError::OperationFailed("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel();
        let readers = [
            spawn_reader(stdout, tx.clone(), ToolEvent::Stdout),
            spawn_reader(stderr, tx, ToolEvent::Stderr),
        ];

        // A tool may exit before reading its input; reap it either way.
        let stdin_error = match (&command.stdin, child.stdin.take()) {
            (Some(secret), Some(mut stdin)) => stdin.write_all(secret.expose().as_bytes()).err(),
            _ => None,
        };

        let mut output = ToolOutput::default();
        // Ends once both reader threads dropped their sender
        for event in rx {
            on_event(&event);
            output.record(&event);
        }
        for reader in readers {
            if reader.join().is_err() {
                warn!("Output reader for {} panicked", command.program);
            }
        }

        let status = child.wait()?;
        output.status = status.code().unwrap_or(-1);
        if let Some(signal) = status.signal() {
            warn!("{} was killed by signal {}", command.program, signal);
        }
        debug!("{} exited with {}", command.program, output.status);

        if let Some(e) = stdin_error {
            warn!("Could not pass input to {}: {}", command.program, e);
            if output.success() {
                return Err(e.into());
            }
        }
        Ok(output)
    }
}

fn spawn_reader<R>(mut reader: R, tx: Sender<ToolEvent>, wrap: fn(String) -> ToolEvent) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut splitter = LineSplitter::default();
        let mut buf = [0_u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.feed(&buf[..n]) {
                        if tx.send(wrap(line)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send(wrap(line));
        }
    })
}
