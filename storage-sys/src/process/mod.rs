// SPDX-License-Identifier: GPL-3.0-only

//! External tool execution
//!
//! Every tool the engine runs goes through a [`ToolRunner`]. Output is
//! delivered line by line through a callback while the tool is still
//! running, then returned in full with the exit status.

mod dry_run;
mod system;

use std::fmt;

use storage_types::Secret;

use crate::Result;

pub use dry_run::DryRunRunner;
pub use system::SystemToolRunner;

/// One tool invocation: program, arguments and optional secret input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the tool's stdin, never rendered or logged
    pub stdin: Option<Secret>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Command line as it would be typed, without the stdin payload
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A line of tool output, as soon as it is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit status; -1 when the tool was killed by a signal
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    pub fn record(&mut self, event: &ToolEvent) {
        match event {
            ToolEvent::Stdout(line) => self.stdout.push(line.clone()),
            ToolEvent::Stderr(line) => self.stderr.push(line.clone()),
        }
    }
}

pub trait ToolRunner: Send {
    /// Run `command` to completion, handing each output line to
    /// `on_event` as it arrives. A non-zero exit status is not an error
    /// here; only failing to start or read the tool is.
    fn run(
        &mut self,
        command: &ToolCommand,
        on_event: &mut dyn FnMut(&ToolEvent),
    ) -> Result<ToolOutput>;

    /// Run without observing output incrementally
    fn capture(&mut self, command: &ToolCommand) -> Result<ToolOutput> {
        self.run(command, &mut |_| {})
    }
}
