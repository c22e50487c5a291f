// SPDX-License-Identifier: GPL-3.0-only

//! Tool output grammar
//!
//! Filesystem and partitioning tools redraw counters in place with `\r`
//! or backspaces, so a "line" ends at any of `\n`, `\r` or `\b`.
//!
//! Stdout lines carrying a percentage (`45%`, `12.5%`) or a fraction
//! (`12/64`) are progress; other stdout lines name what the tool is
//! working on. Stderr is diagnostic text and is never reinterpreted.

use crate::process::ToolEvent;

#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed raw bytes, returning every line they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if matches!(byte, b'\n' | b'\r' | 0x08) {
                if let Some(line) = self.take() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush an unterminated last line
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}

/// What a line of tool output means to the progress channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Progress(u8),
    Target(String),
    Diagnostic(String),
}

pub fn classify(event: &ToolEvent) -> OutputLine {
    match event {
        ToolEvent::Stdout(line) => match parse_progress(line) {
            Some(percent) => OutputLine::Progress(percent),
            None => OutputLine::Target(line.clone()),
        },
        ToolEvent::Stderr(line) => OutputLine::Diagnostic(line.clone()),
    }
}

/// Last percentage or fraction found on the line, clamped to 0..=100
pub fn parse_progress(line: &str) -> Option<u8> {
    line.split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ',')
        .filter_map(|token| percent_token(token).or_else(|| fraction_token(token)))
        .last()
        .map(|value| value.clamp(0.0, 100.0) as u8)
}

fn percent_token(token: &str) -> Option<f64> {
    token.strip_suffix('%')?.parse::<f64>().ok()
}

fn fraction_token(token: &str) -> Option<f64> {
    let token = token.trim_end_matches(':');
    let (done, total) = token.split_once('/')?;
    let done: u64 = done.parse().ok()?;
    let total: u64 = total.parse().ok()?;
    if total == 0 {
        return None;
    }
    Some(done as f64 * 100.0 / total as f64)
}
