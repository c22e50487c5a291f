// SPDX-License-Identifier: GPL-3.0-only

//! Progress and diagnostics channel
//!
//! The commit engine pushes events here while an external tool is still
//! running. Every method has a no-op default, so a handler implements only
//! what it renders. Errors returned by a handler are logged by the engine
//! and never abort a commit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest target text handed to a handler, before the `...` suffix
pub const TARGET_TEXT_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("progress handler failed: {0}")]
pub struct HandlerError(pub String);

pub type HandlerResult = Result<(), HandlerError>;

/// Free-text tool output. A fatal diagnostic is delivered right before
/// the commit reports the failing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub text: String,
    pub fatal: bool,
}

impl Diagnostic {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fatal: false,
        }
    }

    pub fn fatal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fatal: true,
        }
    }
}

pub trait ProgressHandler: Send {
    /// Percentage complete of the running action (0-100)
    fn on_progress(&mut self, _percent: u8) -> HandlerResult {
        Ok(())
    }

    /// Location the running tool is working on, already sanitized
    fn on_target(&mut self, _target: &str) -> HandlerResult {
        Ok(())
    }

    fn on_diagnostic(&mut self, _diagnostic: &Diagnostic) -> HandlerResult {
        Ok(())
    }

    /// Description of the action about to start
    fn on_install_info(&mut self, _info: &str) -> HandlerResult {
        Ok(())
    }
}

type ProgressFn = Box<dyn FnMut(u8) -> HandlerResult + Send>;
type TextFn = Box<dyn FnMut(&str) -> HandlerResult + Send>;
type DiagnosticFn = Box<dyn FnMut(&Diagnostic) -> HandlerResult + Send>;

/// Closure based handler; unset callbacks are silent no-ops.
#[derive(Default)]
pub struct Callbacks {
    progress: Option<ProgressFn>,
    target: Option<TextFn>,
    diagnostic: Option<DiagnosticFn>,
    install_info: Option<TextFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(u8) -> HandlerResult + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_target(mut self, f: impl FnMut(&str) -> HandlerResult + Send + 'static) -> Self {
        self.target = Some(Box::new(f));
        self
    }

    pub fn on_diagnostic(
        mut self,
        f: impl FnMut(&Diagnostic) -> HandlerResult + Send + 'static,
    ) -> Self {
        self.diagnostic = Some(Box::new(f));
        self
    }

    pub fn on_install_info(
        mut self,
        f: impl FnMut(&str) -> HandlerResult + Send + 'static,
    ) -> Self {
        self.install_info = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("progress", &self.progress.is_some())
            .field("target", &self.target.is_some())
            .field("diagnostic", &self.diagnostic.is_some())
            .field("install_info", &self.install_info.is_some())
            .finish()
    }
}

impl ProgressHandler for Callbacks {
    fn on_progress(&mut self, percent: u8) -> HandlerResult {
        self.progress.as_mut().map_or(Ok(()), |f| f(percent))
    }

    fn on_target(&mut self, target: &str) -> HandlerResult {
        self.target.as_mut().map_or(Ok(()), |f| f(target))
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) -> HandlerResult {
        self.diagnostic.as_mut().map_or(Ok(()), |f| f(diagnostic))
    }

    fn on_install_info(&mut self, info: &str) -> HandlerResult {
        self.install_info.as_mut().map_or(Ok(()), |f| f(info))
    }
}

/// Reduce tool location text to ASCII alphanumerics and `.-_`, at most
/// [`TARGET_TEXT_LEN`] characters, followed by `...`.
pub fn sanitize_target(text: &str) -> String {
    let mut out: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .take(TARGET_TEXT_LEN)
        .collect();
    out.push_str("...");
    out
}
