// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{Diagnostic, HandlerResult, ProgressHandler, sanitize_target};
use storage_sys::{OutputLine, ToolEvent, classify};
use tracing::{debug, warn};

/// Delivers commit events to the installed handler, if any. A failing
/// handler is logged and otherwise ignored.
pub struct ProgressSink<'a> {
    handler: Option<&'a mut (dyn ProgressHandler + 'static)>,
}

impl<'a> ProgressSink<'a> {
    pub fn new(handler: Option<&'a mut (dyn ProgressHandler + 'static)>) -> Self {
        Self { handler }
    }

    pub fn silent() -> Self {
        Self { handler: None }
    }

    fn deliver(
        &mut self,
        what: &str,
        call: impl FnOnce(&mut (dyn ProgressHandler + 'static)) -> HandlerResult,
    ) {
        if let Some(handler) = self.handler.as_deref_mut()
            && let Err(e) = call(handler)
        {
            warn!("Progress handler failed on {}: {}", what, e);
        }
    }

    pub fn install_info(&mut self, text: &str) {
        self.deliver("install info", |h| h.on_install_info(text));
    }

    pub fn progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        self.deliver("progress", |h| h.on_progress(percent));
    }

    pub fn target(&mut self, raw: &str) {
        let target = sanitize_target(raw);
        self.deliver("target", |h| h.on_target(&target));
    }

    pub fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.deliver("diagnostic", |h| h.on_diagnostic(diagnostic));
    }

    /// Route one line of tool output
    pub fn event(&mut self, event: &ToolEvent) {
        debug!("tool: {:?}", event);
        match classify(event) {
            OutputLine::Progress(percent) => self.progress(percent),
            OutputLine::Target(text) => self.target(&text),
            OutputLine::Diagnostic(text) => self.diagnostic(&Diagnostic::info(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_contracts::HandlerError;

    #[derive(Default)]
    struct Collect {
        targets: Vec<String>,
        progress: Vec<u8>,
        diagnostics: Vec<Diagnostic>,
    }

    impl ProgressHandler for Collect {
        fn on_progress(&mut self, percent: u8) -> HandlerResult {
            self.progress.push(percent);
            Ok(())
        }

        fn on_target(&mut self, target: &str) -> HandlerResult {
            self.targets.push(target.to_string());
            Err(HandlerError("display gone".to_string()))
        }

        fn on_diagnostic(&mut self, diagnostic: &Diagnostic) -> HandlerResult {
            self.diagnostics.push(diagnostic.clone());
            Ok(())
        }
    }

    #[test]
    fn tool_lines_are_classified_and_sanitized() {
        let mut collect = Collect::default();
        {
            let mut sink = ProgressSink::new(Some(&mut collect));
            sink.event(&ToolEvent::Stdout("Writing inode tables: 12/64".to_string()));
            sink.event(&ToolEvent::Stdout("/usr/lib/x86_64%s".to_string()));
            sink.event(&ToolEvent::Stdout("second target after error".to_string()));
            sink.event(&ToolEvent::Stderr("mke2fs: warning".to_string()));
        }
        assert_eq!(collect.progress, vec![18]);
        assert_eq!(collect.targets, vec!["usrlibx8...", "secondta..."]);
        assert_eq!(collect.diagnostics, vec![Diagnostic::info("mke2fs: warning")]);
    }

    #[test]
    fn silent_sink_accepts_everything() {
        let mut sink = ProgressSink::silent();
        sink.install_info("Create partition /dev/sda1");
        sink.progress(250);
        sink.diagnostic(&Diagnostic::fatal("boom"));
    }
}
