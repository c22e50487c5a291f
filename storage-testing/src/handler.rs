use std::sync::{Arc, Mutex};

use storage_contracts::{Diagnostic, HandlerError, HandlerResult, ProgressHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    InstallInfo(String),
    Progress(u8),
    Target(String),
    Diagnostic(Diagnostic),
}

/// Progress handler that keeps every event for later assertions.
///
/// Clones share the event log. A failing handler still records, then
/// returns an error from every callback.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<HandlerEvent>>>,
    failing: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn install_infos(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::InstallInfo(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Progress(percent) => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub fn targets(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Target(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Diagnostic(diagnostic) => Some(diagnostic),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: HandlerEvent) -> HandlerResult {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        if self.failing {
            return Err(HandlerError("recording handler set to fail".to_string()));
        }
        Ok(())
    }
}

impl ProgressHandler for RecordingHandler {
    fn on_progress(&mut self, percent: u8) -> HandlerResult {
        self.push(HandlerEvent::Progress(percent))
    }

    fn on_target(&mut self, target: &str) -> HandlerResult {
        self.push(HandlerEvent::Target(target.to_string()))
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) -> HandlerResult {
        self.push(HandlerEvent::Diagnostic(diagnostic.clone()))
    }

    fn on_install_info(&mut self, info: &str) -> HandlerResult {
        self.push(HandlerEvent::InstallInfo(info.to_string()))
    }
}
