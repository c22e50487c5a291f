use std::sync::{Arc, Mutex, MutexGuard};

use storage_sys::{Result, SysError, ToolCommand, ToolEvent, ToolOutput, ToolRunner};
use tracing::debug;

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    status: i32,
    events: Vec<ToolEvent>,
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<Rule>,
    executed: Vec<String>,
}

/// Tool runner driven by substring rules on the rendered command line.
///
/// Commands matching no rule succeed silently. The first matching rule
/// decides the output lines and exit status. Clones share the script and
/// the log, so a test keeps one copy while the engine owns a boxed one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with status 1 and `stderr` for commands containing `pattern`
    pub fn fail_when(self, pattern: &str, stderr: &str) -> Self {
        self.rule(Rule {
            pattern: pattern.to_string(),
            status: 1,
            events: vec![ToolEvent::Stderr(stderr.to_string())],
        })
    }

    /// Emit `events` and succeed for commands containing `pattern`
    pub fn respond(self, pattern: &str, events: Vec<ToolEvent>) -> Self {
        self.rule(Rule {
            pattern: pattern.to_string(),
            status: 0,
            events,
        })
    }

    /// Rendered commands in the order they ran, failed ones included
    pub fn executed(&self) -> Vec<String> {
        self.lock()
            .map(|script| script.executed.clone())
            .unwrap_or_default()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.executed().iter().any(|command| command.contains(pattern))
    }

    fn rule(self, rule: Rule) -> Self {
        if let Ok(mut script) = self.lock() {
            script.rules.push(rule);
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Script>> {
        self.script
            .lock()
            .map_err(|e| SysError::OperationFailed(format!("runner script poisoned: {e}")))
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(
        &mut self,
        command: &ToolCommand,
        on_event: &mut dyn FnMut(&ToolEvent),
    ) -> Result<ToolOutput> {
        let rendered = command.render();
        let rule = {
            let mut script = self.lock()?;
            script.executed.push(rendered.clone());
            script
                .rules
                .iter()
                .find(|rule| rendered.contains(&rule.pattern))
                .cloned()
        };
        debug!("scripted: {}", rendered);

        let mut output = ToolOutput::default();
        if let Some(rule) = rule {
            for event in &rule.events {
                on_event(event);
                output.record(event);
            }
            output.status = rule.status;
        }
        Ok(output)
    }
}
