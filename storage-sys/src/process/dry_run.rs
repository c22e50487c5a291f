// SPDX-License-Identifier: GPL-3.0-only

use tracing::info;

use super::{ToolCommand, ToolEvent, ToolOutput, ToolRunner};
use crate::Result;

/// Logs every command instead of running it and reports success.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    executed: Vec<String>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered commands in the order they were requested
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl ToolRunner for DryRunRunner {
    fn run(
        &mut self,
        command: &ToolCommand,
        _on_event: &mut dyn FnMut(&ToolEvent),
    ) -> Result<ToolOutput> {
        let rendered = command.render();
        info!("dry-run: {}", rendered);
        self.executed.push(rendered);
        Ok(ToolOutput::default())
    }
}
