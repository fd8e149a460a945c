//! Rendering helpers shared by sinks/formatters.

use crate::error::NodeError;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[NodeError]) -> Vec<EventRender>;
}

#[derive(Clone, Copy, Default)]
pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{LINE_COLOR}{}{RESET_COLOR}\n", event);
        EventRender {
            context: event.scope_label(),
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[NodeError]) -> Vec<EventRender> {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let scope_str = format!("{CONTEXT_COLOR}{}{RESET_COLOR}", e.source_node);
                let lines = vec![
                    format!("[{}] {}\n", i, scope_str),
                    format!("{LINE_COLOR}  error: {}{RESET_COLOR}\n", e.message),
                ];
                EventRender {
                    context: Some(e.source_node.clone()),
                    lines,
                }
            })
            .collect()
    }
}
