//! Tracing bootstrap and event rendering.

use tracing_subscriber::EnvFilter;

use crate::event_bus::WorkflowEvent;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Install a global tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops. Intended for
/// binaries and tests that want the engine's `tracing` output on stderr.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

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
    fn render_event(&self, event: &WorkflowEvent) -> EventRender;
}

/// Single-line plain formatter used by the default stdout sink.
pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &WorkflowEvent) -> EventRender {
        let line = format!("{LINE_COLOR}{event}{RESET_COLOR}\n");
        EventRender {
            context: Some(event.kind.category().to_string()),
            lines: vec![line],
        }
    }
}
