//! Engine configuration.
//!
//! Defaults are resolved from the environment (a `.env` file is honoured via
//! `dotenvy`): `TASKLOOM_EVENT_BUFFER` sizes the event hub and
//! `TASKLOOM_POLL_INTERVAL_MS` tunes the main-loop poll interval used while
//! the workflow is paused or waiting on suspended steps.

use std::time::Duration;

use crate::event_bus::{EventBus, MemorySink, StdOutSink};

/// Which built-in sinks an engine-owned bus is created with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Configuration for the engine-owned [`EventBus`].
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(resolve_buffer_capacity(), vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(
            resolve_buffer_capacity(),
            vec![SinkConfig::StdOut, SinkConfig::Memory],
        )
    }

    /// No sinks; events are observed via subscription only.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(resolve_buffer_capacity(), Vec::new())
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    /// Materialize an [`EventBus`] with the configured sinks.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let sinks = self
            .sinks
            .iter()
            .map(|sink| -> Box<dyn crate::event_bus::EventSink> {
                match sink {
                    SinkConfig::StdOut => Box::new(StdOutSink::default()),
                    SinkConfig::Memory => Box::new(MemorySink::new()),
                }
            })
            .collect();
        EventBus::with_capacity(sinks, self.buffer_capacity)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

fn resolve_buffer_capacity() -> usize {
    dotenvy::dotenv().ok();
    std::env::var("TASKLOOM_EVENT_BUFFER")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(EventBusConfig::DEFAULT_BUFFER_CAPACITY)
}

fn resolve_poll_interval() -> Duration {
    dotenvy::dotenv().ok();
    let millis = std::env::var("TASKLOOM_POLL_INTERVAL_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(10);
    Duration::from_millis(millis)
}

/// Top-level engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub event_bus: EventBusConfig,
    /// How long the main loop sleeps when paused or when no step is ready.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_bus: EventBusConfig::default(),
            poll_interval: resolve_poll_interval(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_memory_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::with_memory_sink())
    }

    #[must_use]
    pub fn with_silent_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::silent())
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let config = EventBusConfig::new(0, vec![SinkConfig::StdOut]);
        assert_eq!(
            config.buffer_capacity,
            EventBusConfig::DEFAULT_BUFFER_CAPACITY
        );
    }

    #[test]
    fn add_sink_deduplicates() {
        let config = EventBusConfig::silent()
            .add_sink(SinkConfig::Memory)
            .add_sink(SinkConfig::Memory);
        assert_eq!(config.sinks, vec![SinkConfig::Memory]);
    }
}
