//! # taskloom: Declarative DAG Workflow Engine
//!
//! taskloom executes declarative workflows: a [`definition::Definition`]
//! describes a directed acyclic graph of steps with dependencies, retry and
//! skip policies, lifecycle hooks, tool invocations and human-in-the-loop
//! interactions; the engine schedules, runs, observes and recovers that
//! workflow while emitting a structured event stream.
//!
//! ## Core Concepts
//!
//! - **Definition**: Immutable declarative description of the workflow
//! - **Dag**: Validated dependency graph with cycle detection and the ready
//!   frontier used for scheduling
//! - **Context**: Per-instance storage of step outputs and globals
//! - **Events**: Typed pub/sub stream covering every observable transition
//! - **Waits**: First-class suspension of a step on external signals, tool
//!   responses or UI responses
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskloom::config::EngineConfig;
//! use taskloom::definition::{Definition, RetryPolicy, Step};
//! use taskloom::runtime::Engine;
//!
//! # async fn example() -> Result<(), taskloom::error::EngineError> {
//! let engine = Engine::new(EngineConfig::default());
//!
//! let definition = Definition::new("etl", "Nightly ETL")
//!     .with_step(Step::new("extract", "Extract", "task"))
//!     .with_step(
//!         Step::new("transform", "Transform", "task")
//!             .with_dependency("extract")
//!             .with_retry(RetryPolicy::exponential(3, 250)),
//!     )
//!     .with_step(Step::new("load", "Load", "task").with_dependency("transform"));
//!
//! engine.load_workflow(definition)?;
//! let result = engine.start(None).await?;
//! println!("status: {}", result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Observing Execution
//!
//! Subscribe to the event stream or attach sinks:
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() {
//! use taskloom::config::EngineConfig;
//! use taskloom::event_bus::MemorySink;
//! use taskloom::runtime::Engine;
//!
//! let engine = Engine::new(EngineConfig::default().with_silent_event_bus());
//! let sink = MemorySink::new();
//! let sink_id = engine.on(sink.clone());
//!
//! // ... run a workflow, then inspect sink.snapshot() ...
//! engine.off(sink_id);
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`definition`] - Definitions, steps, retry/skip policies, UI and tool
//!   declarations
//! - [`dag`] - Graph construction, cycle detection, topological sort and the
//!   ready frontier
//! - [`context`] - Per-instance execution context
//! - [`event_bus`] - Typed pub/sub event stream and sinks
//! - [`registry`] - Tool, UI component and step type catalogs
//! - [`hooks`] - Before/after hook pipelines
//! - [`expr`] - Sandboxed skip-condition expressions
//! - [`schema`] - Tool parameter validation
//! - [`runtime`] - The engine orchestrator, step executor, wait manager,
//!   tool invoker and UI handler
//! - [`serialize`] - Canonical JSON export/import
//! - [`telemetry`] - Tracing bootstrap and event formatting

pub mod config;
pub mod context;
pub mod dag;
pub mod definition;
pub mod error;
pub mod event_bus;
pub mod expr;
pub mod hooks;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod serialize;
pub mod telemetry;
pub mod types;
