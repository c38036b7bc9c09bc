#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Execution orchestration core: the execution status lifecycle, tree-wide
//! cancel/pause/resume, workflow advancement under concurrent completions, admission
//! control and external engine callbacks.
//!
//! ## Architecture
//!
//! Executions are units of work. Some are workflows that spawn child executions through
//! a workflow instance; children point back at their parent, forming a tree. Every status
//! change is a compare-and-set on the execution store, and every workflow advancement is
//! a revision-checked commit made under a per-instance lock. Runners, workflow graphs,
//! stores and the coordination backend are collaborators behind traits.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Status vocabulary, legal transitions and the CAS transition
//! - [`orchestration`] - Cascade, completion coordinator, admission, callbacks, core facade
//! - [`store`] - Execution and workflow persistence seams with in-memory implementations
//! - [`coordination`] - Named locks serializing workflow instance advancement
//! - [`dispatcher`] - The seam to action runners
//! - [`models`] - Executions, workflow and task instances, policies
//! - [`events`] - Lifecycle event broadcasting
//! - [`config`] - Configuration loading and validation
//! - [`errors`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conductor_core::orchestration::{LinearWorkflowGraph, OrchestrationCore, TaskSpec};
//! use conductor_core::models::Execution;
//! use conductor_core::test_helpers::ScriptedDispatcher;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = OrchestrationCore::builder()
//!     .with_dispatcher(Arc::new(ScriptedDispatcher::new()))
//!     .register_graph(
//!         "examples.sequence",
//!         Arc::new(LinearWorkflowGraph::new(vec![TaskSpec::new("task1", "core.local")])),
//!     )
//!     .build()?;
//!
//! let outcome = core.request(Execution::new("examples.sequence", json!({}))).await?;
//! core.request_cancellation(outcome.execution.id, "stanley").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coordination;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use config::{ConductorConfig, ConfigManager, ConfigurationError};
pub use constants::{status_groups, system};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use errors::{OrchestrationError, OrchestrationResult};
pub use events::{EventPublisher, OrchestrationEvent};
pub use models::{Execution, Policy, TaskInstance, WorkflowInstance};
pub use orchestration::{OrchestrationCore, OrchestrationCoreBuilder, RequestOutcome};
pub use state_machine::{ExecutionStatus, WorkflowStatus};
