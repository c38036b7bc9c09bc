//! # Orchestration Engine
//!
//! Decision-making layer on top of the state machine and the stores.
//!
//! ## Core Components
//!
//! - **OrchestrationCore**: facade for requests, dispatcher reports, polling and timers
//! - **CascadeController**: tree-wide cancel, pause and resume
//! - **WorkflowCompletionCoordinator**: advances workflow instances under a named lock
//!   with write-conflict retry
//! - **AdmissionController**: concurrency policies checked before scheduling
//! - **CallbackRetrier**: reports outcomes to external workflow engines with backoff
//! - **WorkflowGraph**: the black box deciding a workflow's next tasks

pub mod admission;
pub mod backoff;
pub mod callback;
pub mod cascade;
pub mod core;
pub mod graph;
pub mod work_queue;
pub mod workflow_coordinator;
pub mod workflow_plan;

// Re-export core types for easy access
pub use admission::{AdmissionController, AdmissionDecision};
pub use backoff::BackoffPolicy;
pub use callback::{
    map_status, map_status_str, CallbackPayload, CallbackRetrier, CallbackTransport,
    ExternalStatus, HttpCallbackTransport,
};
pub use cascade::CascadeController;
pub use core::{OrchestrationCore, OrchestrationCoreBuilder, RequestOutcome};
pub use graph::{GraphDecision, LinearWorkflowGraph, TaskSpec, WorkflowGraph, WorkflowGraphRegistry};
pub use work_queue::{WorkItem, WorkQueue};
pub use workflow_coordinator::{CompletionOutcome, WorkflowCompletionCoordinator};
pub use workflow_plan::{PlanEffects, Trigger, WorkflowPlan};
