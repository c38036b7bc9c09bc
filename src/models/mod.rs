pub mod execution;
pub mod policy;
pub mod workflow;

// Re-export core models for easy access
pub use execution::{CallbackContext, Execution, ExecutionContext, ParentRef, WorkflowTaskRef};
pub use policy::{Policy, PolicyAction, PolicyType};
pub use workflow::{ItemState, SequenceEntry, TaskInstance, WorkflowInstance};
