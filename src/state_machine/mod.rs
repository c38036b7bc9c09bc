// State machine module for execution lifecycle management
//
// Status vocabulary, the legal transition graph and the compare-and-set transition
// function every status change goes through.

pub mod execution_state_machine;
pub mod guards;
pub mod states;

// Re-export main types for convenient access
pub use execution_state_machine::ExecutionStateMachine;
pub use guards::TransitionGuard;
pub use states::{ExecutionStatus, WorkflowStatus};
