// Test Helpers Module - in-memory collaborators for unit and integration tests
//
// Fakes for the seams the orchestration core talks to: a scripted dispatcher, a
// recording callback transport, and fault-injecting workflow store and lock service.

pub mod dispatcher;
pub mod faults;
pub mod test_utils;
pub mod transport;

pub use dispatcher::ScriptedDispatcher;
pub use faults::{FlakyLockService, FlakyWorkflowStore};
pub use test_utils::{setup_test_environment, test_config};
pub use transport::RecordingTransport;
