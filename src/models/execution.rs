//! # Execution Model
//!
//! One unit of orchestrated work. The parent relation lives inside `context.parent` as a
//! plain id (lookup only); children are never stored and are found by querying for
//! executions whose `context.parent.execution_id` matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::state_machine::states::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub action_ref: String,
    pub parameters: Value,
    pub status: ExecutionStatus,
    /// Set at request time when a workflow graph is registered for `action_ref`
    pub is_workflow: bool,
    pub context: ExecutionContext,
    pub result: Option<Value>,
    /// Scheduling delay in milliseconds, consumed before dispatch
    pub delay: Option<u64>,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowTaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Weak back-reference to the execution that spawned this one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub execution_id: Uuid,
}

/// Position of an execution inside a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTaskRef {
    pub workflow_instance_id: Uuid,
    pub task_instance_id: Uuid,
    /// Index into the task's item list for fanned-out tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
}

/// External engine driving this execution as one of its tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackContext {
    pub url: String,
}

impl Execution {
    pub fn new(action_ref: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_ref: action_ref.into(),
            parameters,
            status: ExecutionStatus::Requested,
            is_workflow: false,
            context: ExecutionContext::default(),
            result: None,
            delay: None,
            start_timestamp: Utc::now(),
            end_timestamp: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.context.user = Some(user.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.context.parent = Some(ParentRef {
            execution_id: parent_id,
        });
        self
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.context.callback = Some(CallbackContext { url: url.into() });
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.context.parent.map(|p| p.execution_id)
    }

    pub fn workflow_task(&self) -> Option<WorkflowTaskRef> {
        self.context.workflow
    }

    /// Pack portion of `pack.action` style references
    pub fn pack_name(&self) -> Option<&str> {
        self.action_ref
            .split_once('.')
            .map(|(pack, _)| pack)
            .filter(|pack| !pack.is_empty())
    }

    pub fn delay_duration(&self) -> Option<Duration> {
        self.delay
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Look up a top-level parameter by name
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.as_object().and_then(|params| params.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_execution_is_requested() {
        let execution = Execution::new("core.local", json!({"cmd": "date"}));
        assert_eq!(execution.status, ExecutionStatus::Requested);
        assert!(execution.parent_id().is_none());
        assert_eq!(execution.pack_name(), Some("core"));
        assert_eq!(execution.parameter("cmd"), Some(&json!("date")));
    }

    #[test]
    fn test_zero_delay_is_no_delay() {
        let execution = Execution::new("core.local", json!({})).with_delay(0);
        assert!(execution.delay_duration().is_none());
        let execution = execution.with_delay(250);
        assert_eq!(execution.delay_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_context_serializes_parent_as_lookup_id() {
        let parent = Uuid::new_v4();
        let execution = Execution::new("core.local", json!({})).with_parent(parent);
        let value = serde_json::to_value(&execution.context).unwrap();
        assert_eq!(value["parent"]["execution_id"], json!(parent.to_string()));
        assert!(value.get("callback").is_none());
    }

    #[test]
    fn test_context_keeps_unknown_keys() {
        let raw = json!({"user": "stanley", "trace_tag": "abc"});
        let context: ExecutionContext = serde_json::from_value(raw).unwrap();
        assert_eq!(context.user.as_deref(), Some("stanley"));
        assert_eq!(context.extra.get("trace_tag"), Some(&json!("abc")));
    }
}
