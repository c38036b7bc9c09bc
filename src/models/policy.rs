use serde::{Deserialize, Serialize};

/// Declarative admission-control rule bound to an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    /// Action the policy applies to
    pub resource_ref: String,
    pub policy_type: PolicyType,
    /// Number of running executions in scope at which new requests are refused
    pub threshold: usize,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyType {
    /// Scope is every execution of the action
    Concurrency,
    /// Scope is executions whose named parameters equal the new execution's values
    ConcurrencyByAttr { attributes: Vec<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    #[default]
    Cancel,
}

impl Policy {
    pub fn concurrency(
        name: impl Into<String>,
        resource_ref: impl Into<String>,
        threshold: usize,
    ) -> Self {
        Self {
            name: name.into(),
            resource_ref: resource_ref.into(),
            policy_type: PolicyType::Concurrency,
            threshold,
            action: PolicyAction::Cancel,
            enabled: true,
        }
    }

    pub fn concurrency_by_attr(
        name: impl Into<String>,
        resource_ref: impl Into<String>,
        threshold: usize,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            policy_type: PolicyType::ConcurrencyByAttr { attributes },
            ..Self::concurrency(name, resource_ref, threshold)
        }
    }

    pub fn applies_to(&self, action_ref: &str) -> bool {
        self.enabled && self.resource_ref == action_ref
    }

    pub fn scoped_attributes(&self) -> &[String] {
        match &self.policy_type {
            PolicyType::Concurrency => &[],
            PolicyType::ConcurrencyByAttr { attributes } => attributes,
        }
    }
}
