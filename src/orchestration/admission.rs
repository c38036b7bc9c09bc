//! # Admission Control
//!
//! Concurrency policies checked before a requested execution may be scheduled, and again
//! when a paused workflow resumes. A policy counts `running` executions of its action,
//! optionally narrowed to those whose named parameters equal the new execution's values.
//! At or above the threshold the new execution is refused; the only supported response
//! is to cancel it.

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info};

use crate::constants::status_groups::ADMISSION_COUNTED_STATUSES;
use crate::errors::OrchestrationResult;
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::models::{Execution, Policy, PolicyAction};
use crate::state_machine::states::ExecutionStatus;
use crate::state_machine::ExecutionStateMachine;
use crate::store::{ExecutionFilter, ExecutionUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Denied {
        policy: String,
        running: usize,
        threshold: usize,
        message: String,
    },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug)]
pub struct AdmissionController {
    state_machine: ExecutionStateMachine,
    event_publisher: EventPublisher,
    policies: RwLock<Vec<Policy>>,
}

impl AdmissionController {
    pub fn new(state_machine: ExecutionStateMachine, event_publisher: EventPublisher) -> Self {
        Self {
            state_machine,
            event_publisher,
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn add_policy(&self, policy: Policy) {
        info!(
            policy = %policy.name,
            resource_ref = %policy.resource_ref,
            threshold = policy.threshold,
            "Registered admission policy"
        );
        self.policies.write().push(policy);
    }

    pub fn policies(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    /// Check one policy against the executions currently running in its scope
    pub async fn evaluate_policy(
        &self,
        execution: &Execution,
        policy: &Policy,
    ) -> OrchestrationResult<AdmissionDecision> {
        if !policy.applies_to(&execution.action_ref) {
            return Ok(AdmissionDecision::Admitted);
        }

        let mut filter = ExecutionFilter::default()
            .with_action_ref(&execution.action_ref)
            .with_statuses(ADMISSION_COUNTED_STATUSES)
            .excluding(execution.id);
        for attribute in policy.scoped_attributes() {
            let Some(value) = execution.parameter(attribute) else {
                // Outside this policy's scope
                debug!(
                    execution_id = %execution.id,
                    policy = %policy.name,
                    attribute = %attribute,
                    "Execution lacks policy attribute, skipping policy"
                );
                return Ok(AdmissionDecision::Admitted);
            };
            filter = filter.with_parameter(attribute.clone(), value.clone());
        }

        let running = self.state_machine.store().query(&filter).await?.len();
        if running < policy.threshold {
            return Ok(AdmissionDecision::Admitted);
        }

        Ok(AdmissionDecision::Denied {
            policy: policy.name.clone(),
            running,
            threshold: policy.threshold,
            message: format!(
                "Action execution canceled by policy \"{}\": {} running executions at threshold {}",
                policy.name, running, policy.threshold
            ),
        })
    }

    /// First denial across every policy bound to the execution's action
    pub async fn evaluate(&self, execution: &Execution) -> OrchestrationResult<AdmissionDecision> {
        let policies = self.policies();
        for policy in policies.iter().filter(|p| p.applies_to(&execution.action_ref)) {
            let decision = self.evaluate_policy(execution, policy).await?;
            if !decision.is_admitted() {
                return Ok(decision);
            }
        }
        Ok(AdmissionDecision::Admitted)
    }

    /// Evaluate a requested execution and cancel it when a policy refuses it.
    ///
    /// Returns the decision together with the canceled execution on denial.
    pub async fn admit(
        &self,
        execution: &Execution,
    ) -> OrchestrationResult<(AdmissionDecision, Option<Execution>)> {
        let decision = self.evaluate(execution).await?;
        let AdmissionDecision::Denied {
            policy,
            running,
            threshold,
            message,
        } = &decision
        else {
            return Ok((decision, None));
        };

        let response = self
            .policies
            .read()
            .iter()
            .find(|p| &p.name == policy)
            .map(|p| p.action)
            .unwrap_or_default();
        let canceled = match response {
            PolicyAction::Cancel => {
                let update = ExecutionUpdate::status(ExecutionStatus::Canceled)
                    .with_result(Some(json!({ "message": message })));
                self.state_machine.apply(execution, update).await?
            }
        };

        info!(
            execution_id = %execution.id,
            policy = %policy,
            running = running,
            threshold = threshold,
            "Admission denied, execution canceled"
        );
        self.publish_denied(execution, &decision);
        Ok((decision, Some(canceled)))
    }

    pub fn publish_denied(&self, execution: &Execution, decision: &AdmissionDecision) {
        if let AdmissionDecision::Denied {
            policy,
            running,
            threshold,
            ..
        } = decision
        {
            self.event_publisher
                .publish(OrchestrationEvent::AdmissionDenied {
                    execution_id: execution.id,
                    policy: policy.clone(),
                    running: *running,
                    threshold: *threshold,
                });
        }
    }
}
