// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Prioritized first-match policy store and evaluator.
//!
//! Evaluation order: enabled policies by descending priority, ties by
//! creation order (the store is insertion-ordered and the sort is stable).
//! All conditions of a policy AND together; the first full match wins.
//! No match means allow.

use crate::FabricError;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use weft_proto::{
    new_id, now_ms, Boundary, Event, LogLevel, Policy, PolicyAction, PolicyCondition, PolicyField,
    PolicyOperator,
};

/// Policy creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPolicy {
    /// Human-readable name.
    pub name: String,
    /// Higher evaluates first.
    pub priority: i64,
    /// AND-ed conditions.
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    /// Action when the conditions match.
    pub action: PolicyAction,
    /// Whether the policy participates in evaluation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial policy update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New priority.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Replacement condition list.
    #[serde(default)]
    pub conditions: Option<Vec<PolicyCondition>>,
    /// Replacement action.
    #[serde(default)]
    pub action: Option<PolicyAction>,
    /// Enable/disable.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Result of evaluating an event against the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Winning policy, or none (default allow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Action to apply.
    pub action: PolicyAction,
}

/// The in-memory policy store. Insertion order is creation order.
pub struct PolicyEngine {
    policies: RwLock<Vec<Policy>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
        }
    }

    /// Seed the default boundary policies: allow intra traffic, log inter
    /// at info, log extra at warn. Idempotent by name.
    pub fn seed_defaults(&self) {
        let defaults = [
            NewPolicy {
                name: "allow-intra".into(),
                priority: 100,
                conditions: vec![PolicyCondition {
                    field: PolicyField::Boundary,
                    operator: PolicyOperator::Eq,
                    value: Boundary::Intra.as_str().into(),
                }],
                action: PolicyAction::Allow,
                enabled: true,
            },
            NewPolicy {
                name: "log-inter".into(),
                priority: 90,
                conditions: vec![PolicyCondition {
                    field: PolicyField::Boundary,
                    operator: PolicyOperator::Eq,
                    value: Boundary::Inter.as_str().into(),
                }],
                action: PolicyAction::Log {
                    level: LogLevel::Info,
                },
                enabled: true,
            },
            NewPolicy {
                name: "log-extra".into(),
                priority: 90,
                conditions: vec![PolicyCondition {
                    field: PolicyField::Boundary,
                    operator: PolicyOperator::Eq,
                    value: Boundary::Extra.as_str().into(),
                }],
                action: PolicyAction::Log {
                    level: LogLevel::Warn,
                },
                enabled: true,
            },
        ];
        for policy in defaults {
            let exists = self.policies.read().iter().any(|p| p.name == policy.name);
            if !exists {
                let _ = self.create(policy);
            }
        }
    }

    /// Create a policy.
    pub fn create(&self, req: NewPolicy) -> Policy {
        let policy = Policy {
            id: new_id(),
            name: req.name,
            priority: req.priority,
            conditions: req.conditions,
            action: req.action,
            enabled: req.enabled,
            created_at: now_ms(),
        };
        self.policies.write().push(policy.clone());
        policy
    }

    /// Apply a partial update.
    pub fn update(&self, policy_id: &str, update: PolicyUpdate) -> Result<Policy, FabricError> {
        let mut policies = self.policies.write();
        let policy = policies
            .iter_mut()
            .find(|p| p.id == policy_id)
            .ok_or_else(|| FabricError::UnknownPolicy(policy_id.to_string()))?;
        if let Some(name) = update.name {
            policy.name = name;
        }
        if let Some(priority) = update.priority {
            policy.priority = priority;
        }
        if let Some(conditions) = update.conditions {
            policy.conditions = conditions;
        }
        if let Some(action) = update.action {
            policy.action = action;
        }
        if let Some(enabled) = update.enabled {
            policy.enabled = enabled;
        }
        Ok(policy.clone())
    }

    /// Delete a policy.
    pub fn delete(&self, policy_id: &str) -> Result<(), FabricError> {
        let mut policies = self.policies.write();
        let before = policies.len();
        policies.retain(|p| p.id != policy_id);
        if policies.len() == before {
            return Err(FabricError::UnknownPolicy(policy_id.to_string()));
        }
        Ok(())
    }

    /// Look up a policy by id.
    pub fn get(&self, policy_id: &str) -> Option<Policy> {
        self.policies.read().iter().find(|p| p.id == policy_id).cloned()
    }

    /// All policies in creation order.
    pub fn list(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    /// Evaluate an event: first enabled policy (highest priority, earliest
    /// created on ties) whose conditions all match. Default allow.
    pub fn evaluate(&self, event: &Event) -> Evaluation {
        let policies = self.policies.read();
        let mut candidates: Vec<&Policy> = policies.iter().filter(|p| p.enabled).collect();
        // Stable sort keeps creation order within equal priorities.
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        for policy in candidates {
            if policy.conditions.iter().all(|c| condition_matches(c, event)) {
                return Evaluation {
                    policy_id: Some(policy.id.clone()),
                    action: policy.action.clone(),
                };
            }
        }
        Evaluation {
            policy_id: None,
            action: PolicyAction::Allow,
        }
    }
}

fn extract_field(field: PolicyField, event: &Event) -> String {
    match field {
        PolicyField::Source => event.wrapper.source.clone(),
        PolicyField::Target => event.wrapper.target.clone().unwrap_or_default(),
        PolicyField::EventType => event.payload.event_type.clone(),
        PolicyField::Boundary => event.wrapper.boundary.as_str().to_string(),
        PolicyField::RunId => event.wrapper.run_id.clone(),
    }
}

fn condition_matches(condition: &PolicyCondition, event: &Event) -> bool {
    let actual = extract_field(condition.field, event);
    match condition.operator {
        PolicyOperator::Eq => actual == condition.value,
        PolicyOperator::Neq => actual != condition.value,
        PolicyOperator::Contains => actual.contains(&condition.value),
        PolicyOperator::StartsWith => actual.starts_with(&condition.value),
        PolicyOperator::Regex => match Regex::new(&condition.value) {
            Ok(re) => re.is_match(&actual),
            Err(err) => {
                // An unparseable pattern fails the condition, not the event.
                warn!(pattern = %condition.value, %err, "invalid policy regex");
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_proto::{EventPayload, EventWrapper};

    fn event(boundary: Boundary, source: &str, target: Option<&str>, event_type: &str) -> Event {
        let mut wrapper = EventWrapper::new(source, "r1", boundary);
        wrapper.target = target.map(Into::into);
        Event {
            payload: EventPayload {
                event_type: event_type.into(),
                data: json!({}),
            },
            wrapper,
            hash: String::new(),
        }
    }

    fn deny(name: &str, priority: i64, conditions: Vec<PolicyCondition>) -> NewPolicy {
        NewPolicy {
            name: name.into(),
            priority,
            conditions,
            action: PolicyAction::Deny { reason: None },
            enabled: true,
        }
    }

    fn boundary_eq(value: &str) -> PolicyCondition {
        PolicyCondition {
            field: PolicyField::Boundary,
            operator: PolicyOperator::Eq,
            value: value.into(),
        }
    }

    #[test]
    fn highest_priority_wins() {
        let engine = PolicyEngine::new();
        engine.create(deny("low", 10, vec![boundary_eq("extra")]));
        let high = engine.create(NewPolicy {
            name: "high".into(),
            priority: 200,
            conditions: vec![boundary_eq("extra")],
            action: PolicyAction::Deny {
                reason: Some("external blocked".into()),
            },
            enabled: true,
        });
        let eval = engine.evaluate(&event(Boundary::Extra, "integrations", None, "x"));
        assert_eq!(eval.policy_id, Some(high.id));
        assert_eq!(
            eval.action,
            PolicyAction::Deny {
                reason: Some("external blocked".into())
            }
        );
    }

    #[test]
    fn ties_resolve_to_earliest_created() {
        let engine = PolicyEngine::new();
        let first = engine.create(deny("first", 50, vec![boundary_eq("intra")]));
        engine.create(deny("second", 50, vec![boundary_eq("intra")]));
        let eval = engine.evaluate(&event(Boundary::Intra, "a", None, "x"));
        assert_eq!(eval.policy_id, Some(first.id));
    }

    #[test]
    fn disabled_policies_are_skipped() {
        let engine = PolicyEngine::new();
        let p = engine.create(deny("off", 100, vec![]));
        engine
            .update(
                &p.id,
                PolicyUpdate {
                    enabled: Some(false),
                    ..PolicyUpdate::default()
                },
            )
            .unwrap();
        let eval = engine.evaluate(&event(Boundary::Intra, "a", None, "x"));
        assert_eq!(eval.policy_id, None);
        assert_eq!(eval.action, PolicyAction::Allow);
    }

    #[test]
    fn all_conditions_must_match() {
        let engine = PolicyEngine::new();
        engine.create(deny(
            "both",
            100,
            vec![
                boundary_eq("intra"),
                PolicyCondition {
                    field: PolicyField::Source,
                    operator: PolicyOperator::Eq,
                    value: "messaging".into(),
                },
            ],
        ));
        assert!(engine
            .evaluate(&event(Boundary::Intra, "messaging", None, "x"))
            .policy_id
            .is_some());
        assert!(engine
            .evaluate(&event(Boundary::Intra, "assistants", None, "x"))
            .policy_id
            .is_none());
    }

    #[test]
    fn operator_semantics() {
        let engine = PolicyEngine::new();
        engine.create(deny(
            "ops",
            100,
            vec![
                PolicyCondition {
                    field: PolicyField::EventType,
                    operator: PolicyOperator::StartsWith,
                    value: "message.".into(),
                },
                PolicyCondition {
                    field: PolicyField::RunId,
                    operator: PolicyOperator::Contains,
                    value: "r".into(),
                },
                PolicyCondition {
                    field: PolicyField::Target,
                    operator: PolicyOperator::Neq,
                    value: "logging".into(),
                },
            ],
        ));
        assert!(engine
            .evaluate(&event(Boundary::Intra, "messaging", None, "message.new"))
            .policy_id
            .is_some());
        assert!(engine
            .evaluate(&event(
                Boundary::Intra,
                "messaging",
                Some("logging"),
                "message.new"
            ))
            .policy_id
            .is_none());
    }

    #[test]
    fn missing_target_extracts_as_empty_string() {
        let engine = PolicyEngine::new();
        engine.create(deny(
            "no-target",
            100,
            vec![PolicyCondition {
                field: PolicyField::Target,
                operator: PolicyOperator::Eq,
                value: String::new(),
            }],
        ));
        assert!(engine
            .evaluate(&event(Boundary::Intra, "a", None, "x"))
            .policy_id
            .is_some());
    }

    #[test]
    fn regex_operator_and_invalid_pattern() {
        let engine = PolicyEngine::new();
        engine.create(deny(
            "re",
            100,
            vec![PolicyCondition {
                field: PolicyField::EventType,
                operator: PolicyOperator::Regex,
                value: "^message\\.(new|updated)$".into(),
            }],
        ));
        assert!(engine
            .evaluate(&event(Boundary::Intra, "a", None, "message.new"))
            .policy_id
            .is_some());
        assert!(engine
            .evaluate(&event(Boundary::Intra, "a", None, "message.deleted"))
            .policy_id
            .is_none());

        // An invalid pattern silently fails its condition.
        let engine = PolicyEngine::new();
        engine.create(deny(
            "bad-re",
            100,
            vec![PolicyCondition {
                field: PolicyField::EventType,
                operator: PolicyOperator::Regex,
                value: "[unclosed".into(),
            }],
        ));
        assert!(engine
            .evaluate(&event(Boundary::Intra, "a", None, "anything"))
            .policy_id
            .is_none());
    }

    #[test]
    fn defaults_cover_the_three_boundaries() {
        let engine = PolicyEngine::new();
        engine.seed_defaults();
        engine.seed_defaults(); // idempotent
        assert_eq!(engine.list().len(), 3);

        let intra = engine.evaluate(&event(Boundary::Intra, "a", None, "x"));
        assert_eq!(intra.action, PolicyAction::Allow);
        assert!(intra.policy_id.is_some());

        let inter = engine.evaluate(&event(Boundary::Inter, "a", None, "x"));
        assert_eq!(
            inter.action,
            PolicyAction::Log {
                level: LogLevel::Info
            }
        );

        let extra = engine.evaluate(&event(Boundary::Extra, "a", None, "x"));
        assert_eq!(
            extra.action,
            PolicyAction::Log {
                level: LogLevel::Warn
            }
        );
    }

    #[test]
    fn list_contains_created_policy() {
        let engine = PolicyEngine::new();
        let created = engine.create(deny("p", 1, vec![boundary_eq("intra")]));
        let listed = engine.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], created);
        assert_eq!(engine.get(&created.id), Some(created));
    }
}
