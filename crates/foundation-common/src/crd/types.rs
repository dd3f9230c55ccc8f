//! Supporting types shared by the foundation CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// This type follows Kubernetes API conventions and is shared by
/// actions, views, and cluster infos.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Completed, Processing)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Returns true if this condition is set to True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Compare type, status, reason and message, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if the condition of the given type exists and is True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Insert or update a condition
///
/// The transition time is only moved forward when the status flips,
/// matching `meta.SetStatusCondition` semantics.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        None => conditions.push(condition),
    }
}

/// Insert or replace a condition wholesale, timestamp included
pub fn replace_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.retain(|c| c.type_ != condition.type_);
    conditions.push(condition);
}

/// Compare two condition lists by state, ignoring order and timestamps
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().all(|ca| {
            find_condition(b, &ca.type_).is_some_and(|cb| ca.same_state(cb))
        })
}

/// Reference to a namespaced object by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NamespacedName {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl NamespacedName {
    /// Parse `namespace/name`, falling back to `default_ns` when only a name is given
    ///
    /// Returns `None` when either side of the slash is empty.
    pub fn parse(value: &str, default_ns: Option<&str>) -> Option<Self> {
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(Self {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                })
            }
            Some(_) => None,
            None if !value.is_empty() => default_ns.map(|ns| Self {
                namespace: ns.to_string(),
                name: value.to_string(),
            }),
            None => None,
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    mod conditions {
        use super::*;

        #[test]
        fn test_new_sets_timestamp() {
            let before = Utc::now();
            let condition = Condition::new(
                "Completed",
                ConditionStatus::True,
                "ActionDone",
                "Resource action is done.",
            );
            let after = Utc::now();

            assert_eq!(condition.type_, "Completed");
            assert!(condition.last_transition_time >= before);
            assert!(condition.last_transition_time <= after);
        }

        /// Story: Flipping status moves the transition time, rewording does not
        #[test]
        fn story_set_condition_tracks_transitions() {
            let mut old = Condition::new("Processing", ConditionStatus::True, "", "");
            old.last_transition_time = Utc::now() - Duration::seconds(600);
            let stamp = old.last_transition_time;
            let mut conditions = vec![old];

            set_condition(
                &mut conditions,
                Condition::new("Processing", ConditionStatus::True, "Again", "same status"),
            );
            assert_eq!(conditions[0].last_transition_time, stamp);
            assert_eq!(conditions[0].reason, "Again");

            set_condition(
                &mut conditions,
                Condition::new("Processing", ConditionStatus::False, "GetResourceFailed", "x"),
            );
            assert!(conditions[0].last_transition_time > stamp);
            assert_eq!(conditions.len(), 1);
        }

        #[test]
        fn replace_condition_always_restamps() {
            let mut old = Condition::new("Processing", ConditionStatus::True, "", "");
            old.last_transition_time = Utc::now() - Duration::seconds(600);
            let mut conditions = vec![old.clone()];

            replace_condition(
                &mut conditions,
                Condition::new("Processing", ConditionStatus::True, "", ""),
            );
            assert_eq!(conditions.len(), 1);
            assert!(conditions[0].last_transition_time > old.last_transition_time);
        }

        #[test]
        fn conditions_equal_ignores_order_and_time() {
            let a = vec![
                Condition::new("A", ConditionStatus::True, "r", "m"),
                Condition::new("B", ConditionStatus::False, "r", "m"),
            ];
            let mut b = vec![a[1].clone(), a[0].clone()];
            b[0].last_transition_time = Utc::now() - Duration::seconds(5);
            assert!(conditions_equal(&a, &b));

            b[1].message = "changed".to_string();
            assert!(!conditions_equal(&a, &b));
            assert!(!conditions_equal(&a, &b[..1]));
        }

        #[test]
        fn is_condition_true_requires_presence() {
            let conditions = vec![Condition::new("Completed", ConditionStatus::True, "", "")];
            assert!(is_condition_true(&conditions, "Completed"));
            assert!(!is_condition_true(&conditions, "Processing"));
        }

        #[test]
        fn condition_serializes_with_kubernetes_field_names() {
            let condition = Condition::new("Completed", ConditionStatus::False, "r", "m");
            let json = serde_json::to_value(&condition).expect("serialize");
            assert_eq!(json["type"], "Completed");
            assert_eq!(json["status"], "False");
            assert!(json.get("lastTransitionTime").is_some());
        }
    }

    mod namespaced_name {
        use super::*;

        #[test]
        fn parses_full_form() {
            let nn = NamespacedName::parse("default/svc", None).expect("parse");
            assert_eq!(nn.namespace, "default");
            assert_eq!(nn.name, "svc");
            assert_eq!(nn.to_string(), "default/svc");
        }

        #[test]
        fn bare_name_uses_default_namespace() {
            let nn = NamespacedName::parse("secret", Some("ocm")).expect("parse");
            assert_eq!(nn.namespace, "ocm");
            assert!(NamespacedName::parse("secret", None).is_none());
        }

        #[test]
        fn rejects_empty_sides() {
            assert!(NamespacedName::parse("/svc", None).is_none());
            assert!(NamespacedName::parse("default/", None).is_none());
            assert!(NamespacedName::parse("", Some("x")).is_none());
            assert!(NamespacedName::parse("a/b/c", None).is_none());
        }
    }
}
