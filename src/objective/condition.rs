//! Objective Conditions
//!
//! Predicates polled once per tick for objectives whose poll method is
//! `Condition`. Any `Fn(&ObjectiveManager) -> bool` closure is a condition;
//! `ConditionSpec` covers the cases that can be written in TOML.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::manager::ObjectiveManager;

/// A side-effect-free check evaluated against the live manager.
pub trait Condition: Send + Sync {
    fn evaluate(&self, manager: &ObjectiveManager) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&ObjectiveManager) -> bool + Send + Sync,
{
    fn evaluate(&self, manager: &ObjectiveManager) -> bool {
        self(manager)
    }
}

/// Declarative condition as it appears in definition files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    /// Another objective or group has completed
    ObjectiveComplete { target: String },
    /// Another objective or group is currently registered
    ObjectiveActive { target: String },
    /// Another objective or group has failed
    ObjectiveFailed { target: String },
    /// A sequential group is currently waiting on `target`
    ActiveChildIs { group: String, target: String },
    /// A manager flag is set, optionally to a specific value
    Flag {
        name: String,
        #[serde(default)]
        equals: Option<String>,
    },
    All { of: Vec<ConditionSpec> },
    Any { of: Vec<ConditionSpec> },
    Not { of: Box<ConditionSpec> },
}

impl ConditionSpec {
    pub fn build(self) -> Arc<dyn Condition> {
        Arc::new(self)
    }

    /// Definition ids this condition looks at, including nested ones
    pub fn targets(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_targets(&mut out);
        out
    }

    fn collect_targets<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ConditionSpec::ObjectiveComplete { target }
            | ConditionSpec::ObjectiveActive { target }
            | ConditionSpec::ObjectiveFailed { target } => out.push(target),
            ConditionSpec::ActiveChildIs { group, target } => {
                out.push(group);
                out.push(target);
            }
            ConditionSpec::Flag { .. } => {}
            ConditionSpec::All { of } | ConditionSpec::Any { of } => {
                for spec in of {
                    spec.collect_targets(out);
                }
            }
            ConditionSpec::Not { of } => of.collect_targets(out),
        }
    }
}

impl Condition for ConditionSpec {
    fn evaluate(&self, manager: &ObjectiveManager) -> bool {
        match self {
            ConditionSpec::ObjectiveComplete { target } => manager.is_complete(target),
            ConditionSpec::ObjectiveActive { target } => manager.is_registered(target),
            ConditionSpec::ObjectiveFailed { target } => manager.is_failed(target),
            ConditionSpec::ActiveChildIs { group, target } => {
                manager.active_child_id(group) == Some(target.as_str())
            }
            ConditionSpec::Flag { name, equals } => match (manager.flag(name), equals) {
                (Some(value), Some(expected)) => value == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
            ConditionSpec::All { of } => of.iter().all(|c| c.evaluate(manager)),
            ConditionSpec::Any { of } => of.iter().any(|c| c.evaluate(manager)),
            ConditionSpec::Not { of } => !of.evaluate(manager),
        }
    }
}

/// How an objective makes progress
#[derive(Clone, Default)]
pub enum PollMethod {
    /// Driven by explicit increment/complete calls
    #[default]
    None,
    /// The manager evaluates the condition every tick and increments on true
    Condition(Arc<dyn Condition>),
}

impl PollMethod {
    pub fn is_polled(&self) -> bool {
        matches!(self, PollMethod::Condition(_))
    }
}

impl fmt::Debug for PollMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollMethod::None => write!(f, "None"),
            PollMethod::Condition(_) => write!(f, "Condition(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::definition::{Definition, Objective, ObjectiveGroup};

    #[test]
    fn test_condition_spec_parsing() {
        let spec: ConditionSpec = toml::from_str(
            r#"
kind = "all"
of = [
    { kind = "objective_complete", target = "open_gate" },
    { kind = "not", of = { kind = "flag", name = "alarm" } },
]
"#,
        )
        .unwrap();

        assert_eq!(spec.targets(), vec!["open_gate"]);
        match spec {
            ConditionSpec::All { of } => assert_eq!(of.len(), 2),
            other => panic!("unexpected spec {:?}", other),
        }
    }

    #[test]
    fn test_flag_conditions() {
        let mut manager = ObjectiveManager::new();
        let set = ConditionSpec::Flag { name: "lever".into(), equals: None };
        let equals = ConditionSpec::Flag { name: "lever".into(), equals: Some("down".into()) };

        assert!(!set.evaluate(&manager));

        manager.set_flag("lever", "up");
        assert!(set.evaluate(&manager));
        assert!(!equals.evaluate(&manager));

        manager.set_flag("lever", "down");
        assert!(equals.evaluate(&manager));

        manager.clear_flag("lever");
        assert!(!set.evaluate(&manager));
    }

    #[test]
    fn test_objective_conditions() {
        let mut manager = ObjectiveManager::new();
        let gate = Definition::from(Objective::new("open_gate", 1));

        let active = ConditionSpec::ObjectiveActive { target: "open_gate".into() };
        let complete = ConditionSpec::ObjectiveComplete { target: "open_gate".into() };
        let not_complete = ConditionSpec::Not { of: Box::new(complete.clone()) };

        assert!(!active.evaluate(&manager));
        assert!(not_complete.evaluate(&manager));

        manager.register(&gate);
        assert!(active.evaluate(&manager));
        assert!(!complete.evaluate(&manager));

        manager.complete("open_gate");
        assert!(complete.evaluate(&manager));

        let any = ConditionSpec::Any {
            of: vec![not_complete, ConditionSpec::ObjectiveFailed { target: "open_gate".into() }],
        };
        assert!(!any.evaluate(&manager));
    }

    #[test]
    fn test_active_child_condition() {
        let mut manager = ObjectiveManager::new();
        let chapter: Definition = ObjectiveGroup::sequential(
            "chapter",
            vec![Objective::new("scout", 1).into(), Objective::new("ambush", 1).into()],
        )
        .into();
        let spec: ConditionSpec =
            toml::from_str("kind = \"active_child_is\"\ngroup = \"chapter\"\ntarget = \"ambush\"").unwrap();
        assert_eq!(spec.targets(), vec!["chapter", "ambush"]);

        assert!(!spec.evaluate(&manager));
        manager.register(&chapter);
        assert!(!spec.evaluate(&manager));

        manager.complete("scout");
        assert!(spec.evaluate(&manager));

        manager.complete("ambush");
        assert!(manager.is_complete("chapter"));
        // The finished sequence still points at its last child
        assert!(spec.evaluate(&manager));
    }

    #[test]
    fn test_closure_condition() {
        let manager = ObjectiveManager::new();
        let cond: Arc<dyn Condition> = Arc::new(|m: &ObjectiveManager| m.roots().is_empty());
        assert!(cond.evaluate(&manager));
    }
}
