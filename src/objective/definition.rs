//! Objective Definition Structures
//!
//! Immutable, author-provided configuration for leaf objectives and
//! composite groups. Raw structures are deserialized from TOML; resolved
//! structures are what the manager runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::condition::{Condition, ConditionSpec, PollMethod};
use crate::error::{ObjectiveError, Result};

/// A definition file as it appears on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDefinitionFile {
    #[serde(default)]
    pub objective: HashMap<String, RawObjective>,
    #[serde(default)]
    pub group: HashMap<String, RawGroup>,
}

/// Raw objective as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawObjective {
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Successes required before the objective completes
    #[serde(default = "default_successes")]
    pub successes: u32,
    #[serde(default)]
    pub optional: bool,
    /// Present when the objective is polled instead of driven externally
    pub condition: Option<ConditionSpec>,
}

fn default_successes() -> u32 {
    1
}

/// Raw group as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawGroup {
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default = "default_true")]
    pub require_all: bool,
    #[serde(default = "default_true")]
    pub fail_on_child_failure: bool,
    /// Seconds to wait before activating the next child (sequential only)
    #[serde(default)]
    pub delay_secs: f32,
    #[serde(default)]
    pub optional: bool,
    /// Child definition ids, in activation order
    #[serde(default)]
    pub children: Vec<String>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Resolved Definitions
// ============================================================================

/// A leaf goal
#[derive(Debug, Clone)]
pub struct Objective {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Always at least 1
    pub successes_before_complete: u32,
    pub poll_method: PollMethod,
    /// Optional objectives never block their parent group
    pub is_optional: bool,
}

impl Objective {
    pub fn new(id: impl Into<String>, successes_before_complete: u32) -> Self {
        let id = id.into();
        if successes_before_complete == 0 {
            warn!("Objective '{}' declared with zero successes, using 1", id);
        }
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            successes_before_complete: successes_before_complete.max(1),
            poll_method: PollMethod::None,
            is_optional: false,
        }
    }

    pub fn from_raw(id: &str, raw: &RawObjective) -> Result<Self> {
        if raw.successes == 0 {
            return Err(ObjectiveError::InvalidThreshold(id.to_string()));
        }

        let mut objective = Self::new(id, raw.successes).with_description(&raw.description);
        if let Some(ref name) = raw.name {
            objective.name = name.clone();
        }
        objective.is_optional = raw.optional;
        if let Some(ref spec) = raw.condition {
            objective.poll_method = PollMethod::Condition(spec.clone().build());
        }
        Ok(objective)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Poll the given condition every tick instead of waiting for calls
    pub fn polled_by(mut self, condition: Arc<dyn Condition>) -> Self {
        self.poll_method = PollMethod::Condition(condition);
        self
    }
}

/// A composite goal made of objectives and nested groups
#[derive(Debug, Clone)]
pub struct ObjectiveGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub children: Vec<Definition>,
    /// Activate children one at a time, in order
    pub sequential_children: bool,
    /// Complete only once every non-optional child completes
    pub require_all_children: bool,
    /// Any child failure fails the whole group
    pub fail_on_child_failure: bool,
    /// Wait between children (sequential only)
    pub delay_before_next_child: Duration,
    pub is_optional: bool,
}

impl ObjectiveGroup {
    /// All children active at once; every required child must complete
    pub fn parallel(id: impl Into<String>, children: Vec<Definition>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            children,
            sequential_children: false,
            require_all_children: true,
            fail_on_child_failure: true,
            delay_before_next_child: Duration::ZERO,
            is_optional: false,
        }
    }

    /// Children activated one after another
    pub fn sequential(id: impl Into<String>, children: Vec<Definition>) -> Self {
        Self {
            sequential_children: true,
            ..Self::parallel(id, children)
        }
    }

    pub fn from_raw(id: &str, raw: &RawGroup, children: Vec<Definition>) -> Result<Self> {
        let delay = Duration::try_from_secs_f32(raw.delay_secs)
            .map_err(|_| ObjectiveError::InvalidDelay(id.to_string()))?;

        let mut group = Self::parallel(id, children).with_description(&raw.description);
        if let Some(ref name) = raw.name {
            group.name = name.clone();
        }
        group.sequential_children = raw.sequential;
        group.require_all_children = raw.require_all;
        group.fail_on_child_failure = raw.fail_on_child_failure;
        group.delay_before_next_child = delay;
        group.is_optional = raw.optional;
        Ok(group)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Complete as soon as any child completes
    pub fn require_any(mut self) -> Self {
        self.require_all_children = false;
        self
    }

    /// Absorb child failures instead of failing the group
    pub fn continue_on_failure(mut self) -> Self {
        self.fail_on_child_failure = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_before_next_child = delay;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// Either kind of definition
#[derive(Debug, Clone)]
pub enum Definition {
    Objective(Arc<Objective>),
    Group(Arc<ObjectiveGroup>),
}

impl Definition {
    pub fn id(&self) -> &str {
        match self {
            Definition::Objective(o) => &o.id,
            Definition::Group(g) => &g.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Definition::Objective(o) => &o.name,
            Definition::Group(g) => &g.name,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            Definition::Objective(o) => o.is_optional,
            Definition::Group(g) => g.is_optional,
        }
    }

    /// Children of a group, empty for objectives
    pub fn children(&self) -> &[Definition] {
        match self {
            Definition::Objective(_) => &[],
            Definition::Group(g) => &g.children,
        }
    }

    /// Ids of this definition and everything below it, depth first
    pub fn descendant_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.id()];
        for child in self.children() {
            ids.extend(child.descendant_ids());
        }
        ids
    }

    /// Check that no id appears twice in this tree.
    ///
    /// Trees built in code cannot cycle, so a repeated id always means the
    /// same definition was placed under two parents.
    pub fn validate(&self) -> Result<()> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(self.id());
        self.validate_children(&mut parents, &mut seen)
    }

    fn validate_children<'a>(
        &'a self,
        parents: &mut HashMap<&'a str, &'a str>,
        seen: &mut HashSet<&'a str>,
    ) -> Result<()> {
        for child in self.children() {
            if !seen.insert(child.id()) {
                return Err(match parents.get(child.id()) {
                    Some(first) => ObjectiveError::MultipleParents {
                        child: child.id().to_string(),
                        first: first.to_string(),
                        second: self.id().to_string(),
                    },
                    None => ObjectiveError::Cycle(child.id().to_string()),
                });
            }
            parents.insert(child.id(), self.id());
            child.validate_children(parents, seen)?;
        }
        Ok(())
    }
}

impl From<Objective> for Definition {
    fn from(objective: Objective) -> Self {
        Definition::Objective(Arc::new(objective))
    }
}

impl From<ObjectiveGroup> for Definition {
    fn from(group: ObjectiveGroup) -> Self {
        Definition::Group(Arc::new(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threshold_is_clamped() {
        let objective = Objective::new("talk", 0);
        assert_eq!(objective.successes_before_complete, 1);
    }

    #[test]
    fn test_raw_objective_parsing() {
        let file: RawDefinitionFile = toml::from_str(
            r#"
[objective.kill_slimes]
name = "Slime Cull"
successes = 5

[objective.find_key]
optional = true
condition = { kind = "flag", name = "key_found" }

[group.first_hunt]
sequential = true
delay_secs = 1.5
children = ["kill_slimes", "find_key"]
"#,
        )
        .unwrap();

        let kill = Objective::from_raw("kill_slimes", &file.objective["kill_slimes"]).unwrap();
        assert_eq!(kill.name, "Slime Cull");
        assert_eq!(kill.successes_before_complete, 5);
        assert!(!kill.poll_method.is_polled());

        let key = Objective::from_raw("find_key", &file.objective["find_key"]).unwrap();
        assert_eq!(key.name, "find_key");
        assert!(key.is_optional);
        assert!(key.poll_method.is_polled());

        let raw_group = &file.group["first_hunt"];
        let group = ObjectiveGroup::from_raw("first_hunt", raw_group, vec![kill.into(), key.into()]).unwrap();
        assert!(group.sequential_children);
        assert!(group.require_all_children);
        assert!(group.fail_on_child_failure);
        assert_eq!(group.delay_before_next_child, Duration::from_millis(1500));
    }

    #[test]
    fn test_raw_rejects_invalid_values() {
        let raw = RawObjective {
            name: None,
            description: String::new(),
            successes: 0,
            optional: false,
            condition: None,
        };
        assert!(matches!(
            Objective::from_raw("bad", &raw),
            Err(ObjectiveError::InvalidThreshold(_))
        ));

        for delay in ["delay_secs = -1.0", "delay_secs = 1e30", "delay_secs = inf"] {
            let raw_group: RawGroup = toml::from_str(delay).unwrap();
            assert!(
                matches!(
                    ObjectiveGroup::from_raw("bad_group", &raw_group, vec![]),
                    Err(ObjectiveError::InvalidDelay(_))
                ),
                "{} accepted",
                delay
            );
        }
    }

    #[test]
    fn test_builders() {
        let escort = Objective::new("escort", 2).with_name("Escort the caravan").optional();
        let convoy = ObjectiveGroup::sequential("convoy", vec![escort.into()])
            .with_name("Convoy")
            .with_delay(Duration::from_secs(2));

        assert_eq!(convoy.name, "Convoy");
        assert_eq!(convoy.delay_before_next_child, Duration::from_secs(2));
        let convoy: Definition = convoy.into();
        assert_eq!(convoy.children()[0].name(), "Escort the caravan");
        assert!(convoy.children()[0].is_optional());
        assert!(convoy.children()[0].children().is_empty());
    }

    #[test]
    fn test_validate_detects_shared_child() {
        let shared: Definition = Objective::new("shared", 1).into();
        let left: Definition = ObjectiveGroup::parallel("left", vec![shared.clone()]).into();
        let right: Definition = ObjectiveGroup::parallel("right", vec![shared]).into();
        let root: Definition = ObjectiveGroup::parallel("root", vec![left, right]).into();

        match root.validate() {
            Err(ObjectiveError::MultipleParents { child, first, second }) => {
                assert_eq!(child, "shared");
                assert_eq!(first, "left");
                assert_eq!(second, "right");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_descendant_ids() {
        let root: Definition = ObjectiveGroup::sequential(
            "chapter",
            vec![
                Objective::new("a", 1).into(),
                ObjectiveGroup::parallel("b", vec![Objective::new("c", 2).into()]).into(),
            ],
        )
        .into();

        assert_eq!(root.descendant_ids(), vec!["chapter", "a", "b", "c"]);
        assert!(root.validate().is_ok());
    }
}
