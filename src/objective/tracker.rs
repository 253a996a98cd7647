//! Objective Trackers
//!
//! Small observers built on manager events: `ObjectiveSet` registers a list
//! of definitions as a unit and reports when all complete or any fails;
//! `ObjectiveWatch` follows a single definition.

use std::collections::HashSet;

use super::definition::Definition;
use super::events::ObjectiveEvent;
use super::manager::ObjectiveManager;

/// Aggregate result reported by an `ObjectiveSet`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// Every definition in the set has completed
    AllCompleted,
    /// A definition in the set, or anything below it, failed
    AnyFailed(String),
}

/// A list of root definitions registered and unregistered together
#[derive(Debug, Clone)]
pub struct ObjectiveSet {
    definitions: Vec<Definition>,
    /// Every id in the set's trees
    tracked: HashSet<String>,
    attached: bool,
    completion_reported: bool,
}

impl ObjectiveSet {
    pub fn new(definitions: Vec<Definition>) -> Self {
        let tracked = definitions
            .iter()
            .flat_map(|d| d.descendant_ids())
            .map(str::to_string)
            .collect();
        Self {
            definitions,
            tracked,
            attached: false,
            completion_reported: false,
        }
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Register every definition with the manager
    pub fn attach(&mut self, manager: &mut ObjectiveManager) {
        for definition in &self.definitions {
            manager.register(definition);
        }
        self.attached = true;
        self.completion_reported = false;
    }

    /// Unregister every definition from the manager
    pub fn detach(&mut self, manager: &mut ObjectiveManager) {
        self.attached = false;
        for definition in &self.definitions {
            manager.unregister(definition.id());
        }
    }

    pub fn all_completed(&self, manager: &ObjectiveManager) -> bool {
        self.definitions.iter().all(|d| manager.is_complete(d.id()))
    }

    /// First tracked id currently failed, if any
    pub fn first_failed<'a>(&'a self, manager: &ObjectiveManager) -> Option<&'a str> {
        self.definitions
            .iter()
            .flat_map(|d| d.descendant_ids())
            .find(|id| manager.is_failed(id))
    }

    /// Feed one manager event; returns an outcome when the set's aggregate
    /// state changes. `AllCompleted` is reported once per attach.
    pub fn handle_event(&mut self, event: &ObjectiveEvent, manager: &ObjectiveManager) -> Option<SetOutcome> {
        if !self.attached || !self.tracked.contains(event.id()) {
            return None;
        }

        if event.is_failure() {
            return Some(SetOutcome::AnyFailed(event.id().to_string()));
        }

        if event.is_completion() && !self.completion_reported && self.all_completed(manager) {
            self.completion_reported = true;
            return Some(SetOutcome::AllCompleted);
        }

        None
    }
}

/// Follows one definition id across registration and transitions
#[derive(Debug, Clone)]
pub struct ObjectiveWatch {
    id: String,
    attached: bool,
    is_group: bool,
}

impl ObjectiveWatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: false,
            is_group: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the watched definition is currently registered
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Catch up with the manager's current state, e.g. when the watch is
    /// created after its definition was registered. Returns the synthesized
    /// added/removed event when attachment changed.
    pub fn sync(&mut self, manager: &ObjectiveManager) -> Option<ObjectiveEvent> {
        let registered = manager.is_registered(&self.id);
        if registered && !self.attached {
            self.attached = true;
            self.is_group = manager.group_state(&self.id).is_some();
            let id = self.id.clone();
            Some(if self.is_group {
                ObjectiveEvent::GroupAdded { id }
            } else {
                ObjectiveEvent::ObjectiveAdded { id }
            })
        } else if !registered && self.attached {
            self.attached = false;
            let id = self.id.clone();
            Some(if self.is_group {
                ObjectiveEvent::GroupRemoved { id }
            } else {
                ObjectiveEvent::ObjectiveRemoved { id }
            })
        } else {
            None
        }
    }

    /// Returns the event when it concerns the watched definition and the
    /// watch is (or just became) attached
    pub fn handle_event(&mut self, event: &ObjectiveEvent) -> Option<ObjectiveEvent> {
        if event.id() != self.id {
            return None;
        }
        // Activation notices describe the parent's progress, not ours
        if matches!(event, ObjectiveEvent::ChildActivated { .. }) {
            return None;
        }

        if event.is_added() {
            if self.attached {
                return None;
            }
            self.attached = true;
            self.is_group = matches!(event, ObjectiveEvent::GroupAdded { .. });
            return Some(event.clone());
        }

        if !self.attached {
            return None;
        }
        if event.is_removed() {
            self.attached = false;
        }
        Some(event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::definition::{Objective, ObjectiveGroup};
    use tokio::sync::broadcast::Receiver;

    fn pump(
        rx: &mut Receiver<ObjectiveEvent>,
        set: &mut ObjectiveSet,
        manager: &ObjectiveManager,
    ) -> Vec<SetOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            outcomes.extend(set.handle_event(&event, manager));
        }
        outcomes
    }

    #[test]
    fn test_set_reports_all_completed_once() {
        let mut manager = ObjectiveManager::new();
        let mut rx = manager.subscribe();
        let mut set = ObjectiveSet::new(vec![
            Objective::new("a", 1).into(),
            ObjectiveGroup::parallel("g", vec![Objective::new("b", 1).into()]).into(),
        ]);

        set.attach(&mut manager);
        assert!(set.is_attached());
        assert!(manager.is_registered("b"));

        manager.complete("a");
        assert!(pump(&mut rx, &mut set, &manager).is_empty());

        manager.complete("b");
        assert_eq!(pump(&mut rx, &mut set, &manager), vec![SetOutcome::AllCompleted]);

        // Later completions don't repeat the report
        manager.reset("g");
        manager.complete("g");
        assert!(pump(&mut rx, &mut set, &manager).is_empty());
    }

    #[test]
    fn test_set_reports_nested_failure() {
        let mut manager = ObjectiveManager::new();
        let mut rx = manager.subscribe();
        let mut set = ObjectiveSet::new(vec![
            ObjectiveGroup::parallel("g", vec![Objective::new("b", 1).into()])
                .continue_on_failure()
                .into(),
        ]);
        set.attach(&mut manager);

        manager.fail("b");
        assert_eq!(
            pump(&mut rx, &mut set, &manager),
            vec![SetOutcome::AnyFailed("b".to_string())]
        );
        assert_eq!(set.first_failed(&manager), Some("b"));
    }

    #[test]
    fn test_set_detach_unregisters() {
        let mut manager = ObjectiveManager::new();
        let mut rx = manager.subscribe();
        let mut set = ObjectiveSet::new(vec![Objective::new("a", 1).into()]);
        set.attach(&mut manager);
        set.detach(&mut manager);

        assert!(!manager.is_registered("a"));
        assert!(pump(&mut rx, &mut set, &manager).is_empty());
    }

    #[test]
    fn test_watch_follows_one_definition() {
        let mut manager = ObjectiveManager::new();
        let mut rx = manager.subscribe();
        let mut watch = ObjectiveWatch::new("target");

        manager.register(&Objective::new("other", 1).into());
        manager.register(&Objective::new("target", 2).into());
        manager.increment_successes("target");
        manager.complete("other");
        manager.unregister("target");
        manager.increment_successes("target");

        let forwarded: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| watch.handle_event(&e))
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            forwarded,
            vec!["objective_added", "objective_incremented", "objective_removed"]
        );
        assert!(!watch.is_attached());
    }

    #[test]
    fn test_watch_sync_catches_up() {
        let mut manager = ObjectiveManager::new();
        manager.register(&ObjectiveGroup::parallel("camp", vec![Objective::new("a", 1).into()]).into());

        let mut watch = ObjectiveWatch::new("camp");
        assert_eq!(
            watch.sync(&manager),
            Some(ObjectiveEvent::GroupAdded { id: "camp".into() })
        );
        assert!(watch.sync(&manager).is_none());

        manager.unregister("camp");
        assert_eq!(
            watch.sync(&manager),
            Some(ObjectiveEvent::GroupRemoved { id: "camp".into() })
        );
    }
}
