//! Objective Manager
//!
//! Owns every live objective and group state, drives their transitions,
//! polls condition-driven objectives once per tick and re-broadcasts each
//! transition to observers.
//!
//! All mutation happens through `&mut self`, so a manager shared across
//! tasks must sit behind a lock (see `runner`).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::condition::PollMethod;
use super::definition::Definition;
use super::events::ObjectiveEvent;
use super::state::{
    ChildState, GroupState, Increment, ObjectiveState, ProgressSnapshot, StateId, StateNode, Status,
};
use crate::config::EngineConfig;
use crate::error::{ObjectiveError, Result};

/// Handle returned by `add_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&ObjectiveEvent) + Send>;

/// Sequential activation waiting for its delay to elapse
#[derive(Debug, Clone, Copy)]
struct PendingActivation {
    group: StateId,
    due: Duration,
}

pub struct ObjectiveManager {
    states: HashMap<StateId, StateNode>,
    next_state_id: u64,
    /// Definition id -> state, per kind
    objective_states: HashMap<String, StateId>,
    group_states: HashMap<String, StateId>,
    /// Top-level states in registration order
    roots: Vec<StateId>,
    /// Condition-driven objectives in registration order
    polling: Vec<StateId>,
    pending: Vec<PendingActivation>,
    /// Total time advanced through `tick`
    clock: Duration,
    flags: HashMap<String, String>,
    log_events: bool,
    event_tx: broadcast::Sender<ObjectiveEvent>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl Default for ObjectiveManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectiveManager {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            states: HashMap::new(),
            next_state_id: 0,
            objective_states: HashMap::new(),
            group_states: HashMap::new(),
            roots: Vec::new(),
            polling: Vec::new(),
            pending: Vec::new(),
            clock: Duration::ZERO,
            flags: HashMap::new(),
            log_events: config.log_events,
            event_tx,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectiveEvent> {
        self.event_tx.subscribe()
    }

    /// Call `listener` synchronously for every event, at the transition
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ObjectiveEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, event: ObjectiveEvent) {
        if self.log_events {
            info!("[objectives] {} '{}'", event.event_type(), event.id());
        } else {
            debug!("[objectives] {} '{}'", event.event_type(), event.id());
        }

        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a root definition. Registering an id that is already live
    /// returns the existing state.
    pub fn register(&mut self, definition: &Definition) -> StateId {
        self.register_with_parent(definition, None)
    }

    /// Register a definition as an extra child of a live group
    pub fn register_under(&mut self, definition: &Definition, parent: StateId) -> StateId {
        if !matches!(self.states.get(&parent), Some(StateNode::Group(_))) {
            warn!(
                "Parent state {:?} for '{}' is not a live group, registering as root",
                parent,
                definition.id()
            );
            return self.register_with_parent(definition, None);
        }
        self.register_with_parent(definition, Some(parent))
    }

    /// Like `register`, but reports tree violations and already-live ids
    pub fn try_register(&mut self, definition: &Definition) -> Result<StateId> {
        definition.validate()?;
        if let Some(id) = definition
            .descendant_ids()
            .into_iter()
            .find(|id| self.is_registered(id))
        {
            return Err(ObjectiveError::AlreadyRegistered(id.to_string()));
        }
        Ok(self.register(definition))
    }

    fn register_with_parent(&mut self, definition: &Definition, parent: Option<StateId>) -> StateId {
        if let Some(existing) = self.lookup(definition) {
            return existing;
        }

        let state = self.attach(definition, parent);
        if parent.is_none() {
            self.roots.push(state);
        }
        self.start(state);
        state
    }

    fn lookup(&self, definition: &Definition) -> Option<StateId> {
        match definition {
            Definition::Objective(o) => self.objective_states.get(&o.id).copied(),
            Definition::Group(g) => self.group_states.get(&g.id).copied(),
        }
    }

    /// Create a state and index it. Does not activate anything.
    fn attach(&mut self, definition: &Definition, parent: Option<StateId>) -> StateId {
        let state = StateId(self.next_state_id);
        self.next_state_id += 1;

        let (node, child, event) = match definition {
            Definition::Objective(o) => {
                self.objective_states.insert(o.id.clone(), state);
                info!("Registered objective: {} ({})", o.name, o.id);
                (
                    StateNode::Objective(ObjectiveState::new(state, o.clone(), parent)),
                    ChildState::Objective(state),
                    ObjectiveEvent::ObjectiveAdded { id: o.id.clone() },
                )
            }
            Definition::Group(g) => {
                self.group_states.insert(g.id.clone(), state);
                info!("Registered objective group: {} ({})", g.name, g.id);
                (
                    StateNode::Group(GroupState::new(state, g.clone(), parent)),
                    ChildState::Group(state),
                    ObjectiveEvent::GroupAdded { id: g.id.clone() },
                )
            }
        };

        self.states.insert(state, node);
        if let Some(parent) = parent {
            if let Some(StateNode::Group(group)) = self.states.get_mut(&parent) {
                group.push_child(child);
            }
        }
        self.emit(event);
        state
    }

    /// Attach a child of `group`, returning the state and whether it is new
    fn attach_child(&mut self, group: StateId, definition: &Definition) -> (StateId, bool) {
        let (state, fresh) = match self.lookup(definition) {
            Some(existing) => {
                warn!(
                    "'{}' is already registered elsewhere; definitions must form a tree",
                    definition.id()
                );
                (existing, false)
            }
            None => (self.attach(definition, Some(group)), true),
        };

        if let Some(StateNode::Group(g)) = self.states.get(&group) {
            let group_id = g.definition().id.clone();
            debug!("Activated '{}' in group '{}'", definition.id(), group_id);
            self.emit(ObjectiveEvent::ChildActivated {
                group: group_id,
                child: definition.id().to_string(),
            });
        }
        (state, fresh)
    }

    /// Begin polling or activate initial children
    fn start(&mut self, state: StateId) {
        match self.states.get(&state) {
            Some(StateNode::Objective(s)) => {
                if s.definition().poll_method.is_polled() && !self.polling.contains(&state) {
                    self.polling.push(state);
                }
            }
            Some(StateNode::Group(_)) => self.start_group(state),
            None => {}
        }
    }

    fn start_group(&mut self, group: StateId) {
        let Some(StateNode::Group(g)) = self.states.get(&group) else {
            return;
        };

        if g.definition().sequential_children {
            self.activate_next(group);
            return;
        }

        // Attach every child before starting any, so an early completion
        // aggregates over the full set
        let mut fresh = Vec::new();
        let mut attached = 0;
        loop {
            let next = match self.states.get_mut(&group) {
                Some(StateNode::Group(g)) => g.advance(),
                _ => None,
            };
            let Some(definition) = next else { break };
            let (child, is_new) = self.attach_child(group, &definition);
            attached += 1;
            if is_new {
                fresh.push(child);
            }
        }

        if attached == 0 {
            self.complete_state(group);
            return;
        }

        for child in fresh {
            if self.states.contains_key(&child) {
                self.start(child);
            }
        }
    }

    /// Activate the next child of a sequential group, completing the group
    /// once the list is exhausted
    fn activate_next(&mut self, group: StateId) {
        let next = match self.states.get_mut(&group) {
            Some(StateNode::Group(g)) => g.advance(),
            _ => return,
        };

        match next {
            Some(definition) => {
                let (child, fresh) = self.attach_child(group, &definition);
                if let Some(StateNode::Group(g)) = self.states.get_mut(&group) {
                    g.set_current(child);
                }
                if fresh {
                    self.start(child);
                }
            }
            None => self.complete_state(group),
        }
    }

    /// Move a sequential group on, honouring its configured delay
    fn advance_sequence(&mut self, group: StateId) {
        let delay = match self.states.get(&group) {
            Some(StateNode::Group(g)) => g.definition().delay_before_next_child,
            _ => return,
        };

        if delay > Duration::ZERO {
            debug!("Scheduling next child of {:?} in {:?}", group, delay);
            self.pending.push(PendingActivation {
                group,
                due: self.clock.saturating_add(delay),
            });
        } else {
            self.activate_next(group);
        }
    }

    /// Remove a definition's state. Groups take their live descendants
    /// with them. Unknown ids are ignored.
    pub fn unregister(&mut self, id: &str) {
        if let Some(state) = self.state_id(id) {
            self.dispose(state);
        }
    }

    pub fn try_unregister(&mut self, id: &str) -> Result<()> {
        if !self.is_registered(id) {
            return Err(ObjectiveError::NotRegistered(id.to_string()));
        }
        self.unregister(id);
        Ok(())
    }

    fn dispose(&mut self, state: StateId) {
        let children: Vec<StateId> = match self.states.get(&state) {
            Some(StateNode::Group(g)) => g.children().iter().map(ChildState::state_id).collect(),
            Some(StateNode::Objective(_)) => Vec::new(),
            None => return,
        };
        for child in children {
            self.dispose(child);
        }

        let Some(node) = self.states.remove(&state) else {
            return;
        };
        self.roots.retain(|s| *s != state);
        self.polling.retain(|s| *s != state);
        self.pending.retain(|p| p.group != state);

        if let Some(parent) = node.parent() {
            if let Some(StateNode::Group(g)) = self.states.get_mut(&parent) {
                g.remove_child(state);
            }
        }

        match node {
            StateNode::Objective(s) => {
                let id = s.definition().id.clone();
                self.objective_states.remove(&id);
                info!("Unregistered objective: {} ({})", id, s.status().as_str());
                self.emit(ObjectiveEvent::ObjectiveRemoved { id });
            }
            StateNode::Group(g) => {
                let id = g.definition().id.clone();
                self.group_states.remove(&id);
                info!("Unregistered objective group: {} ({})", id, g.status().as_str());
                self.emit(ObjectiveEvent::GroupRemoved { id });
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Add one success to an objective. Ignored for groups, unknown ids and
    /// terminal objectives.
    pub fn increment_successes(&mut self, id: &str) {
        if let Some(&state) = self.objective_states.get(id) {
            self.increment_state(state);
        }
    }

    /// Add `amount` successes, stopping once the objective is terminal
    pub fn increment_successes_by(&mut self, id: &str, amount: u32) {
        for _ in 0..amount {
            if self.status(id) != Some(Status::Active) {
                break;
            }
            self.increment_successes(id);
        }
    }

    pub fn complete(&mut self, id: &str) {
        if let Some(state) = self.state_id(id) {
            self.complete_state(state);
        }
    }

    pub fn fail(&mut self, id: &str) {
        if let Some(state) = self.state_id(id) {
            self.fail_state(state);
        }
    }

    /// Objectives: zero the counter and clear failure (completion sticks).
    /// Groups: clear both flags and dispose every child without
    /// re-activating any.
    pub fn reset(&mut self, id: &str) {
        if let Some(state) = self.state_id(id) {
            self.reset_state(state);
        }
    }

    /// Reset a group and activate its initial children again
    pub fn restart_group(&mut self, id: &str) {
        if let Some(&state) = self.group_states.get(id) {
            self.reset_state(state);
            self.start_group(state);
        }
    }

    fn increment_state(&mut self, state: StateId) {
        let (outcome, id, required) = match self.states.get_mut(&state) {
            Some(StateNode::Objective(s)) => (s.increment(), s.definition().id.clone(), s.required()),
            _ => return,
        };

        let successes = match outcome {
            Increment::Ignored => return,
            Increment::Progressed(n) | Increment::Reached(n) => n,
        };

        debug!("Objective '{}' progress {}/{}", id, successes, required);
        self.emit(ObjectiveEvent::ObjectiveIncremented {
            id,
            successes,
            required,
        });

        if let Increment::Reached(_) = outcome {
            self.complete_state(state);
        }
    }

    fn complete_state(&mut self, state: StateId) {
        let (event, parent) = match self.states.get_mut(&state) {
            Some(StateNode::Objective(s)) => {
                if !s.complete() {
                    return;
                }
                let id = s.definition().id.clone();
                info!("Objective '{}' completed", id);
                (ObjectiveEvent::ObjectiveCompleted { id }, s.parent())
            }
            Some(StateNode::Group(g)) => {
                if !g.complete() {
                    return;
                }
                let id = g.definition().id.clone();
                info!("Objective group '{}' completed", id);
                (ObjectiveEvent::GroupCompleted { id }, g.parent())
            }
            None => return,
        };

        self.emit(event);
        if let Some(parent) = parent {
            self.on_child_completed(parent, state);
        }
    }

    fn fail_state(&mut self, state: StateId) {
        let (event, parent) = match self.states.get_mut(&state) {
            Some(StateNode::Objective(s)) => {
                if !s.fail() {
                    return;
                }
                let id = s.definition().id.clone();
                info!("Objective '{}' failed", id);
                (ObjectiveEvent::ObjectiveFailed { id }, s.parent())
            }
            Some(StateNode::Group(g)) => {
                if !g.fail() {
                    return;
                }
                let id = g.definition().id.clone();
                info!("Objective group '{}' failed", id);
                (ObjectiveEvent::GroupFailed { id }, g.parent())
            }
            None => return,
        };

        self.emit(event);
        if let Some(parent) = parent {
            self.on_child_failed(parent, state);
        }
    }

    fn reset_state(&mut self, state: StateId) {
        match self.states.get_mut(&state) {
            Some(StateNode::Objective(s)) => {
                s.reset();
                let id = s.definition().id.clone();
                info!("Objective '{}' reset", id);
                self.emit(ObjectiveEvent::ObjectiveReset { id });
            }
            Some(StateNode::Group(g)) => {
                let children = g.reset();
                let id = g.definition().id.clone();
                self.pending.retain(|p| p.group != state);
                for child in children {
                    self.dispose(child.state_id());
                }
                info!("Objective group '{}' reset", id);
                self.emit(ObjectiveEvent::GroupReset { id });
            }
            None => {}
        }
    }

    fn on_child_completed(&mut self, group: StateId, child: StateId) {
        let Some(StateNode::Group(g)) = self.states.get(&group) else {
            return;
        };
        if g.is_completed() || g.is_failed() {
            return;
        }
        let definition = g.definition().clone();
        let is_current = g.current_child() == Some(child);

        if definition.sequential_children {
            if is_current {
                self.advance_sequence(group);
            }
        } else if definition.require_all_children {
            if self.required_children_completed(group) {
                self.complete_state(group);
            }
        } else {
            self.complete_state(group);
        }
    }

    fn on_child_failed(&mut self, group: StateId, child: StateId) {
        let Some(StateNode::Group(g)) = self.states.get(&group) else {
            return;
        };
        if g.is_completed() || g.is_failed() {
            return;
        }
        let definition = g.definition().clone();
        let is_current = g.current_child() == Some(child);

        if definition.fail_on_child_failure {
            self.fail_state(group);
        } else if definition.sequential_children && is_current {
            // An optional child does not have to succeed for the sequence to go on
            let optional = self.states.get(&child).is_some_and(StateNode::is_optional);
            if optional {
                self.advance_sequence(group);
            }
        }
    }

    /// Every non-optional live child of `group` is complete
    fn required_children_completed(&self, group: StateId) -> bool {
        let Some(StateNode::Group(g)) = self.states.get(&group) else {
            return false;
        };

        g.children().iter().all(|child| {
            match (child, self.states.get(&child.state_id())) {
                (ChildState::Objective(_), Some(StateNode::Objective(s))) => {
                    s.is_completed() || s.definition().is_optional
                }
                (ChildState::Group(_), Some(StateNode::Group(s))) => {
                    s.is_completed() || s.definition().is_optional
                }
                // Child vanished or changed kind: it cannot block the group
                _ => true,
            }
        })
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// One cooperative scheduling step: advance the clock by `delta`, run
    /// due sequential activations, then evaluate each polling objective's
    /// condition once.
    pub fn tick(&mut self, delta: Duration) {
        self.clock += delta;
        let now = self.clock;

        let (due, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| p.due <= now);
        self.pending = waiting;

        for activation in due {
            let live = matches!(
                self.states.get(&activation.group),
                Some(StateNode::Group(g)) if !g.status().is_terminal()
            );
            if live {
                self.activate_next(activation.group);
            }
        }

        let polling = self.polling.clone();
        for state in polling {
            let hit = match self.states.get(&state) {
                Some(StateNode::Objective(s)) if s.is_polling() => match &s.definition().poll_method {
                    PollMethod::Condition(condition) => condition.evaluate(self),
                    PollMethod::None => false,
                },
                _ => continue,
            };
            if hit {
                self.increment_state(state);
            }
        }
    }

    /// Time advanced through `tick` so far
    pub fn elapsed(&self) -> Duration {
        self.clock
    }

    /// Number of sequential activations waiting on a delay
    pub fn pending_activations(&self) -> usize {
        self.pending.len()
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn set_flag(&mut self, name: &str, value: &str) {
        self.flags.insert(name.to_string(), value.to_string());
    }

    pub fn clear_flag(&mut self, name: &str) -> Option<String> {
        self.flags.remove(name)
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state_id(&self, id: &str) -> Option<StateId> {
        self.objective_states
            .get(id)
            .or_else(|| self.group_states.get(id))
            .copied()
    }

    pub fn state(&self, state: StateId) -> Option<&StateNode> {
        self.states.get(&state)
    }

    pub fn objective_state(&self, id: &str) -> Option<&ObjectiveState> {
        match self.states.get(self.objective_states.get(id)?) {
            Some(StateNode::Objective(s)) => Some(s),
            _ => None,
        }
    }

    pub fn group_state(&self, id: &str) -> Option<&GroupState> {
        match self.states.get(self.group_states.get(id)?) {
            Some(StateNode::Group(s)) => Some(s),
            _ => None,
        }
    }

    /// Definition id of the child a sequential group is waiting on
    pub fn active_child_id(&self, group: &str) -> Option<&str> {
        let child = self.group_state(group)?.current_child()?;
        self.states.get(&child).map(StateNode::definition_id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.objective_states.contains_key(id) || self.group_states.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<Status> {
        self.states.get(&self.state_id(id)?).map(StateNode::status)
    }

    pub fn is_complete(&self, id: &str) -> bool {
        self.status(id) == Some(Status::Completed)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.status(id) == Some(Status::Failed)
    }

    /// Successes recorded for an objective, zero when unknown
    pub fn success_count(&self, id: &str) -> u32 {
        self.objective_state(id).map_or(0, ObjectiveState::successes)
    }

    pub fn roots(&self) -> &[StateId] {
        &self.roots
    }

    pub fn root_ids(&self) -> Vec<&str> {
        self.roots
            .iter()
            .filter_map(|s| self.states.get(s))
            .map(StateNode::definition_id)
            .collect()
    }

    /// Number of live states of either kind
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Progress of every root, recursively
    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        self.roots
            .iter()
            .filter_map(|s| self.snapshot_of(*s))
            .collect()
    }

    pub fn snapshot_of(&self, state: StateId) -> Option<ProgressSnapshot> {
        match self.states.get(&state)? {
            StateNode::Objective(s) => Some(ProgressSnapshot {
                id: s.definition().id.clone(),
                name: s.definition().name.clone(),
                status: s.status(),
                successes: Some(s.successes()),
                required: Some(s.required()),
                children: Vec::new(),
            }),
            StateNode::Group(g) => Some(ProgressSnapshot {
                id: g.definition().id.clone(),
                name: g.definition().name.clone(),
                status: g.status(),
                successes: None,
                required: None,
                children: g
                    .children()
                    .iter()
                    .filter_map(|c| self.snapshot_of(c.state_id()))
                    .collect(),
            }),
        }
    }
}
