//! Objective State Tracking
//!
//! Runtime progress records for objectives and groups. States live in the
//! manager's arena; parents own their children by id and children point
//! back at their parent by id only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{Definition, Objective, ObjectiveGroup};

/// Arena handle for a live state. Never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub(crate) u64);

/// Lifecycle status of an objective or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Active)
    }
}

/// Outcome of a single success increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// Already terminal, nothing changed
    Ignored,
    /// Counter moved but the threshold is not reached
    Progressed(u32),
    /// Counter reached the threshold
    Reached(u32),
}

/// Progress on a single leaf objective
#[derive(Debug, Clone)]
pub struct ObjectiveState {
    id: StateId,
    definition: Arc<Objective>,
    parent: Option<StateId>,
    successes: u32,
    completed: bool,
    failed: bool,
    activated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl ObjectiveState {
    pub(crate) fn new(id: StateId, definition: Arc<Objective>, parent: Option<StateId>) -> Self {
        Self {
            id,
            definition,
            parent,
            successes: 0,
            completed: false,
            failed: false,
            activated_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn state_id(&self) -> StateId {
        self.id
    }

    pub fn definition(&self) -> &Arc<Objective> {
        &self.definition
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn required(&self) -> u32 {
        self.definition.successes_before_complete
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn status(&self) -> Status {
        if self.completed {
            Status::Completed
        } else if self.failed {
            Status::Failed
        } else {
            Status::Active
        }
    }

    /// Whether the manager should evaluate this objective's condition
    pub fn is_polling(&self) -> bool {
        self.definition.poll_method.is_polled() && !self.completed && !self.failed
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }


    pub(crate) fn increment(&mut self) -> Increment {
        if self.completed || self.failed {
            return Increment::Ignored;
        }
        self.successes += 1;
        if self.successes >= self.required() {
            Increment::Reached(self.successes)
        } else {
            Increment::Progressed(self.successes)
        }
    }

    /// Returns false when already terminal
    pub(crate) fn complete(&mut self) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.completed = true;
        self.successes = self.required();
        self.completed_at = Some(Utc::now());
        true
    }

    /// Returns false when already terminal
    pub(crate) fn fail(&mut self) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.failed = true;
        self.failed_at = Some(Utc::now());
        true
    }

    /// Clears the counter and failure. Completion is kept.
    pub(crate) fn reset(&mut self) {
        self.successes = 0;
        self.failed = false;
        self.failed_at = None;
    }
}

/// Reference from a group to one of its live children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Objective(StateId),
    Group(StateId),
}

impl ChildState {
    pub fn state_id(&self) -> StateId {
        match self {
            ChildState::Objective(id) | ChildState::Group(id) => *id,
        }
    }
}

/// Progress on a composite group
#[derive(Debug, Clone)]
pub struct GroupState {
    id: StateId,
    definition: Arc<ObjectiveGroup>,
    parent: Option<StateId>,
    children: Vec<ChildState>,
    /// Number of children activated so far (sequential mode)
    next_child: usize,
    /// Child the sequence is waiting on
    current: Option<StateId>,
    completed: bool,
    failed: bool,
    activated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl GroupState {
    pub(crate) fn new(id: StateId, definition: Arc<ObjectiveGroup>, parent: Option<StateId>) -> Self {
        Self {
            id,
            definition,
            parent,
            children: Vec::new(),
            next_child: 0,
            current: None,
            completed: false,
            failed: false,
            activated_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn state_id(&self) -> StateId {
        self.id
    }

    pub fn definition(&self) -> &Arc<ObjectiveGroup> {
        &self.definition
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn children(&self) -> &[ChildState] {
        &self.children
    }

    /// Index of the child currently active in a sequential group
    pub fn current_child_index(&self) -> Option<usize> {
        self.next_child.checked_sub(1)
    }

    /// State of the child a sequential group is waiting on
    pub fn current_child(&self) -> Option<StateId> {
        self.current
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn status(&self) -> Status {
        if self.completed {
            Status::Completed
        } else if self.failed {
            Status::Failed
        } else {
            Status::Active
        }
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub(crate) fn set_current(&mut self, child: StateId) {
        self.current = Some(child);
    }

    /// Take the next definition in order, advancing the cursor
    pub(crate) fn advance(&mut self) -> Option<Definition> {
        let next = self.definition.children.get(self.next_child)?.clone();
        self.next_child += 1;
        Some(next)
    }

    pub(crate) fn push_child(&mut self, child: ChildState) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, state: StateId) {
        self.children.retain(|c| c.state_id() != state);
    }

    pub(crate) fn complete(&mut self) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(Utc::now());
        true
    }

    pub(crate) fn fail(&mut self) -> bool {
        if self.completed || self.failed {
            return false;
        }
        self.failed = true;
        self.failed_at = Some(Utc::now());
        true
    }

    /// Clears flags and the cursor, handing back the children to dispose
    pub(crate) fn reset(&mut self) -> Vec<ChildState> {
        self.completed = false;
        self.failed = false;
        self.completed_at = None;
        self.failed_at = None;
        self.next_child = 0;
        self.current = None;
        std::mem::take(&mut self.children)
    }
}

/// An arena entry
#[derive(Debug, Clone)]
pub enum StateNode {
    Objective(ObjectiveState),
    Group(GroupState),
}

impl StateNode {
    pub fn definition_id(&self) -> &str {
        match self {
            StateNode::Objective(s) => &s.definition.id,
            StateNode::Group(s) => &s.definition.id,
        }
    }

    pub fn parent(&self) -> Option<StateId> {
        match self {
            StateNode::Objective(s) => s.parent,
            StateNode::Group(s) => s.parent,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            StateNode::Objective(s) => s.status(),
            StateNode::Group(s) => s.status(),
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            StateNode::Objective(s) => s.definition.is_optional,
            StateNode::Group(s) => s.definition.is_optional,
        }
    }
}

/// Serializable view of a state subtree
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub id: String,
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProgressSnapshot>,
}
