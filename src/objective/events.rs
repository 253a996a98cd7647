//! Objective Event Types
//!
//! Notifications the manager emits for every registration and transition.

use serde::{Deserialize, Serialize};

/// A lifecycle notification, carrying the affected definition id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObjectiveEvent {
    ObjectiveAdded { id: String },
    ObjectiveRemoved { id: String },
    ObjectiveCompleted { id: String },
    ObjectiveFailed { id: String },
    ObjectiveIncremented {
        id: String,
        successes: u32,
        required: u32,
    },
    ObjectiveReset { id: String },

    GroupAdded { id: String },
    GroupRemoved { id: String },
    GroupCompleted { id: String },
    GroupFailed { id: String },
    GroupReset { id: String },
    /// A child of a group became active
    ChildActivated { group: String, child: String },
}

impl ObjectiveEvent {
    /// The definition this event is about
    pub fn id(&self) -> &str {
        match self {
            ObjectiveEvent::ObjectiveAdded { id }
            | ObjectiveEvent::ObjectiveRemoved { id }
            | ObjectiveEvent::ObjectiveCompleted { id }
            | ObjectiveEvent::ObjectiveFailed { id }
            | ObjectiveEvent::ObjectiveIncremented { id, .. }
            | ObjectiveEvent::ObjectiveReset { id }
            | ObjectiveEvent::GroupAdded { id }
            | ObjectiveEvent::GroupRemoved { id }
            | ObjectiveEvent::GroupCompleted { id }
            | ObjectiveEvent::GroupFailed { id }
            | ObjectiveEvent::GroupReset { id } => id,
            ObjectiveEvent::ChildActivated { child, .. } => child,
        }
    }

    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            ObjectiveEvent::ObjectiveAdded { .. } => "objective_added",
            ObjectiveEvent::ObjectiveRemoved { .. } => "objective_removed",
            ObjectiveEvent::ObjectiveCompleted { .. } => "objective_completed",
            ObjectiveEvent::ObjectiveFailed { .. } => "objective_failed",
            ObjectiveEvent::ObjectiveIncremented { .. } => "objective_incremented",
            ObjectiveEvent::ObjectiveReset { .. } => "objective_reset",
            ObjectiveEvent::GroupAdded { .. } => "group_added",
            ObjectiveEvent::GroupRemoved { .. } => "group_removed",
            ObjectiveEvent::GroupCompleted { .. } => "group_completed",
            ObjectiveEvent::GroupFailed { .. } => "group_failed",
            ObjectiveEvent::GroupReset { .. } => "group_reset",
            ObjectiveEvent::ChildActivated { .. } => "child_activated",
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            ObjectiveEvent::ObjectiveCompleted { .. } | ObjectiveEvent::GroupCompleted { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ObjectiveEvent::ObjectiveFailed { .. } | ObjectiveEvent::GroupFailed { .. }
        )
    }

    pub fn is_added(&self) -> bool {
        matches!(
            self,
            ObjectiveEvent::ObjectiveAdded { .. } | ObjectiveEvent::GroupAdded { .. }
        )
    }

    pub fn is_removed(&self) -> bool {
        matches!(
            self,
            ObjectiveEvent::ObjectiveRemoved { .. } | ObjectiveEvent::GroupRemoved { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ObjectiveEvent::ObjectiveIncremented {
            id: "kill_slimes".into(),
            successes: 2,
            required: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "objective_incremented");
        assert_eq!(json["id"], "kill_slimes");
        assert_eq!(json["successes"], 2);
        assert_eq!(event.event_type(), "objective_incremented");
    }

    #[test]
    fn test_child_activated_reports_child() {
        let event = ObjectiveEvent::ChildActivated {
            group: "chapter".into(),
            child: "a".into(),
        };
        assert_eq!(event.id(), "a");
        assert!(!event.is_added());
    }
}
