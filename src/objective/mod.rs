//! Objective System Module
//!
//! Objectives count successes toward a threshold; groups aggregate child
//! objectives and groups in parallel or in sequence. Definitions load from
//! TOML and the manager drives live state from explicit calls and a
//! fixed-rate tick.

pub mod catalog;
pub mod condition;
pub mod definition;
pub mod events;
pub mod manager;
pub mod state;
pub mod tracker;

pub use catalog::DefinitionCatalog;
pub use condition::{Condition, ConditionSpec, PollMethod};
pub use definition::{Definition, Objective, ObjectiveGroup};
pub use events::ObjectiveEvent;
pub use manager::{ListenerId, ObjectiveManager};
pub use state::{ChildState, GroupState, ObjectiveState, ProgressSnapshot, StateId, StateNode, Status};
pub use tracker::{ObjectiveSet, ObjectiveWatch, SetOutcome};
