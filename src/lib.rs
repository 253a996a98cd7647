//! Hierarchical objective tracking: objectives, objective groups and the
//! manager that drives them.

pub mod config;
pub mod error;
pub mod objective;
pub mod runner;

pub use config::EngineConfig;
pub use error::{ObjectiveError, Result};
pub use objective::{
    Definition, DefinitionCatalog, Objective, ObjectiveEvent, ObjectiveGroup, ObjectiveManager,
};
