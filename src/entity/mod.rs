//! Agents, species templates, property bags and the task catalogue

pub mod agent;
pub mod properties;
pub mod species;
pub mod tasks;

pub use agent::Agent;
pub use properties::{overlay, PropertyHolder, PropertyMap};
pub use species::{RuleTable, SpawnPolicy, Species};
pub use tasks::{Task, TaskKind, TaskProgress};
