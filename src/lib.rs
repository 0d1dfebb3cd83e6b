//! Organelle - declarative rule-driven agent simulation core

pub mod core;
pub mod ecs;
pub mod entity;
pub mod rules;
pub mod simulation;
pub mod spatial;
