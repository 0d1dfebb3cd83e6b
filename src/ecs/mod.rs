pub mod world;

pub use world::{Population, World, WorldState};
