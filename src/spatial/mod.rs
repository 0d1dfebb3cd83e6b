//! Spatial document, selectors and path queries

pub mod document;
pub mod path_cache;
pub mod query;

pub use document::{Geometry, Selector, Shape, SpatialDocument};
pub use path_cache::PathPointCache;
pub use query::{Anchor, LocationFilter, PathFilter, PathSelection, SpatialQuery, Which};
