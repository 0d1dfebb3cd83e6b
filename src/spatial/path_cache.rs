//! Memoized path sampling
//!
//! Interpolating a point along a long polyline is the hottest call in a
//! model full of path-following agents. Results are keyed by shape and the
//! distance rounded to a whole world unit, so 20.0 and 20.00001 share one
//! entry. The cache is append-only; the document's geometry must not change
//! for the lifetime of the world that owns it.

use ahash::AHashMap;

use crate::core::types::{ShapeId, Vec2};
use crate::spatial::document::SpatialDocument;

#[derive(Debug, Clone, Default)]
pub struct PathPointCache {
    points: AHashMap<(ShapeId, i64), Vec2>,
    lengths: AHashMap<ShapeId, f64>,
}

impl PathPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at `distance` along `shape`, or `None` for an unknown shape
    pub fn point_along(
        &mut self,
        document: &SpatialDocument,
        shape: ShapeId,
        distance: f64,
    ) -> Option<Vec2> {
        let rounded = distance.max(0.0).round() as i64;
        if let Some(point) = self.points.get(&(shape, rounded)) {
            return Some(*point);
        }
        let point = document.get(shape)?.point_at(rounded as f64);
        self.points.insert((shape, rounded), point);
        Some(point)
    }

    pub fn length_of(&mut self, document: &SpatialDocument, shape: ShapeId) -> Option<f64> {
        if let Some(length) = self.lengths.get(&shape) {
            return Some(*length);
        }
        let length = document.get(shape)?.length();
        self.lengths.insert(shape, length);
        Some(length)
    }

    /// Coarse closest point on a path to `target`, scanning every
    /// `precision` units. Returns the point and its fraction along the path.
    pub fn closest_point(
        &mut self,
        document: &SpatialDocument,
        shape: ShapeId,
        target: Vec2,
        precision: f64,
    ) -> Option<(Vec2, f64)> {
        let length = self.length_of(document, shape)?;
        let mut best = (self.point_along(document, shape, 0.0)?, 0.0);
        let mut best_distance = best.0.distance_sq(&target);

        let mut scan = precision;
        while scan <= length + precision {
            let along = scan.min(length);
            let point = self.point_along(document, shape, along)?;
            let d = point.distance_sq(&target);
            if d < best_distance {
                best = (point, along);
                best_distance = d;
            }
            if along >= length {
                break;
            }
            scan += precision;
        }

        let fraction = if length > 0.0 { best.1 / length } else { 0.0 };
        Some((best.0, fraction))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
