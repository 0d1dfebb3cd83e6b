//! Path and location lookups used by the movement tasks
//!
//! A miss (selector matches nothing, nothing within range) is `None`, never
//! an error: the requesting task simply retries on a later tick.

use ordered_float::OrderedFloat;
use rand::Rng;

use crate::core::types::{ShapeId, Vec2};
use crate::spatial::document::{Selector, SpatialDocument};
use crate::spatial::path_cache::PathPointCache;

/// Which of the matching shapes to pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Which {
    First,
    Index(usize),
    Random,
    Nearest,
    /// Pick at random among the k nearest
    AnyOfNearest(usize),
}

/// Where on a shape the agent starts or aims
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// Fraction along the path
    Percentage(f64),
    Random,
    /// Closest point on the path to the agent
    Nearest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathFilter {
    pub selector: Selector,
    pub which: Which,
    /// Maximum distance from the agent to the shape's anchor
    pub within: Option<f64>,
    pub at: Option<Anchor>,
}

impl PathFilter {
    pub fn new(selector: Selector) -> Self {
        Self { selector, which: Which::First, within: None, at: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationFilter {
    pub path: Option<PathFilter>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub random_offset: Option<f64>,
}

impl LocationFilter {
    pub fn point(x: f64, y: f64) -> Self {
        Self { path: None, x: Some(x), y: Some(y), random_offset: None }
    }
}

/// Result of a path lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSelection {
    pub shape: ShapeId,
    pub length: f64,
    pub start: Vec2,
    pub start_percentage: f64,
}

/// Shared inputs of every spatial query
pub struct SpatialQuery<'a, R: Rng> {
    pub document: &'a SpatialDocument,
    pub cache: &'a mut PathPointCache,
    pub rng: &'a mut R,
    pub scan_precision: f64,
}

impl<'a, R: Rng> SpatialQuery<'a, R> {
    /// Resolve `anchor` on `shape` to a point and fraction along it
    fn anchor_point(
        &mut self,
        shape: ShapeId,
        anchor: Option<Anchor>,
        origin: Vec2,
    ) -> Option<(Vec2, f64)> {
        let target = self.document.get(shape)?;
        if !target.is_path() {
            return Some((target.center(), 0.0));
        }
        let length = self.cache.length_of(self.document, shape)?;
        let fraction = match anchor {
            Some(Anchor::Percentage(p)) => p.clamp(0.0, 1.0),
            Some(Anchor::Random) => self.rng.gen::<f64>(),
            Some(Anchor::Nearest) => {
                return self
                    .cache
                    .closest_point(self.document, shape, origin, self.scan_precision)
            }
            None => 0.0,
        };
        let point = self.cache.point_along(self.document, shape, length * fraction)?;
        Some((point, fraction))
    }

    /// Select one matching shape, resolving its starting point
    pub fn select_path(&mut self, filter: &PathFilter, origin: Vec2) -> Option<PathSelection> {
        let matches = self.document.select(&filter.selector);
        if matches.is_empty() {
            return None;
        }

        let by_distance = matches!(filter.which, Which::Nearest | Which::AnyOfNearest(_))
            || filter.within.is_some();

        let (shape, anchor) = if by_distance {
            let keep = match filter.which {
                Which::AnyOfNearest(k) => k.max(1),
                _ => 1,
            };
            let within_sq = filter.within.map(|w| w * w).unwrap_or(f64::INFINITY);

            let mut candidates = Vec::with_capacity(matches.len());
            for shape in matches {
                let Some((point, fraction)) = self.anchor_point(shape, filter.at, origin) else {
                    continue;
                };
                let d = point.distance_sq(&origin);
                if d < within_sq {
                    candidates.push((OrderedFloat(d), shape, (point, fraction)));
                }
            }
            candidates.sort_by_key(|(d, shape, _)| (*d, shape.0));
            candidates.truncate(keep);
            if candidates.is_empty() {
                return None;
            }
            let pick = self.rng.gen_range(0..candidates.len());
            let (_, shape, anchor) = candidates.swap_remove(pick);
            (shape, Some(anchor))
        } else {
            let shape = match filter.which {
                Which::Index(i) => *matches.get(i)?,
                Which::Random => matches[self.rng.gen_range(0..matches.len())],
                _ => matches[0],
            };
            (shape, None)
        };

        let (start, start_percentage) = match anchor {
            Some(resolved) => resolved,
            None => self.anchor_point(shape, filter.at, origin)?,
        };
        let length = self.cache.length_of(self.document, shape)?;
        Some(PathSelection { shape, length, start, start_percentage })
    }

    /// Resolve a concrete point: a shape anchor, explicit coordinates, or
    /// both, then jittered by `random_offset`
    pub fn resolve_location(&mut self, filter: &LocationFilter, origin: Vec2) -> Option<Vec2> {
        let mut location = match &filter.path {
            Some(path) => self.select_path(path, origin)?.start,
            None => {
                if filter.x.is_none() && filter.y.is_none() {
                    return None;
                }
                origin
            }
        };
        if let Some(x) = filter.x {
            location.x = x;
        }
        if let Some(y) = filter.y {
            location.y = y;
        }
        if let Some(offset) = filter.random_offset.filter(|o| *o > 0.0) {
            location.x += self.rng.gen_range(-offset..offset);
            location.y += self.rng.gen_range(-offset..offset);
        }
        Some(location)
    }
}
