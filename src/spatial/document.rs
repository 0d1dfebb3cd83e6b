//! The world's spatial document: the shapes agents spawn on, follow and
//! bounce off.
//!
//! Parsing a vector image into shapes is the host's job. The document only
//! keeps the geometry plus the id/class names selectors match against.

use geo::{EuclideanLength, Intersects, LineInterpolatePoint};
use geo_types::{Coord, Line, LineString};

use crate::core::types::{ShapeId, Vec2};

/// Segments used to approximate a circle outline
const CIRCLE_SEGMENTS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Circle { center: Vec2, radius: f64 },
    Rect { origin: Vec2, width: f64, height: f64 },
    Path(LineString<f64>),
}

/// One element of the document
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub ancestor_ids: Vec<String>,
    pub ancestor_classes: Vec<String>,
    pub geometry: Geometry,
}

impl Shape {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: None,
            classes: Vec::new(),
            ancestor_ids: Vec::new(),
            ancestor_classes: Vec::new(),
            geometry,
        }
    }

    pub fn path(points: &[(f64, f64)]) -> Self {
        Self::new(Geometry::Path(LineString::from(points.to_vec())))
    }

    pub fn circle(cx: f64, cy: f64, radius: f64) -> Self {
        Self::new(Geometry::Circle { center: Vec2::new(cx, cy), radius })
    }

    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(Geometry::Rect { origin: Vec2::new(x, y), width, height })
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    /// Record an enclosing group, as `<g id=... class=...>` would
    pub fn within_group(mut self, id: Option<&str>, classes: &[&str]) -> Self {
        if let Some(id) = id {
            self.ancestor_ids.push(id.to_string());
        }
        self.ancestor_classes.extend(classes.iter().map(|c| c.to_string()));
        self
    }

    pub fn is_path(&self) -> bool {
        matches!(self.geometry, Geometry::Path(_))
    }

    /// Length along the shape; zero for anything but paths
    pub fn length(&self) -> f64 {
        match &self.geometry {
            Geometry::Path(line) => line.euclidean_length(),
            _ => 0.0,
        }
    }

    /// Centre of circles and rects, start of paths
    pub fn center(&self) -> Vec2 {
        match &self.geometry {
            Geometry::Circle { center, .. } => *center,
            Geometry::Rect { origin, width, height } => {
                Vec2::new(origin.x + width / 2.0, origin.y + height / 2.0)
            }
            Geometry::Path(line) => line
                .0
                .first()
                .map(|c| Vec2::new(c.x, c.y))
                .unwrap_or_default(),
        }
    }

    /// Point at `distance` along a path, clamped to the path. Other shapes
    /// answer with their centre.
    pub fn point_at(&self, distance: f64) -> Vec2 {
        match &self.geometry {
            Geometry::Path(line) => {
                let length = line.euclidean_length();
                if length <= 0.0 {
                    return self.center();
                }
                let fraction = (distance / length).clamp(0.0, 1.0);
                line.line_interpolate_point(fraction)
                    .map(Vec2::from)
                    .unwrap_or_else(|| self.center())
            }
            _ => self.center(),
        }
    }

    /// Closed outline used for crossing tests
    pub fn outline(&self) -> LineString<f64> {
        match &self.geometry {
            Geometry::Path(line) => line.clone(),
            Geometry::Rect { origin, width, height } => LineString::from(vec![
                (origin.x, origin.y),
                (origin.x + width, origin.y),
                (origin.x + width, origin.y + height),
                (origin.x, origin.y + height),
                (origin.x, origin.y),
            ]),
            Geometry::Circle { center, radius } => {
                let coords: Vec<Coord<f64>> = (0..=CIRCLE_SEGMENTS)
                    .map(|i| {
                        let angle = std::f64::consts::TAU * i as f64 / CIRCLE_SEGMENTS as f64;
                        (*center + Vec2::from_heading(angle, *radius)).into()
                    })
                    .collect();
                LineString::new(coords)
            }
        }
    }

    /// Whether the segment `from -> to` crosses this shape's outline
    pub fn crosses(&self, from: Vec2, to: Vec2) -> bool {
        Line::new(Coord::from(from), Coord::from(to)).intersects(&self.outline())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorPart {
    Id(String),
    Class(String),
}

/// Simplified CSS selector: comma-separated `#id` and `.class` variants.
///
/// A variant matches the shape's own id/classes or those of any enclosing
/// group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    parts: Vec<SelectorPart>,
}

impl Selector {
    /// Returns `None` when no variant is a `#id` or `.class`
    pub fn parse(source: &str) -> Option<Self> {
        let parts: Vec<SelectorPart> = source
            .split(',')
            .map(str::trim)
            .filter_map(|variant| {
                if let Some(id) = variant.strip_prefix('#') {
                    (!id.is_empty()).then(|| SelectorPart::Id(id.to_string()))
                } else if let Some(class) = variant.strip_prefix('.') {
                    (!class.is_empty()).then(|| SelectorPart::Class(class.to_string()))
                } else {
                    None
                }
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(Self { source: source.to_string(), parts })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, shape: &Shape) -> bool {
        self.parts.iter().any(|part| match part {
            SelectorPart::Id(id) => {
                shape.id.as_deref() == Some(id.as_str()) || shape.ancestor_ids.contains(id)
            }
            SelectorPart::Class(class) => {
                shape.classes.contains(class) || shape.ancestor_classes.contains(class)
            }
        })
    }
}

/// Queryable collection of shapes, in document order
#[derive(Debug, Clone, Default)]
pub struct SpatialDocument {
    shapes: Vec<Shape>,
}

impl SpatialDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, shape: Shape) -> ShapeId {
        self.shapes.push(shape);
        ShapeId(self.shapes.len() - 1)
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.add(shape);
        self
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// All shapes matching `selector`, in document order
    pub fn select(&self, selector: &Selector) -> Vec<ShapeId> {
        self.shapes
            .iter()
            .enumerate()
            .filter(|(_, shape)| selector.matches(shape))
            .map(|(i, _)| ShapeId(i))
            .collect()
    }

    /// Whether moving `from -> to` would cross any shape matching `selector`
    pub fn crosses(&self, selector: &Selector, from: Vec2, to: Vec2) -> bool {
        self.shapes
            .iter()
            .filter(|shape| selector.matches(shape))
            .any(|shape| shape.crosses(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> SpatialDocument {
        SpatialDocument::new()
            .with_shape(
                Shape::path(&[(0.0, 0.0), (100.0, 0.0)])
                    .with_id("tubule_a")
                    .within_group(Some("microtubules"), &["tracks"]),
            )
            .with_shape(
                Shape::path(&[(0.0, 50.0), (0.0, 150.0)])
                    .with_id("tubule_b")
                    .within_group(Some("microtubules"), &["tracks"]),
            )
            .with_shape(Shape::circle(500.0, 500.0, 40.0).with_id("nucleus").with_class("organelle"))
    }

    #[test]
    fn test_selector_parse() {
        assert!(Selector::parse("#a, .b").is_some());
        assert!(Selector::parse("path").is_none());
        assert!(Selector::parse("#").is_none());
    }

    #[test]
    fn test_select_by_id_class_and_ancestors() {
        let doc = sample_document();
        let by_id = Selector::parse("#nucleus").unwrap();
        assert_eq!(doc.select(&by_id), vec![ShapeId(2)]);

        let by_ancestor = Selector::parse("#microtubules").unwrap();
        assert_eq!(doc.select(&by_ancestor), vec![ShapeId(0), ShapeId(1)]);

        let by_class = Selector::parse(".organelle, #tubule_b").unwrap();
        assert_eq!(doc.select(&by_class), vec![ShapeId(1), ShapeId(2)]);
    }

    #[test]
    fn test_path_length_and_points() {
        let doc = sample_document();
        let path = doc.get(ShapeId(0)).unwrap();
        assert!((path.length() - 100.0).abs() < 1e-9);
        assert_eq!(path.point_at(25.0), Vec2::new(25.0, 0.0));
        assert_eq!(path.point_at(-5.0), Vec2::new(0.0, 0.0));
        assert_eq!(path.point_at(500.0), Vec2::new(100.0, 0.0));
    }

    #[test]
    fn test_non_path_shapes_answer_with_center() {
        let rect = Shape::rect(10.0, 10.0, 20.0, 40.0);
        assert_eq!(rect.length(), 0.0);
        assert_eq!(rect.point_at(12.0), Vec2::new(20.0, 30.0));
    }

    #[test]
    fn test_crossing_outline() {
        let doc = sample_document();
        let tracks = Selector::parse(".tracks").unwrap();
        assert!(doc.crosses(&tracks, Vec2::new(50.0, -10.0), Vec2::new(50.0, 10.0)));
        assert!(!doc.crosses(&tracks, Vec2::new(50.0, 10.0), Vec2::new(60.0, 20.0)));

        let nucleus = Selector::parse("#nucleus").unwrap();
        assert!(doc.crosses(&nucleus, Vec2::new(500.0, 500.0), Vec2::new(600.0, 500.0)));
        assert!(!doc.crosses(&nucleus, Vec2::new(500.0, 500.0), Vec2::new(510.0, 500.0)));
    }
}
