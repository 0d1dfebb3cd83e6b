//! Task catalogue and resumable task progress

use ahash::AHashMap;

use crate::core::types::{ShapeId, SiteId, Tick, Vec2};
use crate::rules::statement::{EntityRef, Statement};
use crate::spatial::document::Selector;
use crate::spatial::query::{LocationFilter, PathFilter};

/// One unit of agent mutation requested by a rule's consequent
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub site: SiteId,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// `grow` and `change`
    Change(ChangeTask),
    MoveTo(LocationFilter),
    Follow(FollowTask),
    Diffuse(DiffuseTask),
    Wait(WaitDuration),
    Die(Statement),
    Notify(String),
    Set(Vec<Assignment>),
    SetImageSelector(String),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Change(_) => "change",
            TaskKind::MoveTo(_) => "move_to",
            TaskKind::Follow(_) => "follow",
            TaskKind::Diffuse(_) => "diffuse",
            TaskKind::Wait(_) => "wait",
            TaskKind::Die(_) => "die",
            TaskKind::Notify(_) => "notify",
            TaskKind::Set(_) => "set",
            TaskKind::SetImageSelector(_) => "set_image_selector",
        }
    }
}

/// Additive property change, optionally clamped at a bound
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeTask {
    pub property: String,
    pub by: f64,
    pub until: Option<f64>,
}

impl ChangeTask {
    /// Returns the new value and whether the bound was reached
    pub fn apply(&self, current: f64) -> (f64, bool) {
        let next = current + self.by;
        match self.until {
            Some(bound) if self.by >= 0.0 => {
                if next >= bound {
                    (bound, true)
                } else {
                    (next, false)
                }
            }
            Some(bound) => {
                if next <= bound {
                    (bound, true)
                } else {
                    (next, false)
                }
            }
            None => (next, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDirection {
    Forward,
    Backward,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowTask {
    pub path: PathFilter,
    pub direction: FollowDirection,
    /// Fraction of the path at which the task completes
    pub until: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffuseTask {
    /// Overrides the agent's `speed`
    pub speed: Option<f64>,
    /// Shapes the random walk may not cross
    pub bounding_paths: Option<Selector>,
    pub duration: Option<Tick>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDuration {
    Ticks(Tick),
    Forever,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelativeOp {
    Multiply,
    Divide,
    Add,
    Subtract,
}

impl RelativeOp {
    pub fn apply(self, current: f64, operand: f64) -> f64 {
        match self {
            RelativeOp::Multiply => current * operand,
            RelativeOp::Divide => current / operand,
            RelativeOp::Add => current + operand,
            RelativeOp::Subtract => current - operand,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignedValue {
    Absolute(Statement),
    Relative(RelativeOp, f64),
}

/// One `set` target, `world.prop` or an agent property
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: EntityRef,
    pub property: String,
    pub value: AssignedValue,
}

/// State a multi-tick task keeps between ticks
#[derive(Debug, Clone, PartialEq)]
pub enum TaskProgress {
    MoveTo { target: Vec2 },
    Follow(FollowState),
    Diffuse { started: Tick },
    Wait { started: Tick },
    Notified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowState {
    pub shape: ShapeId,
    pub length: f64,
    pub distance: f64,
    /// +1 forward, -1 backward
    pub sign: f64,
    /// Distance at which the task completes
    pub until: f64,
}

impl FollowState {
    /// Advance by `speed`; returns true once `until` is reached
    pub fn advance(&mut self, speed: f64) -> bool {
        self.distance += speed * self.sign;
        let reached = if self.sign > 0.0 {
            self.distance >= self.until
        } else {
            self.distance <= self.until
        };
        if reached {
            self.distance = self.until;
        }
        reached
    }
}

/// Reference cache key. The state generation makes progress from an earlier
/// state visit unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceKey {
    pub site: SiteId,
    pub generation: u32,
}

/// Per-agent store of in-progress task state
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    entries: AHashMap<ReferenceKey, TaskProgress>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ReferenceKey) -> Option<&TaskProgress> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ReferenceKey) -> Option<&mut TaskProgress> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: ReferenceKey, progress: TaskProgress) {
        self.entries.insert(key, progress);
    }

    pub fn remove(&mut self, key: &ReferenceKey) -> Option<TaskProgress> {
        self.entries.remove(key)
    }

    /// Drop progress from state generations before `generation`
    pub fn retain_generation(&mut self, generation: u32) {
        self.entries.retain(|k, _| k.generation >= generation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_clamps_upward() {
        let grow = ChangeTask { property: "size".into(), by: 0.25, until: Some(1.0) };
        assert_eq!(grow.apply(0.5), (0.75, false));
        assert_eq!(grow.apply(0.875), (1.0, true));
    }

    #[test]
    fn test_change_clamps_downward() {
        let shrink = ChangeTask { property: "size".into(), by: -0.5, until: Some(0.0) };
        assert_eq!(shrink.apply(1.0), (0.5, false));
        assert_eq!(shrink.apply(0.25), (0.0, true));
    }

    #[test]
    fn test_change_without_bound_never_completes() {
        let drift = ChangeTask { property: "charge".into(), by: 1.0, until: None };
        assert_eq!(drift.apply(100.0), (101.0, false));
    }

    #[test]
    fn test_follow_state_backward_stops_at_until() {
        let mut state = FollowState {
            shape: ShapeId(0),
            length: 10.0,
            distance: 3.0,
            sign: -1.0,
            until: 0.0,
        };
        assert!(!state.advance(2.0));
        assert!(state.advance(2.0));
        assert_eq!(state.distance, 0.0);
    }

    #[test]
    fn test_reference_cache_drops_old_generations() {
        let mut cache = ReferenceCache::new();
        cache.insert(ReferenceKey { site: SiteId(1), generation: 0 }, TaskProgress::Notified);
        cache.insert(ReferenceKey { site: SiteId(1), generation: 1 }, TaskProgress::Wait { started: 4 });
        cache.retain_generation(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&ReferenceKey { site: SiteId(1), generation: 0 }).is_none());
    }

    #[test]
    fn test_relative_ops() {
        assert_eq!(RelativeOp::Multiply.apply(0.8, 0.5), 0.4);
        assert_eq!(RelativeOp::Subtract.apply(3.0, 1.0), 2.0);
    }
}
