//! Compiled rule content: statements, antecedents and rules
//!
//! Content arrives as a generic data tree and is compiled once by
//! [`crate::rules::compile`]. Everything here is immutable at runtime and
//! shared between all agents of a species.

use crate::core::error::{OrganelleError, Result};
use crate::core::types::SiteId;
use crate::entity::tasks::Task;
use crate::rules::value::Value;

/// Which entity a fact or state check reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    World,
    Agent,
    /// The scope's default entity: the current agent, the candidate agent
    /// inside a `count` filter, or the world for world-level expressions
    Default,
}

/// A possibly dotted property reference such as `world.number` or `size`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    pub entity: EntityRef,
    pub property: String,
}

impl PropertyPath {
    pub fn parse(path: &str) -> Result<Self> {
        match path.split_once('.') {
            Some((prefix, property)) => {
                let entity = match prefix {
                    "world" => EntityRef::World,
                    "agent" => EntityRef::Agent,
                    other => return Err(OrganelleError::UnknownEntity(other.to_string())),
                };
                if property.is_empty() {
                    return Err(OrganelleError::malformed(format!(
                        "property reference '{}' has no property name",
                        path
                    )));
                }
                Ok(Self { entity, property: property.to_string() })
            }
            None => Ok(Self { entity: EntityRef::Default, property: path.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactRef {
    pub path: PropertyPath,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateCheck {
    pub entity: EntityRef,
    pub states: Vec<String>,
}

/// Filter for `count` statements. Empty fields match everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CountFilter {
    pub species: Option<String>,
    pub states: Vec<String>,
    pub rules: Vec<Antecedent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ratio {
    pub numerator: Statement,
    pub denominator: Statement,
}

/// A memoized boolean draw
#[derive(Debug, Clone, PartialEq)]
pub struct RandomDraw {
    pub site: SiteId,
    pub probability: f64,
    /// Redraw every tick instead of once per state visit
    pub fresh: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Literal(Value),
    Fact(FactRef),
    State(StateCheck),
    Count(CountFilter),
    Ratio(Box<Ratio>),
    Random(RandomDraw),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    Equals(Value),
    LessThan(f64),
    GreaterThan(f64),
    /// Half-open `[low, high)`
    Between(f64, f64),
}

impl Comparator {
    pub fn compare(&self, value: &Value) -> bool {
        match self {
            Comparator::Equals(expected) => value.loosely_equals(expected),
            Comparator::LessThan(bound) => value.as_number() < *bound,
            Comparator::GreaterThan(bound) => value.as_number() > *bound,
            Comparator::Between(low, high) => {
                let n = value.as_number();
                n >= *low && n < *high
            }
        }
    }
}

/// A statement with at most one comparator
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub statement: Statement,
    pub comparator: Option<Comparator>,
}

impl Expression {
    pub fn new(statement: Statement) -> Self {
        Self { statement, comparator: None }
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Antecedent {
    Always,
    All(Vec<Antecedent>),
    Any(Vec<Antecedent>),
    Check(Expression),
}

/// Where a triggered rule's consequences go
#[derive(Debug, Clone, PartialEq)]
pub enum Consequent {
    Tasks(TaskBundle),
    Rule(Box<Rule>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub condition: Antecedent,
    pub then: Vec<Consequent>,
    pub otherwise: Vec<Consequent>,
}

/// One consequent's worth of tasks
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskBundle {
    pub switch_state: Option<String>,
    pub tasks: Vec<Task>,
    /// Interpreted in the same tick once a task of this bundle completes
    pub finally: Option<Box<TaskBundle>>,
}

impl TaskBundle {
    /// Every state this bundle (and its `finally` chain) may switch to
    pub fn switch_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.switch_state.iter().map(String::as_str).collect();
        if let Some(finally) = &self.finally {
            targets.extend(finally.switch_targets());
        }
        targets
    }
}

impl Rule {
    /// Every state any branch of this rule may switch to, nested rules included
    pub fn switch_targets(&self) -> Vec<&str> {
        self.then
            .iter()
            .chain(self.otherwise.iter())
            .flat_map(|c| match c {
                Consequent::Tasks(bundle) => bundle.switch_targets(),
                Consequent::Rule(rule) => rule.switch_targets(),
            })
            .collect()
    }
}

/// A derived property recomputed on a fixed period
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedProperty {
    pub name: String,
    pub expression: Expression,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_property_path_prefixes() {
        let p = PropertyPath::parse("world.x").unwrap();
        assert_eq!(p.entity, EntityRef::World);
        assert_eq!(p.property, "x");

        let p = PropertyPath::parse("agent.size").unwrap();
        assert_eq!(p.entity, EntityRef::Agent);

        let p = PropertyPath::parse("speed").unwrap();
        assert_eq!(p.entity, EntityRef::Default);
    }

    #[test]
    fn test_property_path_unknown_entity() {
        let err = PropertyPath::parse("cell.size").unwrap_err();
        assert!(matches!(err, OrganelleError::UnknownEntity(ref e) if e == "cell"));
    }

    #[test]
    fn test_between_is_half_open() {
        let c = Comparator::Between(5.0, 6.0);
        assert!(c.compare(&Value::from(5)));
        assert!(!c.compare(&Value::from(6)));
        assert!(!c.compare(&Value::from(7)));
        assert!(!Comparator::Between(3.0, 5.0).compare(&Value::from(5)));
    }

    #[test]
    fn test_comparisons_with_nan_are_false() {
        let v = Value::from("not a number");
        assert!(!Comparator::LessThan(1.0).compare(&v));
        assert!(!Comparator::GreaterThan(1.0).compare(&v));
        assert!(!Comparator::Between(-1.0, 1.0).compare(&v));
    }

    proptest! {
        #[test]
        fn prop_strict_comparators(n in -1000.0f64..1000.0, bound in -1000.0f64..1000.0) {
            let v = Value::Number(n);
            prop_assert_eq!(Comparator::GreaterThan(bound).compare(&v), n > bound);
            prop_assert_eq!(Comparator::LessThan(bound).compare(&v), n < bound);
            prop_assert!(!Comparator::GreaterThan(n).compare(&v));
            prop_assert!(!Comparator::LessThan(n).compare(&v));
        }

        #[test]
        fn prop_between_includes_low_excludes_high(low in -1000.0f64..1000.0, width in 0.001f64..100.0) {
            let high = low + width;
            prop_assert!(Comparator::Between(low, high).compare(&Value::Number(low)));
            prop_assert!(!Comparator::Between(low, high).compare(&Value::Number(high)));
        }
    }
}
