//! Species templates: defaults, rule tables and spawn policy

use ahash::AHashMap;

use crate::core::error::{OrganelleError, Result};
use crate::core::types::Tick;
use crate::entity::properties::PropertyMap;
use crate::rules::statement::{CalculatedProperty, Rule};
use crate::spatial::query::LocationFilter;

/// Rule key evaluated in every state
pub const ALWAYS: &str = "always";

/// Entry state when a species does not name one
pub const DEFAULT_INITIAL_STATE: &str = "initialization";

/// Rules keyed by state, plus the `always` list
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    always: Vec<Rule>,
    by_state: AHashMap<String, Vec<Rule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_always(mut self, rules: Vec<Rule>) -> Self {
        self.always = rules;
        self
    }

    /// Declare a state; an empty rule list still makes it a valid target
    pub fn with_state(mut self, state: &str, rules: Vec<Rule>) -> Self {
        self.by_state.insert(state.to_string(), rules);
        self
    }

    pub fn declares(&self, state: &str) -> bool {
        self.by_state.contains_key(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.by_state.keys().map(String::as_str)
    }

    /// `always` rules followed by the rules of `state`, in declaration order
    pub fn applicable<'a>(&'a self, state: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        let state_rules = self.by_state.get(state).map(Vec::as_slice).unwrap_or(&[]);
        self.always.iter().chain(state_rules.iter())
    }

    fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.always.iter().chain(self.by_state.values().flatten())
    }
}

/// When and where a species spawns on its own
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPolicy {
    /// Spawn on the first tick
    pub start: bool,
    /// Spawn every N ticks
    pub every: Option<Tick>,
    /// Placement; defaults to the world centre
    pub location: Option<LocationFilter>,
}

impl SpawnPolicy {
    pub fn every(ticks: Tick) -> Self {
        Self { start: false, every: Some(ticks), location: None }
    }

    pub fn at_start() -> Self {
        Self { start: true, every: None, location: None }
    }

    /// Tick after which the first spawn happens, `None` if never
    pub fn first_spawn(&self) -> Option<Tick> {
        if self.start {
            Some(0)
        } else {
            self.every
        }
    }
}

/// Immutable definition of a kind of agent
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub properties: PropertyMap,
    pub defaults: PropertyMap,
    pub initial_state: String,
    pub spawn: Option<SpawnPolicy>,
    pub rules: RuleTable,
    /// Read-only per-agent properties, refreshed with the world's
    pub calculated: Vec<CalculatedProperty>,
    pub die_when_exiting_world: bool,
    /// Visual metadata for the rendering layer; never read by the engine
    pub view: serde_json::Value,
}

impl Species {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: PropertyMap::new(),
            defaults: PropertyMap::new(),
            initial_state: DEFAULT_INITIAL_STATE.to_string(),
            spawn: None,
            rules: RuleTable::new(),
            calculated: Vec::new(),
            die_when_exiting_world: true,
            view: serde_json::Value::Null,
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_initial_state(mut self, state: &str) -> Self {
        self.initial_state = state.to_string();
        self
    }

    pub fn with_spawn(mut self, spawn: SpawnPolicy) -> Self {
        self.spawn = Some(spawn);
        self
    }

    pub fn with_calculated(mut self, properties: Vec<CalculatedProperty>) -> Self {
        self.calculated = properties;
        self
    }

    /// Valid `switch_state` targets: declared rule states and the entry state
    pub fn declares_state(&self, state: &str) -> bool {
        self.rules.declares(state) || self.initial_state == state
    }

    /// Check that every `switch_state` in the rule table names a declared state
    pub fn validate(&self) -> Result<()> {
        for rule in self.rules.all_rules() {
            for target in rule.switch_targets() {
                if !self.declares_state(target) {
                    return Err(OrganelleError::UndeclaredState {
                        species: self.name.clone(),
                        state: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::statement::{Antecedent, Consequent, TaskBundle};

    fn switch_rule(target: &str) -> Rule {
        Rule {
            condition: Antecedent::Always,
            then: vec![Consequent::Tasks(TaskBundle {
                switch_state: Some(target.to_string()),
                ..TaskBundle::default()
            })],
            otherwise: vec![],
        }
    }

    #[test]
    fn test_applicable_puts_always_first() {
        let table = RuleTable::new()
            .with_always(vec![switch_rule("a")])
            .with_state("a", vec![switch_rule("b"), switch_rule("a")])
            .with_state("b", vec![]);
        assert_eq!(table.applicable("a").count(), 3);
        assert_eq!(table.applicable("b").count(), 1);
        assert_eq!(table.applicable("missing").count(), 1);
    }

    #[test]
    fn test_validate_rejects_undeclared_switch() {
        let species = Species::new("melanosome")
            .with_rules(RuleTable::new().with_state("initialization", vec![switch_rule("gone")]));
        let err = species.validate().unwrap_err();
        assert!(matches!(err, OrganelleError::UndeclaredState { ref state, .. } if state == "gone"));
    }

    #[test]
    fn test_initial_state_is_always_declared() {
        let species = Species::new("dot").with_initial_state("drifting");
        assert!(species.declares_state("drifting"));
        assert!(!species.declares_state("parked"));
    }

    #[test]
    fn test_spawn_schedule() {
        assert_eq!(SpawnPolicy::at_start().first_spawn(), Some(0));
        assert_eq!(SpawnPolicy::every(20).first_spawn(), Some(20));
    }
}
