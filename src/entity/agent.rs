//! Agents: one live instance of a species
//!
//! An agent owns its property bag, its state label and the progress of any
//! multi-tick task. It is only ever mutated by its own [`Agent::step`] (or
//! directly by the host between ticks).

use std::cell::RefCell;
use std::sync::Arc;

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::core::error::{OrganelleError, Result};
use crate::core::types::{AgentId, SiteId, Tick, Vec2};
use crate::ecs::world::StepContext;
use crate::entity::properties::{PropertyHolder, PropertyMap};
use crate::entity::species::Species;
use crate::entity::tasks::{ReferenceCache, ReferenceKey};
use crate::rules::statement::TaskBundle;
use crate::rules::value::Value;
use crate::simulation::rule_eval::{select_consequents, Scope};
use crate::simulation::task_exec::run_task;

/// Key of a memoized random draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DrawKey {
    site: SiteId,
    generation: u32,
    /// Set for draws that are redrawn every tick
    tick: Option<Tick>,
}

#[derive(Debug)]
struct DrawTable {
    rng: ChaCha8Rng,
    memo: AHashMap<DrawKey, bool>,
}

#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    species: Arc<Species>,
    holder: PropertyHolder,
    state: String,
    state_generation: u32,
    dead: bool,
    references: ReferenceCache,
    // Draws happen during read-only rule evaluation
    draws: RefCell<DrawTable>,
}

/// Properties every agent has unless its species says otherwise
fn base_defaults(position: Vec2) -> PropertyMap {
    let mut defaults = PropertyMap::new();
    defaults.insert("x".into(), Value::Number(position.x));
    defaults.insert("y".into(), Value::Number(position.y));
    defaults.insert("size".into(), Value::Number(1.0));
    defaults.insert("speed".into(), Value::Number(1.0));
    defaults.insert("direction".into(), Value::Number(0.0));
    defaults
}

impl Agent {
    pub(crate) fn new(id: AgentId, species: Arc<Species>, position: Vec2, world_seed: u64) -> Self {
        let defaults = PropertyHolder::new(&species.defaults, &base_defaults(position));
        let holder = PropertyHolder::new(&species.properties, defaults.props());
        let seed = world_seed ^ id.0.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);

        Self {
            id,
            state: species.initial_state.clone(),
            species,
            holder,
            state_generation: 0,
            dead: false,
            references: ReferenceCache::new(),
            draws: RefCell::new(DrawTable {
                rng: ChaCha8Rng::seed_from_u64(seed),
                memo: AHashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn species(&self) -> &Arc<Species> {
        &self.species
    }

    pub fn species_name(&self) -> &str {
        &self.species.name
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Number of state switches so far
    pub fn state_generation(&self) -> u32 {
        self.state_generation
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn kill(&mut self) {
        self.dead = true;
    }

    pub fn props(&self) -> &PropertyMap {
        self.holder.props()
    }

    pub fn property(&self, name: &str) -> Value {
        self.holder.get(name)
    }

    pub fn number(&self, name: &str) -> f64 {
        self.holder.number(name)
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.holder.set(name, value)
    }

    pub fn set_properties<I, K>(&mut self, properties: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.holder.set_many(properties)
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.number("x"), self.number("y"))
    }

    pub(crate) fn set_position(&mut self, position: Vec2) {
        self.holder.write("x", position.x);
        self.holder.write("y", position.y);
    }

    pub(crate) fn set_heading(&mut self, heading: f64) {
        self.holder.write("direction", heading);
    }

    pub(crate) fn write_calculated(&mut self, name: &str, value: Value) {
        self.holder.write_calculated(name, value);
    }

    /// Move to a declared state. Every call starts a new state generation,
    /// even when `state` equals the current one.
    pub fn switch_state(&mut self, state: &str) -> Result<()> {
        if !self.species.declares_state(state) {
            return Err(OrganelleError::UndeclaredState {
                species: self.species.name.clone(),
                state: state.to_string(),
            });
        }
        trace!(agent = %self.id, from = %self.state, to = state, "switch state");
        self.state = state.to_string();
        self.state_generation += 1;

        let generation = self.state_generation;
        self.references.retain_generation(generation);
        self.draws.get_mut().memo.retain(|k, _| k.generation >= generation);
        Ok(())
    }

    pub(crate) fn reference_key(&self, site: SiteId) -> ReferenceKey {
        ReferenceKey { site, generation: self.state_generation }
    }

    pub(crate) fn references(&self) -> &ReferenceCache {
        &self.references
    }

    pub(crate) fn references_mut(&mut self) -> &mut ReferenceCache {
        &mut self.references
    }

    pub(crate) fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.draws.get_mut().rng
    }

    /// Memoized boolean draw for a `random` statement
    pub(crate) fn draw(&self, site: SiteId, probability: f64, fresh_at: Option<Tick>) -> bool {
        let key = DrawKey { site, generation: self.state_generation, tick: fresh_at };
        let mut table = self.draws.borrow_mut();
        if let Some(value) = table.memo.get(&key) {
            return *value;
        }
        let p = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        let value = table.rng.gen_bool(p);
        if fresh_at.is_some() {
            table.memo.retain(|k, _| k.site != site || k.tick.is_none() || k.tick == fresh_at);
        }
        table.memo.insert(key, value);
        value
    }

    /// Evaluate this tick's rules and run the resulting tasks
    pub(crate) fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        if self.dead {
            return Ok(());
        }
        let species = Arc::clone(&self.species);

        let bundles = {
            let scope = Scope::for_agent(&*ctx.world, ctx.others.with_current(self), self);
            select_consequents(&species.rules, &self.state, &scope, ctx.config.max_nested_rules)?
        };

        for bundle in bundles {
            self.run_bundle(bundle, ctx)?;
        }

        if species.die_when_exiting_world && !ctx.world.bounds().contains(self.position()) {
            debug!(agent = %self.id, species = %species.name, "left the world");
            self.dead = true;
        }
        Ok(())
    }

    fn run_bundle(&mut self, bundle: &TaskBundle, ctx: &mut StepContext<'_>) -> Result<()> {
        if let Some(state) = &bundle.switch_state {
            self.switch_state(state)?;
        }

        let mut completed = false;
        for task in &bundle.tasks {
            if run_task(self, task, ctx)? {
                completed = true;
            }
        }

        if completed {
            if let Some(finally) = &bundle.finally {
                self.run_bundle(finally, ctx)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::species::RuleTable;

    fn agent(id: u64) -> Agent {
        let species = Species::new("species1")
            .with_rules(RuleTable::new().with_state("state1", vec![]).with_state("state2", vec![]));
        Agent::new(AgentId(id), Arc::new(species), Vec2::new(5.0, 6.0), 42)
    }

    #[test]
    fn test_new_agent_has_base_properties() {
        let a = agent(0);
        assert_eq!(a.position(), Vec2::new(5.0, 6.0));
        assert_eq!(a.number("size"), 1.0);
        assert_eq!(a.number("speed"), 1.0);
        assert_eq!(a.state(), "initialization");
        assert_eq!(a.state_generation(), 0);
    }

    #[test]
    fn test_species_properties_override_base() {
        let mut species = Species::new("slow");
        species.defaults.insert("speed".into(), Value::from(0.5));
        species.properties.insert("size".into(), Value::from(0.1));
        let a = Agent::new(AgentId(1), Arc::new(species), Vec2::default(), 1);
        assert_eq!(a.number("speed"), 0.5);
        assert_eq!(a.number("size"), 0.1);
    }

    #[test]
    fn test_switch_state_counts_every_switch() {
        let mut a = agent(0);
        a.switch_state("state1").unwrap();
        a.switch_state("state1").unwrap();
        a.switch_state("state2").unwrap();
        assert_eq!(a.state(), "state2");
        assert_eq!(a.state_generation(), 3);
    }

    #[test]
    fn test_switch_to_undeclared_state_fails() {
        let mut a = agent(0);
        assert!(matches!(
            a.switch_state("nowhere"),
            Err(OrganelleError::UndeclaredState { .. })
        ));
        assert_eq!(a.state_generation(), 0);
    }

    #[test]
    fn test_draws_are_memoized_per_state_visit() {
        let mut a = agent(3);
        let first = a.draw(SiteId(9), 0.5, None);
        for _ in 0..20 {
            assert_eq!(a.draw(SiteId(9), 0.5, None), first);
        }
        a.switch_state("state1").unwrap();
        // Certain outcomes are unaffected by which value gets drawn
        assert!(a.draw(SiteId(9), 1.0, None));
        assert!(!a.draw(SiteId(10), 0.0, None));
    }

    #[test]
    fn test_fresh_draws_are_stable_within_a_tick() {
        let a = agent(4);
        let first = a.draw(SiteId(1), 0.5, Some(7));
        assert_eq!(a.draw(SiteId(1), 0.5, Some(7)), first);
    }
}
