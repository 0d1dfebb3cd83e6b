//! World - owns the population, the clock and the spatial document

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::core::config::ModelConfig;
use crate::core::error::{OrganelleError, Result};
use crate::core::types::{AgentId, Bounds, ShapeId, Tick, Vec2};
use crate::entity::agent::Agent;
use crate::entity::properties::{PropertyHolder, PropertyMap};
use crate::entity::species::Species;
use crate::rules::statement::CalculatedProperty;
use crate::rules::value::Value;
use crate::simulation::events::Event;
use crate::simulation::rule_eval::{evaluate_expression, Scope};
use crate::spatial::document::SpatialDocument;
use crate::spatial::path_cache::PathPointCache;
use crate::spatial::query::{LocationFilter, PathFilter, PathSelection, SpatialQuery};

/// World-level properties and clock, readable by every rule
#[derive(Debug, Clone)]
pub struct WorldState {
    holder: PropertyHolder,
    tick: Tick,
    bounds: Bounds,
}

impl WorldState {
    pub(crate) fn new(properties: &PropertyMap, bounds: Bounds) -> Self {
        Self {
            holder: PropertyHolder::new(properties, &PropertyMap::new()),
            tick: 0,
            bounds,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
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

    pub fn is_in_world(&self, point: Vec2) -> bool {
        self.bounds.contains(point)
    }
}

/// Read-only view of the population while one agent is detached for stepping
#[derive(Debug, Clone, Copy)]
pub struct Population<'a> {
    head: &'a [Agent],
    current: Option<&'a Agent>,
    tail: &'a [Agent],
}

impl<'a> Population<'a> {
    pub fn new(agents: &'a [Agent]) -> Self {
        Self { head: agents, current: None, tail: &[] }
    }

    pub(crate) fn around(head: &'a [Agent], tail: &'a [Agent]) -> Self {
        Self { head, current: None, tail }
    }

    /// The same population with the detached agent put back in its slot
    pub(crate) fn with_current<'b>(self, agent: &'b Agent) -> Population<'b>
    where
        'a: 'b,
    {
        Population { head: self.head, current: Some(agent), tail: self.tail }
    }

    /// Agents in insertion order, dead ones included
    pub fn iter(&self) -> impl Iterator<Item = &'a Agent> + 'a {
        self.head.iter().chain(self.current).chain(self.tail.iter())
    }

    pub fn live(&self) -> impl Iterator<Item = &'a Agent> + 'a {
        self.iter().filter(|a| !a.is_dead())
    }
}

/// Everything an agent may touch while it steps
pub struct StepContext<'a> {
    pub(crate) world: &'a mut WorldState,
    pub(crate) others: Population<'a>,
    pub(crate) document: &'a SpatialDocument,
    pub(crate) paths: &'a mut PathPointCache,
    pub(crate) notifications: &'a mut Vec<Event>,
    pub(crate) config: &'a ModelConfig,
}

#[derive(Debug, Clone, Copy)]
struct SpawnTimer {
    species: usize,
    next: Option<Tick>,
}

/// The simulation world containing all agents
#[derive(Debug)]
pub struct World {
    state: WorldState,
    species: Vec<Arc<Species>>,
    spawn_timers: Vec<SpawnTimer>,
    agents: Vec<Agent>,
    dead: Vec<Agent>,
    document: SpatialDocument,
    paths: PathPointCache,
    calculated: Vec<CalculatedProperty>,
    notifications: Vec<Event>,
    config: ModelConfig,
    rng: ChaCha8Rng,
    next_agent_id: u64,
}

impl World {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: WorldState::new(&PropertyMap::new(), Bounds::default()),
            species: Vec::new(),
            spawn_timers: Vec::new(),
            agents: Vec::new(),
            dead: Vec::new(),
            document: SpatialDocument::new(),
            paths: PathPointCache::new(),
            calculated: Vec::new(),
            notifications: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            next_agent_id: 0,
        })
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.state.bounds = bounds;
        self
    }

    pub fn with_document(mut self, document: SpatialDocument) -> Self {
        self.document = document;
        self.paths = PathPointCache::new();
        self
    }

    pub fn with_properties(mut self, properties: PropertyMap) -> Result<Self> {
        self.state.holder.set_many(properties)?;
        Ok(self)
    }

    /// Register a species. Spawn schedules run in registration order.
    pub fn with_species(mut self, species: Species) -> Result<Self> {
        self.add_species(species)?;
        Ok(self)
    }

    /// Install calculated properties and compute them immediately
    pub fn with_calculated_properties(
        mut self,
        properties: Vec<CalculatedProperty>,
    ) -> Result<Self> {
        self.calculated = properties;
        self.refresh_calculated_properties()?;
        Ok(self)
    }

    pub fn add_species(&mut self, species: Species) -> Result<()> {
        species.validate()?;
        if self.find_species(&species.name).is_some() {
            return Err(OrganelleError::malformed(format!(
                "species '{}' is defined twice",
                species.name
            )));
        }
        if let Some(spawn) = &species.spawn {
            self.spawn_timers.push(SpawnTimer {
                species: self.species.len(),
                next: spawn.first_spawn(),
            });
        }
        self.species.push(Arc::new(species));
        Ok(())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn tick(&self) -> Tick {
        self.state.tick
    }

    pub fn bounds(&self) -> Bounds {
        self.state.bounds
    }

    pub fn props(&self) -> &PropertyMap {
        self.state.props()
    }

    pub fn property(&self, name: &str) -> Value {
        self.state.property(name)
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.state.set_property(name, value)
    }

    pub fn document(&self) -> &SpatialDocument {
        &self.document
    }

    pub fn species(&self) -> impl Iterator<Item = &Species> {
        self.species.iter().map(|s| s.as_ref())
    }

    pub fn find_species(&self, name: &str) -> Option<&Arc<Species>> {
        self.species.iter().find(|s| s.name == name)
    }

    /// Live agents in insertion order
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id() == id)
    }

    /// Agents that died since the last [`World::clear_dead_agents`]
    pub fn dead_agents(&self) -> &[Agent] {
        &self.dead
    }

    pub fn clear_dead_agents(&mut self) {
        self.dead.clear();
    }

    pub fn drain_notifications(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.notifications)
    }

    pub fn is_in_world(&self, point: Vec2) -> bool {
        self.state.is_in_world(point)
    }

    /// Advance one tick: spawn, step agents, retire the dead, and refresh
    /// calculated properties on their period.
    pub fn step(&mut self) -> Result<()> {
        let tick = self.state.advance();

        self.run_spawns()?;

        for i in 0..self.agents.len() {
            let (head, rest) = self.agents.split_at_mut(i);
            let Some((current, tail)) = rest.split_first_mut() else {
                break;
            };
            let mut ctx = StepContext {
                world: &mut self.state,
                others: Population::around(head, tail),
                document: &self.document,
                paths: &mut self.paths,
                notifications: &mut self.notifications,
                config: &self.config,
            };
            current.step(&mut ctx)?;
        }

        self.retire_dead();

        if tick % self.config.calculated_property_period == 0 {
            self.refresh_calculated_properties()?;
        }
        Ok(())
    }

    /// Create an agent of the named species, step it once, and add it to
    /// the live set
    pub fn create_agent(&mut self, species: &str) -> Result<AgentId> {
        let species = self
            .find_species(species)
            .cloned()
            .ok_or_else(|| OrganelleError::UnknownSpecies(species.to_string()))?;
        self.spawn_agent(species)
    }

    fn spawn_agent(&mut self, species: Arc<Species>) -> Result<AgentId> {
        let center = self.state.bounds.center();
        let position = match species.spawn.as_ref().and_then(|s| s.location.as_ref()) {
            Some(filter) => self.get_location(filter, center).unwrap_or(center),
            None => center,
        };

        let id = AgentId(self.next_agent_id);
        self.next_agent_id += 1;
        let mut agent = Agent::new(id, species, position, self.config.seed);
        if !agent.species().calculated.is_empty() {
            let values = {
                let scope = Scope::for_agent(&self.state, Population::new(&self.agents), &agent);
                evaluate_calculated(&agent.species().calculated, &scope)?
            };
            for (name, value) in values {
                agent.write_calculated(&name, value);
            }
        }

        let mut ctx = StepContext {
            world: &mut self.state,
            others: Population::new(&self.agents),
            document: &self.document,
            paths: &mut self.paths,
            notifications: &mut self.notifications,
            config: &self.config,
        };
        agent.step(&mut ctx)?;

        debug!(agent = %id, species = %agent.species_name(), tick = self.state.tick, "created agent");
        self.notifications.push(Event::agent_created(&agent, self.state.tick));
        self.agents.push(agent);
        Ok(id)
    }

    fn run_spawns(&mut self) -> Result<()> {
        let tick = self.state.tick;
        for i in 0..self.spawn_timers.len() {
            let timer = self.spawn_timers[i];
            if !matches!(timer.next, Some(next) if next < tick) {
                continue;
            }
            let species = Arc::clone(&self.species[timer.species]);
            self.spawn_timers[i].next =
                species.spawn.as_ref().and_then(|s| s.every).map(|every| tick + every);
            self.spawn_agent(species)?;
        }
        Ok(())
    }

    fn retire_dead(&mut self) {
        if !self.agents.iter().any(Agent::is_dead) {
            return;
        }
        let tick = self.state.tick;
        let (dead, live): (Vec<Agent>, Vec<Agent>) =
            std::mem::take(&mut self.agents).into_iter().partition(Agent::is_dead);
        for agent in &dead {
            debug!(agent = %agent.id(), species = %agent.species_name(), tick, "agent died");
            self.notifications.push(Event::agent_died(agent, tick));
        }
        self.agents = live;
        self.dead.extend(dead);
    }

    /// Recompute every calculated property against the current population:
    /// the world's own, then those of each live agent's species
    pub fn refresh_calculated_properties(&mut self) -> Result<()> {
        if !self.calculated.is_empty() {
            let values = {
                let scope = Scope::for_world(&self.state, Population::new(&self.agents));
                evaluate_calculated(&self.calculated, &scope)?
            };
            for (name, value) in values {
                self.state.holder.write_calculated(&name, value);
            }
        }

        let updates = {
            let population = Population::new(&self.agents);
            self.agents
                .iter()
                .enumerate()
                .filter(|(_, agent)| !agent.is_dead() && !agent.species().calculated.is_empty())
                .map(|(i, agent)| {
                    let scope = Scope::for_agent(&self.state, population, agent);
                    Ok((i, evaluate_calculated(&agent.species().calculated, &scope)?))
                })
                .collect::<Result<Vec<_>>>()?
        };
        let refreshed_agents = updates.len();
        for (i, values) in updates {
            for (name, value) in values {
                self.agents[i].write_calculated(&name, value);
            }
        }

        if !self.calculated.is_empty() || refreshed_agents > 0 {
            trace!(
                tick = self.state.tick,
                world = self.calculated.len(),
                agents = refreshed_agents,
                "refreshed calculated properties"
            );
        }
        Ok(())
    }

    fn query(&mut self) -> SpatialQuery<'_, ChaCha8Rng> {
        SpatialQuery {
            document: &self.document,
            cache: &mut self.paths,
            rng: &mut self.rng,
            scan_precision: self.config.path_scan_precision,
        }
    }

    pub fn get_path(&mut self, filter: &PathFilter, origin: Vec2) -> Option<PathSelection> {
        self.query().select_path(filter, origin)
    }

    pub fn get_location(&mut self, filter: &LocationFilter, origin: Vec2) -> Option<Vec2> {
        self.query().resolve_location(filter, origin)
    }

    /// Memoized point at `distance` along `shape`
    pub fn get_point_along_path(&mut self, shape: ShapeId, distance: f64) -> Option<Vec2> {
        self.paths.point_along(&self.document, shape, distance)
    }
}

fn evaluate_calculated(
    definitions: &[CalculatedProperty],
    scope: &Scope<'_>,
) -> Result<Vec<(String, Value)>> {
    definitions
        .iter()
        .map(|p| Ok((p.name.clone(), evaluate_expression(&p.expression, scope)?)))
        .collect()
}
