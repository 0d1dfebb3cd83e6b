//! Hierarchical notification bus
//!
//! Event names are dotted paths. Emitting `a.b.c` notifies listeners
//! registered on `a`, then `a.b`, then `a.b.c`.

use ahash::AHashMap;

use crate::core::types::{AgentId, Tick};
use crate::entity::agent::Agent;

pub const AGENT_CREATED: &str = "world.agent.created";
pub const AGENT_DIED: &str = "world.agent.died";
pub const MODEL_STEP: &str = "model.step";

/// Payload handed to every listener
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub agent: Option<AgentId>,
    pub species: Option<String>,
    pub message: Option<String>,
    pub tick: Tick,
}

impl Event {
    pub fn new(name: impl Into<String>, tick: Tick) -> Self {
        Self { name: name.into(), agent: None, species: None, message: None, tick }
    }

    fn about(name: impl Into<String>, agent: &Agent, tick: Tick) -> Self {
        Self {
            agent: Some(agent.id()),
            species: Some(agent.species_name().to_string()),
            ..Self::new(name, tick)
        }
    }

    /// `<species>.notify.<message>`
    pub(crate) fn notify(agent: &Agent, message: &str, tick: Tick) -> Self {
        let name = format!("{}.notify.{}", agent.species_name(), message);
        Self { message: Some(message.to_string()), ..Self::about(name, agent, tick) }
    }

    pub(crate) fn agent_created(agent: &Agent, tick: Tick) -> Self {
        Self::about(AGENT_CREATED, agent, tick)
    }

    pub(crate) fn agent_died(agent: &Agent, tick: Tick) -> Self {
        Self::about(AGENT_DIED, agent, tick)
    }
}

/// Every prefix of a dotted name, shortest first
pub fn prefixes(name: &str) -> impl Iterator<Item = &str> {
    name.match_indices('.')
        .map(move |(i, _)| &name[..i])
        .chain(std::iter::once(name))
}

pub type Listener = Box<dyn FnMut(&Event)>;

#[derive(Default)]
pub struct EventBus {
    listeners: AHashMap<String, Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, name: &str, listener: impl FnMut(&Event) + 'static) {
        self.listeners.entry(name.to_string()).or_default().push(Box::new(listener));
    }

    /// Dispatch to every listener on every prefix of the event name.
    /// Returns the number of listeners called.
    pub fn emit(&mut self, event: &Event) -> usize {
        let mut called = 0;
        for prefix in prefixes(&event.name) {
            if let Some(listeners) = self.listeners.get_mut(prefix) {
                for listener in listeners.iter_mut() {
                    listener(event);
                    called += 1;
                }
            }
        }
        called
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
