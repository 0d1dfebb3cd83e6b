//! Fixed-timestep scheduler
//!
//! Translates wall-clock time into a deterministic number of world ticks.
//! The host calls [`Model::frame`] from its animation loop; each frame runs
//! `round(elapsed / period) - total_steps` ticks (bounded by the catch-up
//! limit) and then renders once. Ticks dropped by the bound are lost.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use tracing::debug;

use crate::core::error::{OrganelleError, Result};
use crate::ecs::world::World;
use crate::simulation::events::{Event, EventBus, MODEL_STEP};

/// Source of elapsed wall-clock milliseconds
pub trait Clock {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock advanced by hand. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.0.get()
    }
}

/// Drawing collaborator, called once per frame after the ticks ran.
/// It owns clearing the world's dead set.
pub trait Renderer {
    fn render(&mut self, world: &mut World);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeoutId(u64);

type TimeoutCallback = Box<dyn FnOnce(&mut Model)>;

struct Timeout {
    id: TimeoutId,
    fire_at: u64,
    callback: TimeoutCallback,
}

pub struct Model {
    world: World,
    clock: Box<dyn Clock>,
    renderer: Option<Box<dyn Renderer>>,
    bus: EventBus,
    running: bool,
    baseline_ms: f64,
    total_steps: u64,
    step_period_ms: f64,
    max_catch_up: u64,
    /// Step count that only moves while ticks are owed; timeouts fire on it
    timeline: u64,
    timeouts: Vec<Timeout>,
    next_timeout: u64,
    world_steps: u64,
}

impl Model {
    /// Wrap a world, run its configured hot start and, with `autoplay`,
    /// start the loop
    pub fn new(world: World, clock: impl Clock + 'static) -> Result<Self> {
        let config = world.config().clone();
        let mut model = Self {
            world,
            clock: Box::new(clock),
            renderer: None,
            bus: EventBus::new(),
            running: false,
            baseline_ms: 0.0,
            total_steps: 0,
            step_period_ms: config.step_period_ms(),
            max_catch_up: config.catch_up_limit(),
            timeline: 0,
            timeouts: Vec::new(),
            next_timeout: 0,
            world_steps: 0,
        };

        if config.hot_start > 0 {
            debug!(ticks = config.hot_start, "hot start");
            for _ in 0..config.hot_start {
                model.world.step()?;
                model.world_steps += 1;
            }
            model.world.clear_dead_agents();
            // Nobody can be listening yet
            let dropped = model.world.drain_notifications().len();
            debug!(dropped, "discarded hot start events");
        }
        if config.autoplay {
            model.run();
        }
        Ok(model)
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn step_period_ms(&self) -> f64 {
        self.step_period_ms
    }

    pub fn max_catch_up_steps(&self) -> u64 {
        self.max_catch_up
    }

    /// Number of `World::step` calls made so far
    pub fn world_steps(&self) -> u64 {
        self.world_steps
    }

    /// Listen on an event name and everything below it
    pub fn on(&mut self, name: &str, listener: impl FnMut(&Event) + 'static) {
        self.bus.on(name, listener);
    }

    /// Start the loop with a fresh catch-up baseline
    pub fn run(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.restart_baseline();
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.total_steps = 0;
    }

    fn restart_baseline(&mut self) {
        self.baseline_ms = self.clock.now_ms();
        self.total_steps = 0;
    }

    /// Change the tick rate. The catch-up bound follows unless the
    /// configuration fixes it explicitly.
    pub fn set_speed(&mut self, ticks_per_second: f64) -> Result<()> {
        if !ticks_per_second.is_finite() || ticks_per_second <= 0.0 {
            return Err(OrganelleError::InvalidConfig(format!(
                "ticks_per_second must be positive, got {}",
                ticks_per_second
            )));
        }
        let config = self.world.config();
        self.step_period_ms = 1000.0 / ticks_per_second;
        self.max_catch_up = config.max_catch_up_steps.unwrap_or_else(|| {
            ((ticks_per_second * config.catch_up_window_secs).round() as u64).max(1)
        });
        if self.running {
            self.restart_baseline();
        }
        Ok(())
    }

    /// One animation frame. Returns the number of ticks executed.
    pub fn frame(&mut self) -> Result<u64> {
        if !self.running {
            return Ok(0);
        }
        let elapsed = self.clock.now_ms() - self.baseline_ms;
        let target = (elapsed / self.step_period_ms).round().max(0.0) as u64;
        let behind = target.saturating_sub(self.total_steps);
        let steps = behind.min(self.max_catch_up);
        if steps < behind {
            debug!(behind, steps, dropped = behind - steps, "catch-up clamped");
        }
        // Dropped ticks are lost, not deferred
        self.total_steps = target;

        self.advance(steps, behind)
    }

    /// Run `n` ticks immediately, regardless of the loop
    pub fn step(&mut self, n: u64) -> Result<()> {
        self.advance(n, n).map(|_| ())
    }

    fn advance(&mut self, steps: u64, timeline: u64) -> Result<u64> {
        for _ in 0..steps {
            self.world.step()?;
            self.world_steps += 1;
        }
        self.timeline += timeline;

        match self.renderer.as_mut() {
            Some(renderer) => renderer.render(&mut self.world),
            None => self.world.clear_dead_agents(),
        }

        for event in self.world.drain_notifications() {
            self.bus.emit(&event);
        }
        if steps > 0 {
            self.bus.emit(&Event::new(MODEL_STEP, self.world.tick()));
        }
        self.fire_due_timeouts();
        Ok(steps)
    }

    /// Call `callback` once the simulation has advanced `delay_ms` worth of
    /// ticks. Time does not pass while the model is stopped.
    pub fn set_timeout(&mut self, delay_ms: f64, callback: impl FnOnce(&mut Model) + 'static) -> TimeoutId {
        let delay_steps = (delay_ms.max(0.0) / self.step_period_ms).round() as u64;
        let id = TimeoutId(self.next_timeout);
        self.next_timeout += 1;
        self.timeouts.push(Timeout {
            id,
            fire_at: self.timeline + delay_steps,
            callback: Box::new(callback),
        });
        id
    }

    pub fn clear_timeout(&mut self, id: TimeoutId) -> bool {
        let before = self.timeouts.len();
        self.timeouts.retain(|t| t.id != id);
        self.timeouts.len() != before
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    /// Fire timeouts that are due now. Ones scheduled by these callbacks wait
    /// for a later frame.
    fn fire_due_timeouts(&mut self) {
        let timeline = self.timeline;
        let (mut due, pending): (Vec<Timeout>, Vec<Timeout>) =
            std::mem::take(&mut self.timeouts).into_iter().partition(|t| t.fire_at <= timeline);
        self.timeouts = pending;
        due.sort_by_key(|t| (t.fire_at, t.id));
        for timeout in due {
            (timeout.callback)(self);
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("tick", &self.world.tick())
            .field("running", &self.running)
            .field("total_steps", &self.total_steps)
            .field("timeline", &self.timeline)
            .field("pending_timeouts", &self.timeouts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ModelConfig;
    use std::cell::RefCell;

    fn model(config: ModelConfig) -> (Model, ManualClock) {
        let clock = ManualClock::new();
        let world = World::new(config).unwrap();
        (Model::new(world, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_frame_runs_elapsed_ticks() {
        let (mut m, clock) = model(ModelConfig::default());
        assert!(m.is_running());
        clock.advance(50.0);
        assert_eq!(m.frame().unwrap(), 5);
        clock.advance(14.0);
        assert_eq!(m.frame().unwrap(), 1);
        assert_eq!(m.world().tick(), 6);
    }

    #[test]
    fn test_large_jump_is_clamped_and_dropped() {
        let config = ModelConfig { max_catch_up_steps: Some(20), ..ModelConfig::default() };
        let (mut m, clock) = model(config);
        clock.advance(60_000.0);
        assert_eq!(m.frame().unwrap(), 20);
        // The backlog is gone, not deferred
        clock.advance(10.0);
        assert_eq!(m.frame().unwrap(), 1);
        assert_eq!(m.world_steps(), 21);
    }

    #[test]
    fn test_stopped_model_does_not_step() {
        let config = ModelConfig { autoplay: false, ..ModelConfig::default() };
        let (mut m, clock) = model(config);
        clock.advance(1000.0);
        assert_eq!(m.frame().unwrap(), 0);

        m.run();
        clock.advance(20.0);
        assert_eq!(m.frame().unwrap(), 2);

        m.stop();
        clock.advance(500.0);
        m.run();
        assert_eq!(m.frame().unwrap(), 0);
    }

    #[test]
    fn test_hot_start() {
        let config = ModelConfig { hot_start: 25, autoplay: false, ..ModelConfig::default() };
        let (m, _) = model(config);
        assert_eq!(m.world().tick(), 25);
        assert!(!m.is_running());
    }

    #[test]
    fn test_hot_start_events_are_not_replayed() {
        let species = crate::rules::compile_species(&serde_json::json!({
            "name": "blip",
            "spawn": {"every": 1},
            "rules": {
                "initialization": {"notify": "born", "switch_state": "idle"},
                "idle": []
            }
        }))
        .unwrap();
        let config = ModelConfig { hot_start: 100, autoplay: false, ..ModelConfig::default() };
        let world = World::new(config).unwrap().with_species(species).unwrap();
        let mut m = Model::new(world, ManualClock::new()).unwrap();
        assert!(m.world().agents().len() > 90);

        let ticks = Rc::new(RefCell::new(Vec::new()));
        for name in ["blip", "world"] {
            let log = Rc::clone(&ticks);
            m.on(name, move |e| log.borrow_mut().push(e.tick));
        }
        m.step(1).unwrap();

        let ticks = ticks.borrow();
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|t| *t == 101), "{:?}", ticks);
    }

    #[test]
    fn test_set_speed_rebases() {
        let (mut m, clock) = model(ModelConfig::default());
        clock.advance(100.0);
        m.set_speed(10.0).unwrap();
        assert_eq!(m.step_period_ms(), 100.0);
        assert_eq!(m.max_catch_up_steps(), 100);
        assert_eq!(m.frame().unwrap(), 0);
        clock.advance(300.0);
        assert_eq!(m.frame().unwrap(), 3);
        assert!(m.set_speed(0.0).is_err());
    }

    #[test]
    fn test_timeouts_follow_ticks() {
        let (mut m, clock) = model(ModelConfig::default());
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&fired);
        m.set_timeout(30.0, move |model| log.borrow_mut().push(model.world().tick()));
        let log = Rc::clone(&fired);
        let cancelled = m.set_timeout(30.0, move |_| log.borrow_mut().push(999));
        assert!(m.clear_timeout(cancelled));

        clock.advance(20.0);
        m.frame().unwrap();
        assert!(fired.borrow().is_empty());

        // Stopped time does not count towards the delay
        m.stop();
        clock.advance(1000.0);
        m.run();
        m.frame().unwrap();
        assert!(fired.borrow().is_empty());

        clock.advance(10.0);
        m.frame().unwrap();
        assert_eq!(*fired.borrow(), vec![3]);
        assert_eq!(m.pending_timeouts(), 0);
    }

    #[test]
    fn test_timeout_can_schedule_another() {
        let (mut m, _) = model(ModelConfig { autoplay: false, ..ModelConfig::default() });
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        m.set_timeout(10.0, move |model| {
            counter.set(counter.get() + 1);
            let counter = Rc::clone(&counter);
            model.set_timeout(10.0, move |_| counter.set(counter.get() + 1));
        });
        m.step(1).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(m.pending_timeouts(), 1);
        m.step(1).unwrap();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_model_step_event() {
        let (mut m, _) = model(ModelConfig { autoplay: false, ..ModelConfig::default() });
        let ticks = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&ticks);
        m.on("model", move |e| log.borrow_mut().push(e.tick));
        m.step(3).unwrap();
        m.step(2).unwrap();
        assert_eq!(*ticks.borrow(), vec![3, 5]);
    }

    struct CountingRenderer(Rc<Cell<u32>>);

    impl Renderer for CountingRenderer {
        fn render(&mut self, world: &mut World) {
            self.0.set(self.0.get() + 1);
            world.clear_dead_agents();
        }
    }

    #[test]
    fn test_renderer_called_once_per_frame() {
        let (m, clock) = model(ModelConfig::default());
        let frames = Rc::new(Cell::new(0));
        let mut m = m.with_renderer(CountingRenderer(Rc::clone(&frames)));
        clock.advance(70.0);
        assert_eq!(m.frame().unwrap(), 7);
        assert_eq!(frames.get(), 1);
    }
}
