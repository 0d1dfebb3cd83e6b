//! Model configuration with documented constants
//!
//! Every tuning constant of the engine lives here. Hosts normally take the
//! defaults and override a handful of fields, either in code or from a TOML
//! document via [`ModelConfig::from_toml_str`].

use serde::{Deserialize, Serialize};

use crate::core::error::{OrganelleError, Result};

/// Configuration for the scheduler, world and task interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    // === SCHEDULER ===
    /// Simulation ticks per second of wall-clock time
    ///
    /// The step period is `1000 / ticks_per_second` milliseconds. Rendering
    /// framerate has no influence on how many ticks run.
    pub ticks_per_second: f64,

    /// Seconds of wall-clock time the scheduler will try to catch up on
    ///
    /// When `max_catch_up_steps` is not set, the catch-up bound is
    /// `ticks_per_second * catch_up_window_secs`. After a long stall
    /// (backgrounded tab, debugger pause) at most this much simulated time
    /// is replayed in one frame; the rest is dropped.
    pub catch_up_window_secs: f64,

    /// Explicit bound on ticks executed in a single frame
    pub max_catch_up_steps: Option<u64>,

    /// Ticks run synchronously when the model is created
    pub hot_start: u64,

    /// Start the real-time loop as soon as the model is created
    pub autoplay: bool,

    // === WORLD ===
    /// Calculated properties are recomputed every this many ticks
    ///
    /// Between recomputations they keep their last value even when the
    /// underlying counts change.
    pub calculated_property_period: u64,

    /// Seed for the world RNG; agent RNGs derive from it and the agent id
    pub seed: u64,

    /// Step along a path, in world units, when scanning for its closest point
    pub path_scan_precision: f64,

    // === RULES ===
    /// Maximum nested rules evaluated for one agent in one tick
    ///
    /// A consequent may itself be a rule, which is requeued and evaluated in
    /// the same pass. Exceeding this bound is a content error.
    pub max_nested_rules: usize,

    // === TASKS ===
    /// Distance under which `move_to` counts as arrived
    pub arrival_epsilon: f64,

    /// Extra headings `diffuse` tries when a step would cross a boundary
    pub diffuse_retries: usize,

    /// Maximum heading change per tick for `diffuse`, in radians
    ///
    /// The actual change is uniform in `[-diffuse_turn, diffuse_turn]`.
    pub diffuse_turn: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 100.0,
            catch_up_window_secs: 10.0,
            max_catch_up_steps: None,
            hot_start: 0,
            autoplay: true,

            calculated_property_period: 10,
            seed: 42,
            path_scan_precision: 16.0,

            max_nested_rules: 64,

            arrival_epsilon: 1e-6,
            diffuse_retries: 3,
            diffuse_turn: 0.5,
        }
    }
}

impl ModelConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ModelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Milliseconds of wall-clock time per simulation tick
    pub fn step_period_ms(&self) -> f64 {
        1000.0 / self.ticks_per_second
    }

    /// Ticks a single frame may execute
    pub fn catch_up_limit(&self) -> u64 {
        self.max_catch_up_steps
            .unwrap_or_else(|| (self.ticks_per_second * self.catch_up_window_secs).round() as u64)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if !self.ticks_per_second.is_finite() || self.ticks_per_second <= 0.0 {
            return Err(OrganelleError::InvalidConfig(format!(
                "ticks_per_second must be positive, got {}",
                self.ticks_per_second
            )));
        }

        if self.catch_up_limit() == 0 {
            return Err(OrganelleError::InvalidConfig(
                "catch-up limit must allow at least one step per frame".into(),
            ));
        }

        if self.calculated_property_period == 0 {
            return Err(OrganelleError::InvalidConfig(
                "calculated_property_period must be at least 1".into(),
            ));
        }

        if self.max_nested_rules == 0 {
            return Err(OrganelleError::InvalidConfig(
                "max_nested_rules must be at least 1".into(),
            ));
        }

        if !(self.arrival_epsilon.is_finite() && self.arrival_epsilon >= 0.0)
            || !(self.path_scan_precision.is_finite() && self.path_scan_precision > 0.0)
        {
            return Err(OrganelleError::InvalidConfig(format!(
                "arrival_epsilon ({}) must be >= 0 and path_scan_precision ({}) > 0",
                self.arrival_epsilon, self.path_scan_precision
            )));
        }

        // Diffuse draws headings from -turn..=turn
        if !self.diffuse_turn.is_finite() || self.diffuse_turn < 0.0 {
            return Err(OrganelleError::InvalidConfig(format!(
                "diffuse_turn must be a finite angle >= 0, got {}",
                self.diffuse_turn
            )));
        }

        Ok(())
    }
}
