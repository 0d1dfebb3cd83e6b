//! Headless model runner
//! Drives a small melanocyte model with a simulated clock and logs population

use std::cell::Cell;
use std::rc::Rc;

use clap::Parser;
use serde_json::json;

use organelle::core::{ModelConfig, Result};
use organelle::core::types::Bounds;
use organelle::ecs::World;
use organelle::rules::{compile_calculated_properties, compile_species_list};
use organelle::simulation::{ManualClock, Model};
use organelle::spatial::{Shape, SpatialDocument};

/// Run a model without a renderer
#[derive(Parser, Debug)]
#[command(name = "organelle-headless")]
#[command(about = "Run the melanocyte demo model headless and log its population")]
struct Args {
    /// Frames to simulate
    #[arg(long, default_value_t = 600)]
    frames: u32,

    /// Milliseconds of simulated wall-clock time per frame
    #[arg(long, default_value_t = 16.0)]
    frame_ms: f64,

    /// Override the configured tick rate
    #[arg(long)]
    tps: Option<f64>,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured hot start
    #[arg(long)]
    hot_start: Option<u64>,

    /// TOML model configuration
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Log every Nth frame
    #[arg(long, default_value_t = 60)]
    report_every: u32,
}

fn load_config(args: &Args) -> Result<ModelConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                organelle::core::OrganelleError::InvalidConfig(format!("{}: {}", path.display(), e))
            })?;
            ModelConfig::from_toml_str(&content)?
        }
        None => ModelConfig::default(),
    };
    if let Some(tps) = args.tps {
        config.ticks_per_second = tps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(hot_start) = args.hot_start {
        config.hot_start = hot_start;
    }
    config.validate()?;
    Ok(config)
}

fn cell() -> SpatialDocument {
    let mut document = SpatialDocument::new()
        .with_shape(Shape::circle(500.0, 500.0, 120.0).with_id("nucleus"))
        .with_shape(Shape::circle(420.0, 380.0, 40.0).with_id("golgi"));
    for (i, angle) in [0.3_f64, 1.4, 2.5, 3.6, 4.7, 5.8].iter().enumerate() {
        let (sin, cos) = angle.sin_cos();
        let inner = (500.0 + cos * 130.0, 500.0 + sin * 130.0);
        let outer = (500.0 + cos * 460.0, 500.0 + sin * 460.0);
        let shape = Shape::path(&[inner, outer]).with_class("microtubule");
        document.add(shape.with_id(&format!("mt{}", i)));
    }
    document
}

fn species() -> serde_json::Value {
    json!([
        {
            "name": "melanosome",
            "properties": {"size": 0.2, "darkness": 0},
            "spawn": {"every": 25, "selector": "#golgi", "random_offset": 10},
            "initial_state": "maturing",
            "rules": {
                "maturing": [
                    {"grow": {"by": 0.02, "until": 1}, "diffuse": {"speed": 0.5},
                     "finally": {"set": {"darkness": 1}, "switch_state": "finding_track"}}
                ],
                "finding_track": [
                    {"move_to": {"selector": ".microtubule", "which": "nearest", "at": "nearest"},
                     "finally": {"switch_state": "transporting"}}
                ],
                "transporting": [
                    {"follow": {"selector": ".microtubule", "which": "nearest", "at": "nearest"},
                     "finally": {"notify": "delivered", "switch_state": "delivered"}}
                ],
                "delivered": [
                    {"if": {"random": {"probability": 0.01, "fresh": true}}, "then": {"die": true}}
                ]
            },
            "die_when_exiting_world": true
        }
    ])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    tracing::info!(tps = config.ticks_per_second, seed = config.seed, "Starting headless model");

    let mut world = World::new(config)?
        .with_bounds(Bounds::new(0.0, 0.0, 1000.0, 1000.0))
        .with_document(cell());
    for species in compile_species_list(&species())? {
        world.add_species(species)?;
    }
    let calculated = compile_calculated_properties(&json!({
        "melanosomes": {"count": {"species": "melanosome"}},
        "transporting": {"count": {"species": "melanosome", "state": "transporting"}},
        "mature_ratio": {"ratio": {
            "numerator": {"count": {"state": ["transporting", "delivered"]}},
            "denominator": {"count": {"species": "melanosome"}}
        }}
    }))?;
    let world = world.with_calculated_properties(calculated)?;

    let clock = ManualClock::new();
    let mut model = Model::new(world, clock.clone())?;

    let delivered = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&delivered);
    model.on("melanosome.notify", move |_| counter.set(counter.get() + 1));
    model.run();

    for frame in 1..=args.frames {
        clock.advance(args.frame_ms);
        model.frame()?;

        if frame % args.report_every.max(1) == 0 {
            let world = model.world();
            tracing::info!(
                frame,
                tick = world.tick(),
                agents = world.agents().len(),
                melanosomes = %world.property("melanosomes"),
                transporting = %world.property("transporting"),
                mature_ratio = %world.property("mature_ratio"),
                delivered = delivered.get(),
                "population"
            );
        }
    }

    tracing::info!(
        ticks = model.world().tick(),
        world_steps = model.world_steps(),
        delivered = delivered.get(),
        "Finished"
    );
    Ok(())
}
