//! End-to-end tests for models built from content trees
//!
//! Species are compiled from JSON, registered on a world and stepped through
//! the public API:
//! - count filters and ratios as calculated properties
//! - the calculated-property refresh period
//! - spawn, wait, notify and die timings through the model's event bus
//! - follow progress discarded on a state change
//! - content errors surfacing from compile or step

use std::cell::RefCell;
use std::rc::Rc;

use organelle::core::types::AgentId;
use organelle::core::{ModelConfig, OrganelleError};
use organelle::ecs::World;
use organelle::rules::{compile_calculated_properties, compile_species, compile_species_list};
use organelle::simulation::{ManualClock, Model};
use organelle::spatial::{Shape, SpatialDocument};
use serde_json::json;

fn quiet_config() -> ModelConfig {
    ModelConfig { autoplay: false, ..ModelConfig::default() }
}

fn cell_world() -> World {
    let species = compile_species(&json!({
        "name": "cell",
        "properties": {"tagged": false},
        "rules": {"initialization": [], "active": []}
    }))
    .unwrap();
    let calculated = compile_calculated_properties(&json!({
        "cells": {"count": {"species": "cell"}},
        "active": {"count": {"state": "active"}},
        "tagged": {"count": {"rules": {"fact": "tagged", "equals": true}}},
        "tagged_active": {"count": {"state": "active", "rules": [{"fact": "agent.tagged"}]}},
        "active_share": {"ratio": {
            "numerator": {"count": {"state": "active"}},
            "denominator": {"count": {}}
        }},
        "crowded": {"count": {}, "greaterThan": 3}
    }))
    .unwrap();

    World::new(quiet_config())
        .unwrap()
        .with_species(species)
        .unwrap()
        .with_calculated_properties(calculated)
        .unwrap()
}

#[test]
fn test_count_filters_as_calculated_properties() {
    let mut world = cell_world();
    let ids: Vec<AgentId> = (0..4).map(|_| world.create_agent("cell").unwrap()).collect();

    world.agent_mut(ids[0]).unwrap().switch_state("active").unwrap();
    world.agent_mut(ids[0]).unwrap().set_property("tagged", true).unwrap();
    world.agent_mut(ids[1]).unwrap().set_property("tagged", true).unwrap();
    world.refresh_calculated_properties().unwrap();

    assert_eq!(world.property("cells").as_number(), 4.0);
    assert_eq!(world.property("active").as_number(), 1.0);
    assert_eq!(world.property("tagged").as_number(), 2.0);
    assert_eq!(world.property("tagged_active").as_number(), 1.0);
    assert!((world.property("active_share").as_number() - 0.25).abs() < 1e-12);
    assert!(world.property("crowded").is_truthy());

    assert!(matches!(
        world.set_property("cells", 10),
        Err(OrganelleError::ReadOnlyProperty(ref name)) if name == "cells"
    ));
}

#[test]
fn test_calculated_properties_hold_between_refreshes() {
    let mut world = cell_world();
    for _ in 0..3 {
        world.create_agent("cell").unwrap();
    }

    for _ in 0..9 {
        world.step().unwrap();
        assert_eq!(world.property("cells").as_number(), 0.0, "tick {}", world.tick());
    }
    world.step().unwrap();
    assert_eq!(world.tick(), 10);
    assert_eq!(world.property("cells").as_number(), 3.0);

    world.create_agent("cell").unwrap();
    for _ in 0..9 {
        world.step().unwrap();
    }
    assert_eq!(world.property("cells").as_number(), 3.0);
    world.step().unwrap();
    assert_eq!(world.property("cells").as_number(), 4.0);
}

fn vesicle_model() -> Model {
    let species = compile_species(&json!({
        "name": "vesicle",
        "spawn": {"every": 3},
        "rules": {
            "initialization": [{"wait": 2, "finally": {"switch_state": "ready", "notify": "ready"}}],
            "ready": [{"die": true}]
        }
    }))
    .unwrap();
    let world = World::new(quiet_config()).unwrap().with_species(species).unwrap();
    Model::new(world, ManualClock::new()).unwrap()
}

#[test]
fn test_lifecycle_events_in_tick_order() {
    let mut model = vesicle_model();
    let log = Rc::new(RefCell::new(Vec::new()));
    for prefix in ["world", "vesicle"] {
        let log = Rc::clone(&log);
        model.on(prefix, move |e| log.borrow_mut().push((e.name.clone(), e.tick, e.agent)));
    }

    model.step(11).unwrap();

    let expected = vec![
        ("world.agent.created".to_string(), 4, Some(AgentId(0))),
        ("vesicle.notify.ready".to_string(), 6, Some(AgentId(0))),
        ("world.agent.died".to_string(), 7, Some(AgentId(0))),
        ("world.agent.created".to_string(), 8, Some(AgentId(1))),
        ("vesicle.notify.ready".to_string(), 10, Some(AgentId(1))),
        ("world.agent.died".to_string(), 11, Some(AgentId(1))),
    ];
    assert_eq!(*log.borrow(), expected);

    // Without a renderer the model clears the dead set each frame
    assert!(model.world().agents().is_empty());
    assert!(model.world().dead_agents().is_empty());
}

#[test]
fn test_follow_progress_restarts_after_state_change() {
    let document = SpatialDocument::new()
        .with_shape(Shape::path(&[(100.0, 500.0), (900.0, 500.0)]).with_class("track"));
    let follow = json!({"follow": {"selector": ".track"}});
    let species = compile_species(&json!({
        "name": "motor",
        "properties": {"speed": 10},
        "spawn": {"start": true},
        "rules": {
            "initialization": [{"switch_state": "walking"}],
            "walking": [{"if": {"fact": "world.paused"}, "then": {"switch_state": "paused"}, "else": follow}],
            "paused": [{"if": {"fact": {"not": "world.paused"}}, "then": {"switch_state": "walking"}}]
        }
    }))
    .unwrap();

    let mut world = World::new(quiet_config())
        .unwrap()
        .with_document(document)
        .with_species(species)
        .unwrap();
    world.set_property("paused", false).unwrap();

    for _ in 0..5 {
        world.step().unwrap();
    }
    let motor = world.agents()[0].position();
    assert!((motor.x - 150.0).abs() < 1e-9, "walked to {:?}", motor);

    world.set_property("paused", true).unwrap();
    world.step().unwrap();
    world.step().unwrap();
    assert_eq!(world.agents()[0].state(), "paused");
    assert!((world.agents()[0].position().x - 150.0).abs() < 1e-9);

    world.set_property("paused", false).unwrap();
    world.step().unwrap();
    assert_eq!(world.agents()[0].state(), "walking");
    world.step().unwrap();
    // A fresh follow starts from the beginning of the track
    assert!((world.agents()[0].position().x - 110.0).abs() < 1e-9);
}

#[test]
fn test_content_errors_at_compile_time() {
    assert!(matches!(
        compile_species(&json!({"name": "a", "rules": {"initialization": [{"teleport": {}}]}})),
        Err(OrganelleError::UnknownTask(ref task)) if task == "teleport"
    ));
    assert!(matches!(
        compile_species(&json!({"name": "a", "rules": {"initialization": [{"switch_state": "gone"}]}})),
        Err(OrganelleError::UndeclaredState { ref state, .. }) if state == "gone"
    ));
    assert!(matches!(
        compile_species(&json!({"name": "a", "rules": {"initialization": [{"if": {"fact": "cell.size"}}]}})),
        Err(OrganelleError::UnknownEntity(_))
    ));
    assert!(matches!(
        compile_species_list(&json!([{"name": "a"}, {"spawn": {"every": 1}}])),
        Err(OrganelleError::MalformedContent(_))
    ));
}

#[test]
fn test_nested_rule_limit_surfaces_from_step() {
    let species = compile_species(&json!({
        "name": "deep",
        "rules": {"initialization": [
            {"if": true, "then": {"if": true, "then": {"if": true, "then": {"if": true, "then": {"wait": 1}}}}}
        ]}
    }))
    .unwrap();
    let config = ModelConfig { max_nested_rules: 2, ..quiet_config() };
    let mut world = World::new(config).unwrap().with_species(species).unwrap();

    assert!(matches!(
        world.create_agent("deep"),
        Err(OrganelleError::NestedRuleLimit { limit: 2 })
    ));
    assert!(matches!(
        world.create_agent("ghost"),
        Err(OrganelleError::UnknownSpecies(ref name)) if name == "ghost"
    ));
}

#[test]
fn test_duplicate_species_rejected() {
    let mut list = compile_species_list(&json!([{"name": "a"}, {"name": "a"}])).unwrap();
    let mut world = World::new(quiet_config()).unwrap();
    let second = list.pop().unwrap();
    world.add_species(list.pop().unwrap()).unwrap();
    assert!(matches!(world.add_species(second), Err(OrganelleError::MalformedContent(_))));
}
