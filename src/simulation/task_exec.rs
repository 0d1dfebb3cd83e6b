//! Task handlers. Each returns `Ok(true)` on the tick the task completes.

use rand::Rng;

use crate::core::error::Result;
use crate::core::types::{SiteId, Vec2};
use crate::ecs::world::StepContext;
use crate::entity::agent::Agent;
use crate::entity::tasks::{
    AssignedValue, Assignment, ChangeTask, DiffuseTask, FollowDirection, FollowState, FollowTask,
    Task, TaskKind, TaskProgress, WaitDuration,
};
use crate::rules::statement::{EntityRef, Statement};
use crate::rules::value::Value;
use crate::simulation::events::Event;
use crate::simulation::rule_eval::{resolve_value, Scope};
use crate::spatial::query::{LocationFilter, SpatialQuery};

pub(crate) fn run_task(agent: &mut Agent, task: &Task, ctx: &mut StepContext<'_>) -> Result<bool> {
    match &task.kind {
        TaskKind::Change(change) => run_change(agent, change),
        TaskKind::MoveTo(filter) => Ok(run_move_to(agent, task.site, filter, ctx)),
        TaskKind::Follow(follow) => Ok(run_follow(agent, task.site, follow, ctx)),
        TaskKind::Diffuse(diffuse) => Ok(run_diffuse(agent, task.site, diffuse, ctx)),
        TaskKind::Wait(duration) => Ok(run_wait(agent, task.site, *duration, ctx)),
        TaskKind::Die(condition) => run_die(agent, condition, ctx),
        TaskKind::Notify(message) => Ok(run_notify(agent, task.site, message, ctx)),
        TaskKind::Set(assignments) => run_set(agent, assignments, ctx),
        TaskKind::SetImageSelector(selector) => {
            agent.set_property("image_selector", selector.as_str())?;
            Ok(true)
        }
    }
}

fn run_change(agent: &mut Agent, change: &ChangeTask) -> Result<bool> {
    let (next, done) = change.apply(agent.number(&change.property));
    agent.set_property(&change.property, next)?;
    Ok(done)
}

fn run_move_to(agent: &mut Agent, site: SiteId, filter: &LocationFilter, ctx: &mut StepContext<'_>) -> bool {
    let key = agent.reference_key(site);
    let origin = agent.position();

    let target = match agent.references().get(&key) {
        Some(TaskProgress::MoveTo { target }) => *target,
        _ => {
            let resolved = SpatialQuery {
                document: ctx.document,
                cache: &mut *ctx.paths,
                rng: agent.rng(),
                scan_precision: ctx.config.path_scan_precision,
            }
            .resolve_location(filter, origin);
            let Some(target) = resolved else {
                return false;
            };
            agent.references_mut().insert(key, TaskProgress::MoveTo { target });
            target
        }
    };

    let speed = agent.number("speed");
    let distance = origin.distance(&target);
    if distance > speed {
        agent.set_position(origin + (target - origin) * (speed / distance));
    } else {
        agent.set_position(target);
    }
    if distance > 0.0 {
        agent.set_heading(origin.heading_to(&target));
    }

    if agent.position().distance(&target) <= ctx.config.arrival_epsilon {
        agent.set_position(target);
        agent.references_mut().remove(&key);
        return true;
    }
    false
}

fn start_follow(agent: &mut Agent, follow: &FollowTask, ctx: &mut StepContext<'_>) -> Option<FollowState> {
    let origin = agent.position();
    let selection = SpatialQuery {
        document: ctx.document,
        cache: &mut *ctx.paths,
        rng: agent.rng(),
        scan_precision: ctx.config.path_scan_precision,
    }
    .select_path(&follow.path, origin)?;

    let sign = match follow.direction {
        FollowDirection::Forward => 1.0,
        FollowDirection::Backward => -1.0,
        FollowDirection::Random => {
            if agent.rng().gen_bool(0.5) {
                1.0
            } else {
                -1.0
            }
        }
    };
    let length = selection.length;
    let distance = match follow.path.at {
        Some(_) => selection.start_percentage * length,
        None if sign > 0.0 => 0.0,
        None => length,
    };
    let until = match follow.until {
        Some(fraction) => fraction.clamp(0.0, 1.0) * length,
        None if sign > 0.0 => length,
        None => 0.0,
    };
    // An `until` behind the start is already passed; finish where we begin
    let until = if (until - distance) * sign < 0.0 { distance } else { until };
    Some(FollowState { shape: selection.shape, length, distance, sign, until })
}

fn run_follow(agent: &mut Agent, site: SiteId, follow: &FollowTask, ctx: &mut StepContext<'_>) -> bool {
    let key = agent.reference_key(site);
    if !matches!(agent.references().get(&key), Some(TaskProgress::Follow(_))) {
        let Some(state) = start_follow(agent, follow, ctx) else {
            return false;
        };
        agent.references_mut().insert(key, TaskProgress::Follow(state));
    }

    let speed = agent.number("speed");
    let Some(TaskProgress::Follow(state)) = agent.references_mut().get_mut(&key) else {
        return false;
    };
    let done = state.advance(speed);
    let (shape, distance) = (state.shape, state.distance);

    if let Some(point) = ctx.paths.point_along(ctx.document, shape, distance) {
        let previous = agent.position();
        if point != previous {
            agent.set_heading(previous.heading_to(&point));
        }
        agent.set_position(point);
    }
    if done {
        agent.references_mut().remove(&key);
    }
    done
}

fn run_diffuse(agent: &mut Agent, site: SiteId, diffuse: &DiffuseTask, ctx: &mut StepContext<'_>) -> bool {
    let key = agent.reference_key(site);
    let tick = ctx.world.tick();
    let started = match agent.references().get(&key) {
        Some(TaskProgress::Diffuse { started }) => *started,
        _ => {
            agent.references_mut().insert(key, TaskProgress::Diffuse { started: tick });
            tick
        }
    };

    let speed = diffuse.speed.unwrap_or_else(|| agent.number("speed"));
    let heading = agent.number("direction");
    let origin = agent.position();
    let turn = ctx.config.diffuse_turn;

    for _ in 0..=ctx.config.diffuse_retries {
        let candidate = if turn > 0.0 {
            heading + agent.rng().gen_range(-turn..=turn)
        } else {
            heading
        };
        let next = origin + Vec2::from_heading(candidate, speed);
        let blocked = diffuse
            .bounding_paths
            .as_ref()
            .is_some_and(|selector| ctx.document.crosses(selector, origin, next));
        if !blocked {
            agent.set_position(next);
            agent.set_heading(candidate);
            break;
        }
    }

    match diffuse.duration {
        Some(duration) if tick >= started + duration => {
            agent.references_mut().remove(&key);
            true
        }
        _ => false,
    }
}

fn run_wait(agent: &mut Agent, site: SiteId, duration: WaitDuration, ctx: &StepContext<'_>) -> bool {
    let key = agent.reference_key(site);
    let tick = ctx.world.tick();
    let started = match agent.references().get(&key) {
        Some(TaskProgress::Wait { started }) => *started,
        _ => {
            agent.references_mut().insert(key, TaskProgress::Wait { started: tick });
            tick
        }
    };
    match duration {
        WaitDuration::Forever => false,
        WaitDuration::Ticks(ticks) if tick >= started + ticks => {
            agent.references_mut().remove(&key);
            true
        }
        WaitDuration::Ticks(_) => false,
    }
}

fn run_die(agent: &mut Agent, condition: &Statement, ctx: &StepContext<'_>) -> Result<bool> {
    let value = {
        let scope = Scope::for_agent(&*ctx.world, ctx.others.with_current(agent), agent);
        resolve_value(condition, &scope)?
    };
    if value.is_truthy() {
        agent.kill();
        return Ok(true);
    }
    Ok(false)
}

/// Emits once per state visit
fn run_notify(agent: &mut Agent, site: SiteId, message: &str, ctx: &mut StepContext<'_>) -> bool {
    let key = agent.reference_key(site);
    if agent.references().get(&key).is_some() {
        return false;
    }
    agent.references_mut().insert(key, TaskProgress::Notified);
    ctx.notifications.push(Event::notify(agent, message, ctx.world.tick()));
    true
}

fn run_set(agent: &mut Agent, assignments: &[Assignment], ctx: &mut StepContext<'_>) -> Result<bool> {
    for assignment in assignments {
        let value = match &assignment.value {
            AssignedValue::Absolute(statement) => {
                let scope = Scope::for_agent(&*ctx.world, ctx.others.with_current(agent), agent);
                resolve_value(statement, &scope)?
            }
            AssignedValue::Relative(op, operand) => {
                let current = match assignment.target {
                    EntityRef::World => ctx.world.number(&assignment.property),
                    EntityRef::Agent | EntityRef::Default => agent.number(&assignment.property),
                };
                Value::Number(op.apply(current, *operand))
            }
        };
        match assignment.target {
            EntityRef::World => ctx.world.set_property(&assignment.property, value)?,
            EntityRef::Agent | EntityRef::Default => agent.set_property(&assignment.property, value)?,
        }
    }
    Ok(true)
}
