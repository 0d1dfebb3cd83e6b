//! Compile species and calculated properties from a parsed content tree
//!
//! Content arrives as `serde_json::Value` (whatever YAML or JSON loader the
//! host uses). Every statement and task node gets a fresh [`SiteId`] here.

use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Map, Value as Json};

use crate::core::error::{OrganelleError, Result};
use crate::core::types::SiteId;
use crate::entity::properties::{overlay, property_map_from_json};
use crate::entity::species::{RuleTable, SpawnPolicy, Species, ALWAYS, DEFAULT_INITIAL_STATE};
use crate::entity::tasks::{
    AssignedValue, Assignment, ChangeTask, DiffuseTask, FollowDirection, FollowTask, RelativeOp,
    Task, TaskKind, WaitDuration,
};
use crate::rules::statement::{
    Antecedent, CalculatedProperty, Comparator, Consequent, CountFilter, EntityRef, Expression,
    FactRef, PropertyPath, RandomDraw, Ratio, Rule, StateCheck, Statement, TaskBundle,
};
use crate::rules::value::Value;
use crate::spatial::document::Selector;
use crate::spatial::query::{Anchor, LocationFilter, PathFilter, Which};

static NEXT_SITE: AtomicU32 = AtomicU32::new(1);

fn next_site() -> SiteId {
    SiteId(NEXT_SITE.fetch_add(1, Ordering::Relaxed))
}

fn malformed(message: impl Into<String>) -> OrganelleError {
    OrganelleError::malformed(message)
}

fn as_object<'a>(json: &'a Json, what: &str) -> Result<&'a Map<String, Json>> {
    json.as_object().ok_or_else(|| malformed(format!("{} must be a map, got {}", what, json)))
}

fn number(json: &Json, what: &str) -> Result<f64> {
    json.as_f64().ok_or_else(|| malformed(format!("{} must be a number, got {}", what, json)))
}

fn optional_number(object: &Map<String, Json>, key: &str) -> Result<Option<f64>> {
    object.get(key).map(|v| number(v, key)).transpose()
}

fn string<'a>(json: &'a Json, what: &str) -> Result<&'a str> {
    json.as_str().ok_or_else(|| malformed(format!("{} must be a string, got {}", what, json)))
}

/// A string or a list of strings
fn string_list(json: &Json, what: &str) -> Result<Vec<String>> {
    match json {
        Json::String(s) => Ok(vec![s.clone()]),
        Json::Array(items) => items.iter().map(|i| string(i, what).map(str::to_string)).collect(),
        other => Err(malformed(format!("{} must be a string or list, got {}", what, other))),
    }
}

fn ticks(json: &Json, what: &str) -> Result<u64> {
    let n = number(json, what)?;
    if n < 0.0 || !n.is_finite() {
        return Err(malformed(format!("{} must be a non-negative tick count, got {}", what, n)));
    }
    Ok(n.round() as u64)
}

// ============================================================================
// Statements and expressions
// ============================================================================

pub fn compile_statement(json: &Json) -> Result<Statement> {
    if let Some(primitive) = Value::from_json(json) {
        return Ok(Statement::Literal(primitive));
    }
    let object = as_object(json, "statement")?;

    if let Some(fact) = object.get("fact") {
        return compile_fact(fact).map(Statement::Fact);
    }
    if let Some(state) = object.get("state") {
        return Ok(Statement::State(StateCheck {
            entity: EntityRef::Default,
            states: string_list(state, "state")?,
        }));
    }
    if let Some(count) = object.get("count") {
        return compile_count(count).map(Statement::Count);
    }
    if let Some(ratio) = object.get("ratio") {
        let ratio = as_object(ratio, "ratio")?;
        let part = |key: &str| {
            ratio
                .get(key)
                .ok_or_else(|| malformed(format!("ratio is missing '{}'", key)))
                .and_then(compile_statement)
        };
        return Ok(Statement::Ratio(Box::new(Ratio {
            numerator: part("numerator")?,
            denominator: part("denominator")?,
        })));
    }
    if let Some(random) = object.get("random") {
        return compile_random(random).map(Statement::Random);
    }
    Err(malformed(format!("no statement in {}", json)))
}

fn compile_fact(json: &Json) -> Result<FactRef> {
    match json {
        Json::String(path) => Ok(FactRef { path: PropertyPath::parse(path)?, negate: false }),
        Json::Object(object) => {
            let path = object
                .get("not")
                .ok_or_else(|| malformed(format!("fact {} needs a path or 'not'", json)))?;
            Ok(FactRef { path: PropertyPath::parse(string(path, "fact.not")?)?, negate: true })
        }
        other => Err(malformed(format!("fact must be a property path, got {}", other))),
    }
}

fn compile_count(json: &Json) -> Result<CountFilter> {
    let object = as_object(json, "count")?;
    let rules = match object.get("rules") {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::Array(items)) => items.iter().map(compile_antecedent).collect::<Result<_>>()?,
        Some(single) => vec![compile_antecedent(single)?],
    };
    Ok(CountFilter {
        species: object.get("species").map(|s| string(s, "count.species").map(str::to_string)).transpose()?,
        states: object.get("state").map(|s| string_list(s, "count.state")).transpose()?.unwrap_or_default(),
        rules,
    })
}

fn compile_random(json: &Json) -> Result<RandomDraw> {
    let (probability, fresh) = match json {
        Json::Object(object) => {
            let p = object
                .get("probability")
                .ok_or_else(|| malformed("random needs a probability"))?;
            let fresh = object.get("fresh").and_then(Json::as_bool).unwrap_or(false);
            (number(p, "random.probability")?, fresh)
        }
        other => (number(other, "random")?, false),
    };
    Ok(RandomDraw { site: next_site(), probability, fresh })
}

fn compile_comparator(object: &Map<String, Json>) -> Result<Option<Comparator>> {
    let mut found = Vec::new();
    for (key, value) in object {
        let comparator = match key.as_str() {
            "equals" => Comparator::Equals(
                Value::from_json(value)
                    .ok_or_else(|| malformed(format!("equals needs a primitive, got {}", value)))?,
            ),
            "lessThan" | "less_than" => Comparator::LessThan(number(value, key)?),
            "greaterThan" | "greater_than" => Comparator::GreaterThan(number(value, key)?),
            "between" => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => Comparator::Between(number(low, key)?, number(high, key)?),
                _ => return Err(malformed(format!("between needs [low, high], got {}", value))),
            },
            _ => continue,
        };
        found.push(comparator);
    }
    if found.len() > 1 {
        return Err(malformed(format!("expression has {} comparators", found.len())));
    }
    Ok(found.pop())
}

pub fn compile_expression(json: &Json) -> Result<Expression> {
    let statement = compile_statement(json)?;
    let comparator = match json.as_object() {
        Some(object) => compile_comparator(object)?,
        None => None,
    };
    Ok(Expression { statement, comparator })
}

pub fn compile_antecedent(json: &Json) -> Result<Antecedent> {
    match json {
        Json::Null => Ok(Antecedent::Always),
        Json::Array(items) => Ok(Antecedent::All(
            items.iter().map(compile_antecedent).collect::<Result<_>>()?,
        )),
        Json::Object(object) if object.contains_key("all") || object.contains_key("any") => {
            let (children, all) = match (object.get("all"), object.get("any")) {
                (Some(children), None) => (children, true),
                (None, Some(children)) => (children, false),
                _ => return Err(malformed("antecedent cannot have both 'all' and 'any'")),
            };
            let items = children
                .as_array()
                .ok_or_else(|| malformed(format!("'all'/'any' must be a list, got {}", children)))?;
            let compiled = items.iter().map(compile_antecedent).collect::<Result<Vec<_>>>()?;
            Ok(if all { Antecedent::All(compiled) } else { Antecedent::Any(compiled) })
        }
        _ => compile_expression(json).map(Antecedent::Check),
    }
}

// ============================================================================
// Rules and task bundles
// ============================================================================

fn is_rule(object: &Map<String, Json>) -> bool {
    object.contains_key("if") || object.contains_key("then")
}

pub fn compile_rule(json: &Json) -> Result<Rule> {
    let object = as_object(json, "rule")?;
    if !is_rule(object) {
        // A bare bundle always fires
        return Ok(Rule {
            condition: Antecedent::Always,
            then: vec![Consequent::Tasks(compile_bundle(json)?)],
            otherwise: Vec::new(),
        });
    }
    Ok(Rule {
        condition: compile_antecedent(object.get("if").unwrap_or(&Json::Null))?,
        then: compile_consequents(object.get("then"))?,
        otherwise: compile_consequents(object.get("else"))?,
    })
}

fn compile_consequents(json: Option<&Json>) -> Result<Vec<Consequent>> {
    match json {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(Json::Array(items)) => items.iter().map(compile_consequent).collect(),
        Some(single) => Ok(vec![compile_consequent(single)?]),
    }
}

fn compile_consequent(json: &Json) -> Result<Consequent> {
    let object = as_object(json, "consequent")?;
    if is_rule(object) {
        Ok(Consequent::Rule(Box::new(compile_rule(json)?)))
    } else {
        compile_bundle(json).map(Consequent::Tasks)
    }
}

pub fn compile_bundle(json: &Json) -> Result<TaskBundle> {
    let object = as_object(json, "task bundle")?;
    let mut bundle = TaskBundle::default();
    for (key, args) in object {
        match key.as_str() {
            "switch_state" => bundle.switch_state = Some(string(args, key)?.to_string()),
            "finally" => bundle.finally = Some(Box::new(compile_bundle(args)?)),
            _ => bundle.tasks.push(compile_task(key, args)?),
        }
    }
    Ok(bundle)
}

pub fn compile_task(name: &str, args: &Json) -> Result<Task> {
    let kind = match name {
        "grow" => TaskKind::Change(compile_change(args, Some("size"))?),
        "change" => TaskKind::Change(compile_change(args, None)?),
        "move_to" => TaskKind::MoveTo(compile_location(args)?),
        "follow" => TaskKind::Follow(compile_follow(args)?),
        "diffuse" => TaskKind::Diffuse(compile_diffuse(args)?),
        "wait" => TaskKind::Wait(compile_wait(args)?),
        "die" => TaskKind::Die(compile_statement(args)?),
        "notify" => TaskKind::Notify(string(args, "notify")?.to_string()),
        "set" => TaskKind::Set(compile_assignments(args)?),
        "set_image_selector" => {
            TaskKind::SetImageSelector(string(args, "set_image_selector")?.to_string())
        }
        other => return Err(OrganelleError::UnknownTask(other.to_string())),
    };
    Ok(Task { site: next_site(), kind })
}

fn compile_change(args: &Json, property: Option<&str>) -> Result<ChangeTask> {
    let object = as_object(args, "change")?;
    let property = match property {
        Some(p) => p.to_string(),
        None => {
            let prop = object
                .get("prop")
                .or_else(|| object.get("property"))
                .ok_or_else(|| malformed("change needs a 'prop'"))?;
            string(prop, "change.prop")?.to_string()
        }
    };
    let by = number(object.get("by").ok_or_else(|| malformed("change needs 'by'"))?, "by")?;
    Ok(ChangeTask { property, by, until: optional_number(object, "until")? })
}

fn compile_selector(json: &Json) -> Result<Selector> {
    let source = string(json, "selector")?;
    Selector::parse(source).ok_or_else(|| malformed(format!("invalid selector '{}'", source)))
}

fn compile_which(json: &Json) -> Result<Which> {
    match json {
        Json::Number(_) => Ok(Which::Index(ticks(json, "which")? as usize)),
        Json::String(s) => match s.as_str() {
            "first" => Ok(Which::First),
            "random" => Ok(Which::Random),
            "nearest" => Ok(Which::Nearest),
            other => Err(malformed(format!("unknown 'which': {}", other))),
        },
        Json::Object(object) => {
            let k = object
                .get("any_of_nearest")
                .ok_or_else(|| malformed(format!("unknown 'which': {}", json)))?;
            Ok(Which::AnyOfNearest(ticks(k, "any_of_nearest")? as usize))
        }
        other => Err(malformed(format!("unknown 'which': {}", other))),
    }
}

fn compile_anchor(json: &Json) -> Result<Anchor> {
    match json {
        Json::Number(_) => Ok(Anchor::Percentage(number(json, "at")?)),
        Json::String(s) if s == "random" => Ok(Anchor::Random),
        Json::String(s) if s == "nearest" => Ok(Anchor::Nearest),
        other => Err(malformed(format!("unknown 'at': {}", other))),
    }
}

fn compile_path_filter(object: &Map<String, Json>, default_at: Option<Anchor>) -> Result<Option<PathFilter>> {
    let Some(selector) = object.get("selector") else {
        return Ok(None);
    };
    Ok(Some(PathFilter {
        selector: compile_selector(selector)?,
        which: object.get("which").map(compile_which).transpose()?.unwrap_or(Which::First),
        within: optional_number(object, "within")?,
        at: object.get("at").map(compile_anchor).transpose()?.or(default_at),
    }))
}

fn location_from(object: &Map<String, Json>, default_at: Option<Anchor>) -> Result<LocationFilter> {
    Ok(LocationFilter {
        path: compile_path_filter(object, default_at)?,
        x: optional_number(object, "x")?,
        y: optional_number(object, "y")?,
        random_offset: optional_number(object, "random_offset")?,
    })
}

fn compile_location(args: &Json) -> Result<LocationFilter> {
    location_from(as_object(args, "move_to")?, None)
}

fn compile_follow(args: &Json) -> Result<FollowTask> {
    let object = as_object(args, "follow")?;
    let path = compile_path_filter(object, None)?.ok_or_else(|| malformed("follow needs a selector"))?;
    let direction = match object.get("direction").map(|d| string(d, "direction")).transpose()? {
        None | Some("forward") => FollowDirection::Forward,
        Some("backward") => FollowDirection::Backward,
        Some("random") => FollowDirection::Random,
        Some(other) => return Err(malformed(format!("unknown follow direction '{}'", other))),
    };
    Ok(FollowTask { path, direction, until: optional_number(object, "until")? })
}

fn compile_diffuse(args: &Json) -> Result<DiffuseTask> {
    let empty = Map::new();
    let object = match args {
        Json::Null | Json::Bool(true) => &empty,
        other => as_object(other, "diffuse")?,
    };
    Ok(DiffuseTask {
        speed: optional_number(object, "speed")?,
        bounding_paths: object.get("bounding_paths").map(compile_selector).transpose()?,
        duration: object.get("for").map(|n| ticks(n, "diffuse.for")).transpose()?,
    })
}

fn compile_wait(args: &Json) -> Result<WaitDuration> {
    match args {
        Json::String(s) if s == "forever" => Ok(WaitDuration::Forever),
        Json::Object(object) => match object.get("for") {
            Some(Json::String(s)) if s == "forever" => Ok(WaitDuration::Forever),
            Some(n) => Ok(WaitDuration::Ticks(ticks(n, "wait.for")?)),
            None => Err(malformed("wait needs 'for'")),
        },
        other => Ok(WaitDuration::Ticks(ticks(other, "wait")?)),
    }
}

/// `*0.5`, `/2`, `+1`, `-3`
fn parse_relative(text: &str) -> Option<(RelativeOp, f64)> {
    let mut chars = text.chars();
    let op = match chars.next()? {
        '*' => RelativeOp::Multiply,
        '/' => RelativeOp::Divide,
        '+' => RelativeOp::Add,
        '-' => RelativeOp::Subtract,
        _ => return None,
    };
    let operand = chars.as_str().trim().parse::<f64>().ok()?;
    Some((op, operand))
}

fn compile_assignments(args: &Json) -> Result<Vec<Assignment>> {
    let object = as_object(args, "set")?;
    let mut assignments = Vec::with_capacity(object.len());
    for (key, value) in object {
        let path = PropertyPath::parse(key)?;
        let value = match value.as_str().and_then(parse_relative) {
            Some((op, operand)) => AssignedValue::Relative(op, operand),
            None => AssignedValue::Absolute(compile_statement(value)?),
        };
        assignments.push(Assignment { target: path.entity, property: path.property, value });
    }
    Ok(assignments)
}

// ============================================================================
// Species and calculated properties
// ============================================================================

fn compile_spawn(json: &Json) -> Result<SpawnPolicy> {
    let object = as_object(json, "spawn")?;
    let start = object.get("start").and_then(Json::as_bool).unwrap_or(false);
    let every = object.get("every").map(|n| ticks(n, "spawn.every")).transpose()?;
    if !start && every.is_none() {
        return Err(malformed("spawn needs 'every' or 'start: true'"));
    }
    if every == Some(0) {
        return Err(malformed("spawn.every must be at least 1"));
    }
    let location = location_from(object, Some(Anchor::Random))?;
    let location = (location.path.is_some() || location.x.is_some() || location.y.is_some())
        .then_some(location);
    Ok(SpawnPolicy { start, every, location })
}

fn compile_rule_table(json: &Json) -> Result<RuleTable> {
    let object = as_object(json, "rules")?;
    let mut table = RuleTable::new();
    for (state, rules) in object {
        let compiled = match rules {
            Json::Null => Vec::new(),
            Json::Array(items) => items.iter().map(compile_rule).collect::<Result<_>>()?,
            single => vec![compile_rule(single)?],
        };
        table = if state == ALWAYS {
            table.with_always(compiled)
        } else {
            table.with_state(state, compiled)
        };
    }
    Ok(table)
}

/// Compile and validate one species definition
pub fn compile_species(json: &Json) -> Result<Species> {
    let object = as_object(json, "species")?;
    let name = string(
        object.get("name").ok_or_else(|| malformed("species needs a name"))?,
        "species.name",
    )?;

    let mut species = Species::new(name);
    if let Some(properties) = object.get("properties") {
        species.properties = property_map_from_json(properties)?;
    }
    for key in ["defaults", "default_properties"] {
        if let Some(defaults) = object.get(key) {
            species.defaults = overlay(&property_map_from_json(defaults)?, &species.defaults);
        }
    }
    species.initial_state = object
        .get("initial_state")
        .map(|s| string(s, "initial_state").map(str::to_string))
        .transpose()?
        .unwrap_or_else(|| DEFAULT_INITIAL_STATE.to_string());
    species.spawn = object.get("spawn").filter(|s| !s.is_null()).map(compile_spawn).transpose()?;
    if let Some(rules) = object.get("rules") {
        species.rules = compile_rule_table(rules)?;
    }
    if let Some(calculated) = object.get("calculated_properties").filter(|c| !c.is_null()) {
        species.calculated = compile_calculated_properties(calculated)?;
    }
    if let Some(die) = object.get("die_when_exiting_world") {
        species.die_when_exiting_world = die
            .as_bool()
            .ok_or_else(|| malformed("die_when_exiting_world must be a bool"))?;
    }
    if let Some(view) = object.get("view").or_else(|| object.get("image")) {
        species.view = view.clone();
    }

    species.validate()?;
    Ok(species)
}

/// Compile a list of species, or a single species map
pub fn compile_species_list(json: &Json) -> Result<Vec<Species>> {
    match json {
        Json::Array(items) => items.iter().map(compile_species).collect(),
        single => Ok(vec![compile_species(single)?]),
    }
}

/// Map of property name to expression
pub fn compile_calculated_properties(json: &Json) -> Result<Vec<CalculatedProperty>> {
    as_object(json, "calculated properties")?
        .iter()
        .map(|(name, expression)| {
            Ok(CalculatedProperty { name: name.clone(), expression: compile_expression(expression)? })
        })
        .collect()
}
