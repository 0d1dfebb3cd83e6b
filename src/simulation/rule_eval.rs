//! Rule evaluation: statements, antecedents and consequent selection

use std::collections::VecDeque;

use crate::core::error::{OrganelleError, Result};
use crate::ecs::world::{Population, WorldState};
use crate::entity::agent::Agent;
use crate::entity::species::RuleTable;
use crate::rules::statement::{
    Antecedent, Consequent, CountFilter, EntityRef, Expression, PropertyPath, Rule, Statement,
    TaskBundle,
};
use crate::rules::value::Value;

#[derive(Debug, Clone, Copy)]
enum Subject<'a> {
    World,
    Agent(&'a Agent),
}

/// What a statement can see while it is evaluated
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    world: &'a WorldState,
    population: Population<'a>,
    agent: Option<&'a Agent>,
    default: Subject<'a>,
}

impl<'a> Scope<'a> {
    pub fn for_agent(world: &'a WorldState, population: Population<'a>, agent: &'a Agent) -> Self {
        Self { world, population, agent: Some(agent), default: Subject::Agent(agent) }
    }

    /// World-level scope used for calculated properties
    pub fn for_world(world: &'a WorldState, population: Population<'a>) -> Self {
        Self { world, population, agent: None, default: Subject::World }
    }

    /// Inside a `count` filter both `agent.` and bare facts read the candidate
    fn for_candidate(&self, candidate: &'a Agent) -> Self {
        Self { agent: Some(candidate), default: Subject::Agent(candidate), ..*self }
    }

    pub fn world(&self) -> &'a WorldState {
        self.world
    }

    fn subject(&self, entity: EntityRef) -> Result<Subject<'a>> {
        match entity {
            EntityRef::World => Ok(Subject::World),
            EntityRef::Agent => {
                self.agent.map(Subject::Agent).ok_or(OrganelleError::MissingEntity("agent"))
            }
            EntityRef::Default => Ok(self.default),
        }
    }

    fn read(&self, path: &PropertyPath) -> Result<Value> {
        Ok(match self.subject(path.entity)? {
            Subject::World => self.world.property(&path.property),
            Subject::Agent(agent) => agent.property(&path.property),
        })
    }
}

pub fn resolve_value(statement: &Statement, scope: &Scope<'_>) -> Result<Value> {
    match statement {
        Statement::Literal(value) => Ok(value.clone()),
        Statement::Fact(fact) => {
            let value = scope.read(&fact.path)?;
            if fact.negate {
                Ok(Value::Bool(!value.is_truthy()))
            } else {
                Ok(value)
            }
        }
        Statement::State(check) => {
            // The world has no state label
            let matched = match scope.subject(check.entity)? {
                Subject::World => false,
                Subject::Agent(agent) => check.states.iter().any(|s| s == agent.state()),
            };
            Ok(Value::Bool(matched))
        }
        Statement::Count(filter) => Ok(Value::Number(count(filter, scope)? as f64)),
        Statement::Ratio(ratio) => {
            let numerator = resolve_value(&ratio.numerator, scope)?.as_number();
            let denominator = resolve_value(&ratio.denominator, scope)?.as_number();
            Ok(Value::Number(numerator / denominator))
        }
        Statement::Random(draw) => {
            let agent = scope.agent.ok_or(OrganelleError::MissingEntity("agent"))?;
            let fresh_at = draw.fresh.then(|| scope.world.tick());
            Ok(Value::Bool(agent.draw(draw.site, draw.probability, fresh_at)))
        }
    }
}

/// Live agents matching species, state and every extra antecedent
pub fn count(filter: &CountFilter, scope: &Scope<'_>) -> Result<usize> {
    let mut matched = 0;
    for candidate in scope.population.live() {
        if let Some(species) = &filter.species {
            if candidate.species_name() != species {
                continue;
            }
        }
        if !filter.states.is_empty() && !filter.states.iter().any(|s| s == candidate.state()) {
            continue;
        }
        let inner = scope.for_candidate(candidate);
        let mut passes = true;
        for rule in &filter.rules {
            if !check_antecedents(rule, &inner)? {
                passes = false;
                break;
            }
        }
        if passes {
            matched += 1;
        }
    }
    Ok(matched)
}

/// Comparator result as a boolean, or the raw value when there is none
pub fn evaluate_expression(expression: &Expression, scope: &Scope<'_>) -> Result<Value> {
    let value = resolve_value(&expression.statement, scope)?;
    Ok(match &expression.comparator {
        Some(comparator) => Value::Bool(comparator.compare(&value)),
        None => value,
    })
}

pub fn check_expression(expression: &Expression, scope: &Scope<'_>) -> Result<bool> {
    Ok(evaluate_expression(expression, scope)?.is_truthy())
}

pub fn check_antecedents(antecedent: &Antecedent, scope: &Scope<'_>) -> Result<bool> {
    match antecedent {
        Antecedent::Always => Ok(true),
        Antecedent::All(children) => {
            for child in children {
                if !check_antecedents(child, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Antecedent::Any(children) => {
            for child in children {
                if check_antecedents(child, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Antecedent::Check(expression) => check_expression(expression, scope),
    }
}

/// Task bundles triggered this tick, in rule order.
///
/// Nested rules go to the back of the working queue. More than
/// `max_nested` of them in one pass is an error.
pub fn select_consequents<'r>(
    rules: &'r RuleTable,
    state: &str,
    scope: &Scope<'_>,
    max_nested: usize,
) -> Result<Vec<&'r TaskBundle>> {
    let mut queue: VecDeque<&'r Rule> = rules.applicable(state).collect();
    let mut nested = 0;
    let mut bundles = Vec::new();

    while let Some(rule) = queue.pop_front() {
        let branch = if check_antecedents(&rule.condition, scope)? {
            &rule.then
        } else {
            &rule.otherwise
        };
        for consequent in branch {
            match consequent {
                Consequent::Tasks(bundle) => bundles.push(bundle),
                Consequent::Rule(inner) => {
                    nested += 1;
                    if nested > max_nested {
                        return Err(OrganelleError::NestedRuleLimit { limit: max_nested });
                    }
                    queue.push_back(inner);
                }
            }
        }
    }
    Ok(bundles)
}
