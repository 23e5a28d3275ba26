//! Per-tick rule evaluation.
//!
//! [`evaluate`] runs the `<=` strata to a fixpoint, then evaluates every
//! deferred rule once against that same snapshot: `<+` and `<-` output is
//! staged in the store for commit, `<~` output is returned as [`Outbound`]
//! tuples for the transport. Nothing here mutates a Table.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{ConfigError, SchemaError};
use crate::program::{CompiledRule, Filter, Program, Shape, Slot};
use crate::rule::Operator;
use crate::store::{RelationStore, Retraction};
use crate::value::{Tuple, Value};

/// A tuple headed for a Channel's location column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Outbound {
    pub relation: String,
    pub tuple: Tuple,
}

#[derive(Debug, Default)]
pub struct Evaluation {
    /// Tuples newly inserted into Scratch relations.
    pub derived: usize,
    /// Passes over `<=` rules, counting fixpoint repeats.
    pub passes: usize,
    pub outbound: Vec<Outbound>,
}

pub fn evaluate(program: &Program, store: &mut RelationStore) -> Result<Evaluation, ConfigError> {
    let mut evaluation = Evaluation::default();

    for stratum in program.strata() {
        loop {
            let mut changed = false;
            for &id in &stratum.rules {
                let rule = program.rule(id);
                for tuple in run(rule, store).map_err(|e| fatal(id, e))? {
                    if store.insert(&rule.target, tuple).map_err(|e| fatal(id, e))? {
                        evaluation.derived += 1;
                        changed = true;
                    }
                }
            }
            evaluation.passes += 1;
            if !stratum.recursive || !changed {
                break;
            }
        }
    }

    let mut outbound = BTreeSet::new();
    for &id in program.deferred() {
        let rule = program.rule(id);
        let tuples = run(rule, store).map_err(|e| fatal(id, e))?;
        match rule.op {
            Operator::Merge => store.merge(&rule.target, tuples),
            Operator::Retract => store.retract(
                &rule.target,
                tuples.into_iter().map(|t| {
                    if rule.by_key {
                        Retraction::Key(t.into_values())
                    } else {
                        Retraction::Tuple(t)
                    }
                }),
            ),
            Operator::Send => tuples.into_iter().try_for_each(|tuple| {
                store.check(&rule.target, &tuple)?;
                outbound.insert(Outbound {
                    relation: rule.target.clone(),
                    tuple,
                });
                Ok(())
            }),
            Operator::Derive => Ok(()),
        }
        .map_err(|e| fatal(id, e))?;
    }
    evaluation.outbound = outbound.into_iter().collect();

    Ok(evaluation)
}

fn fatal(rule: usize, source: SchemaError) -> ConfigError {
    ConfigError::Evaluation { rule, source }
}

/// Computes a rule's output from the store's current contents.
fn run(rule: &CompiledRule, store: &RelationStore) -> Result<Vec<Tuple>, SchemaError> {
    let left = store.read(&rule.left)?;
    let right = match &rule.right {
        Some(name) => Some(store.read(name)?),
        None => None,
    };

    let emit = |l: &Tuple, r: Option<&Tuple>| -> Option<Tuple> {
        rule.filters
            .iter()
            .all(|f| passes(f, l, r))
            .then(|| rule.projection.iter().map(|s| slot(s, l, r)).collect())
    };

    let out = match (&rule.shape, right) {
        (Shape::Join { on }, Some(right)) => join(left.iter(), right.iter(), on)
            .into_iter()
            .filter_map(|(l, r)| emit(l, Some(r)))
            .collect(),
        (Shape::AntiJoin { on }, Some(right)) => anti_join(left.iter(), right.iter(), on)
            .into_iter()
            .filter_map(|l| emit(l, None))
            .collect(),
        _ => left.iter().filter_map(|l| emit(l, None)).collect(),
    };
    Ok(out)
}

fn slot(slot: &Slot, left: &Tuple, right: Option<&Tuple>) -> Value {
    let value = match slot {
        Slot::Left(i) => left.get(*i),
        Slot::Right(i) => right.and_then(|r| r.get(*i)),
        Slot::Const(value) => Some(value),
    };
    // Indices were checked against the schemas when the program was built.
    value.cloned().unwrap_or(Value::Bool(false))
}

fn passes(filter: &Filter, left: &Tuple, right: Option<&Tuple>) -> bool {
    let equal = slot(&filter.lhs, left, right) == slot(&filter.rhs, left, right);
    equal == filter.equal
}

fn columns<'t>(tuple: &'t Tuple, indices: impl Iterator<Item = usize>) -> Vec<&'t Value> {
    indices.filter_map(|i| tuple.get(i)).collect()
}

/// Pairs every left tuple with every right tuple agreeing on the `on`
/// columns. With no columns this is the cross product.
pub fn join<'a, L, R>(left: L, right: R, on: &[(usize, usize)]) -> Vec<(&'a Tuple, &'a Tuple)>
where
    L: IntoIterator<Item = &'a Tuple>,
    R: IntoIterator<Item = &'a Tuple>,
{
    let mut index: HashMap<Vec<&Value>, Vec<&Tuple>> = HashMap::new();
    for r in right {
        index
            .entry(columns(r, on.iter().map(|(_, ri)| *ri)))
            .or_default()
            .push(r);
    }

    let mut pairs = Vec::new();
    for l in left {
        let key = columns(l, on.iter().map(|(li, _)| *li));
        if let Some(matches) = index.get(&key) {
            pairs.extend(matches.iter().map(|r| (l, *r)));
        }
    }
    pairs
}

/// Keeps the left tuples that match nothing on the right.
pub fn anti_join<'a, L, R>(left: L, right: R, on: &[(usize, usize)]) -> Vec<&'a Tuple>
where
    L: IntoIterator<Item = &'a Tuple>,
    R: IntoIterator<Item = &'a Tuple>,
{
    let present: HashSet<Vec<&Value>> = right
        .into_iter()
        .map(|r| columns(r, on.iter().map(|(_, ri)| *ri)))
        .collect();
    left.into_iter()
        .filter(|l| !present.contains(&columns(l, on.iter().map(|(li, _)| *li))))
        .collect()
}
