//! Validated rule sets and their evaluation plan.
//!
//! [`ProgramBuilder::build`] is where every programming mistake surfaces: an
//! unknown relation or column, a projection of the wrong width, an operator
//! aimed at the wrong kind of relation, or negation through recursion. All of
//! them are [`ConfigError`]s raised before the first tick.
//!
//! The plan groups the Scratch relations fed by `<=` rules into strongly
//! connected components and orders them so every relation is complete before
//! anything reads it. A component without a cycle is evaluated in one pass;
//! a recursive one is re-run until it stops changing.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConfigError;
use crate::rule::{Body, Expr, Operator, Predicate, Rule};
use crate::schema::Schema;
use crate::store::{RelationKind, RelationStore};
use crate::value::Value;

/// Where a projected or compared value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Left(usize),
    Right(usize),
    Const(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Shape {
    Scan,
    Join { on: Vec<(usize, usize)> },
    AntiJoin { on: Vec<(usize, usize)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Filter {
    pub equal: bool,
    pub lhs: Slot,
    pub rhs: Slot,
}

/// A rule with every name resolved to a column index.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub id: usize,
    pub op: Operator,
    pub target: String,
    pub left: String,
    pub right: Option<String>,
    pub shape: Shape,
    pub filters: Vec<Filter>,
    pub projection: Vec<Slot>,
    /// Retract rules only: the projection is the target's key, not a full tuple.
    pub by_key: bool,
    pub text: String,
}

/// A group of `<=` rules evaluated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stratum {
    pub rules: Vec<usize>,
    pub recursive: bool,
}

#[derive(Debug, Clone)]
pub struct Program {
    template: RelationStore,
    rules: Vec<CompiledRule>,
    strata: Vec<Stratum>,
    deferred: Vec<usize>,
}

impl Program {
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    /// A fresh store with every relation declared and empty.
    pub fn instantiate(&self) -> RelationStore {
        self.template.clone()
    }

    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    /// One line per rule, in declaration order.
    pub fn describe(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.text.clone()).collect()
    }

    pub(crate) fn rule(&self, id: usize) -> &CompiledRule {
        &self.rules[id]
    }

    pub(crate) fn deferred(&self) -> &[usize] {
        &self.deferred
    }
}

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    declarations: Vec<(String, RelationKind, Schema)>,
    rules: Vec<Rule>,
}

impl ProgramBuilder {
    pub fn table(self, name: &str, schema: Schema) -> Self {
        self.relation(name, RelationKind::Table, schema)
    }

    pub fn scratch(self, name: &str, schema: Schema) -> Self {
        self.relation(name, RelationKind::Scratch, schema)
    }

    pub fn channel(self, name: &str, schema: Schema) -> Self {
        self.relation(name, RelationKind::Channel, schema)
    }

    pub fn relation(mut self, name: &str, kind: RelationKind, schema: Schema) -> Self {
        self.declarations.push((name.to_string(), kind, schema));
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules<I: IntoIterator<Item = Rule>>(mut self, rules: I) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn build(self) -> Result<Program, ConfigError> {
        let mut template = RelationStore::new();
        for (name, kind, schema) in self.declarations {
            template.declare(&name, kind, schema)?;
        }

        let rules = self
            .rules
            .iter()
            .enumerate()
            .map(|(id, rule)| compile(id, rule, &template))
            .collect::<Result<Vec<_>, _>>()?;

        let strata = plan(&rules)?;
        let deferred = rules
            .iter()
            .filter(|r| r.op.is_deferred())
            .map(|r| r.id)
            .collect();

        Ok(Program {
            template,
            rules,
            strata,
            deferred,
        })
    }
}

fn invalid(rule: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRule {
        rule,
        reason: reason.into(),
    }
}

fn compile(id: usize, rule: &Rule, store: &RelationStore) -> Result<CompiledRule, ConfigError> {
    let target = store.read(rule.target())?;
    let expected = match rule.op() {
        Operator::Derive => RelationKind::Scratch,
        Operator::Merge | Operator::Retract => RelationKind::Table,
        Operator::Send => RelationKind::Channel,
    };
    if target.kind() != expected {
        return Err(invalid(
            id,
            format!(
                "'{}' targets {:?} '{}', expected a {:?}",
                rule.op(),
                target.kind(),
                rule.target(),
                expected
            ),
        ));
    }

    if rule.source().is_empty() {
        return Err(invalid(id, "rule has no source relation"));
    }
    let left = store.read(rule.source())?;

    let (right, shape) = match rule.body() {
        Body::Scan => (None, Shape::Scan),
        Body::Join { right, on } | Body::AntiJoin { right, on } => {
            if right == rule.source() {
                return Err(invalid(id, "self-joins are not supported"));
            }
            let right = store.read(right)?;
            let on = on
                .iter()
                .map(|(l, r)| {
                    let li = column_in(id, left.schema(), left.name(), l)?;
                    let ri = column_in(id, right.schema(), right.name(), r)?;
                    Ok((li, ri))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            let shape = match rule.body() {
                Body::AntiJoin { .. } => Shape::AntiJoin { on },
                _ => Shape::Join { on },
            };
            (Some(right), shape)
        }
    };

    let sources = Sources {
        rule: id,
        left: (left.name(), left.schema()),
        right: right.map(|r| (r.name(), r.schema())),
        anti: matches!(shape, Shape::AntiJoin { .. }),
    };

    let projection = if rule.projection().is_empty() {
        sources.all_columns()
    } else {
        rule.projection()
            .iter()
            .map(|e| sources.resolve(e))
            .collect::<Result<Vec<_>, _>>()?
    };

    let filters = rule
        .filters()
        .iter()
        .map(|p| {
            let (equal, lhs, rhs) = match p {
                Predicate::Eq(l, r) => (true, l, r),
                Predicate::Ne(l, r) => (false, l, r),
            };
            Ok(Filter {
                equal,
                lhs: sources.resolve(lhs)?,
                rhs: sources.resolve(rhs)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let schema = target.schema();
    let by_key = match rule.op() {
        Operator::Retract if projection.len() == schema.key_len() => true,
        Operator::Retract if projection.len() == schema.arity() => false,
        Operator::Retract => {
            return Err(invalid(
                id,
                format!(
                    "retraction from '{}' must project its {} key columns or all {} columns, got {}",
                    rule.target(),
                    schema.key_len(),
                    schema.arity(),
                    projection.len()
                ),
            ));
        }
        _ if projection.len() != schema.arity() => {
            return Err(invalid(
                id,
                format!(
                    "'{}' has {} columns but the projection has {}",
                    rule.target(),
                    schema.arity(),
                    projection.len()
                ),
            ));
        }
        _ => false,
    };

    Ok(CompiledRule {
        id,
        op: rule.op(),
        target: rule.target().to_string(),
        left: rule.source().to_string(),
        right: right.map(|r| r.name().to_string()),
        shape,
        filters,
        projection,
        by_key,
        text: rule.to_string(),
    })
}

fn column_in(rule: usize, schema: &Schema, relation: &str, column: &str) -> Result<usize, ConfigError> {
    schema
        .index_of(column)
        .ok_or_else(|| ConfigError::UnknownColumn {
            rule,
            column: format!("{relation}.{column}"),
        })
}

struct Sources<'a> {
    rule: usize,
    left: (&'a str, &'a Schema),
    right: Option<(&'a str, &'a Schema)>,
    anti: bool,
}

impl Sources<'_> {
    fn all_columns(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = (0..self.left.1.arity()).map(Slot::Left).collect();
        if let (Some((_, schema)), false) = (self.right, self.anti) {
            slots.extend((0..schema.arity()).map(Slot::Right));
        }
        slots
    }

    fn resolve(&self, expr: &Expr) -> Result<Slot, ConfigError> {
        let (relation, column) = match expr {
            Expr::Const(value) => return Ok(Slot::Const(value.clone())),
            Expr::Column { relation, column } => (relation.as_deref(), column.as_str()),
        };

        let in_left = self.left.1.index_of(column).map(Slot::Left);
        let in_right = self
            .right
            .and_then(|(_, schema)| schema.index_of(column))
            .map(Slot::Right);

        let slot = match relation {
            Some(name) if name == self.left.0 => in_left,
            Some(name) if self.right.is_some_and(|(r, _)| r == name) => in_right,
            Some(_) => None,
            None if self.anti => in_left,
            None => match (in_left, in_right) {
                (Some(_), Some(_)) => {
                    return Err(ConfigError::AmbiguousColumn {
                        rule: self.rule,
                        column: column.to_string(),
                    });
                }
                (left, right) => left.or(right),
            },
        };

        match slot {
            Some(Slot::Right(_)) if self.anti => Err(invalid(
                self.rule,
                format!("anti-join output cannot use right-hand column '{column}'"),
            )),
            Some(slot) => Ok(slot),
            None => Err(ConfigError::UnknownColumn {
                rule: self.rule,
                column: match relation {
                    Some(r) => format!("{r}.{column}"),
                    None => column.to_string(),
                },
            }),
        }
    }
}

/// Orders the `<=` rules into strata.
fn plan(rules: &[CompiledRule]) -> Result<Vec<Stratum>, ConfigError> {
    let derived: Vec<&CompiledRule> = rules.iter().filter(|r| r.op == Operator::Derive).collect();

    let targets: BTreeSet<&str> = derived.iter().map(|r| r.target.as_str()).collect();
    let nodes: Vec<&str> = targets.iter().copied().collect();
    let index: BTreeMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    // Edges run from a relation to the relations derived from it.
    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for rule in &derived {
        let to = index[rule.target.as_str()];
        for source in std::iter::once(&rule.left).chain(rule.right.iter()) {
            if let Some(&from) = index.get(source.as_str()) {
                edges[from].insert(to);
            }
        }
    }

    let mut components = Tarjan::run(&edges);
    // Tarjan yields components sinks-first.
    components.reverse();

    let mut strata = Vec::with_capacity(components.len());
    for component in components {
        let members: BTreeSet<&str> = component.iter().map(|&i| nodes[i]).collect();
        let recursive = component.len() > 1 || component.iter().any(|&i| edges[i].contains(&i));

        let rules: Vec<&CompiledRule> = derived
            .iter()
            .copied()
            .filter(|r| members.contains(r.target.as_str()))
            .collect();

        if recursive {
            for rule in &rules {
                if let (Shape::AntiJoin { .. }, Some(right)) = (&rule.shape, &rule.right) {
                    if members.contains(right.as_str()) {
                        return Err(ConfigError::UnstratifiedNegation {
                            relation: right.clone(),
                        });
                    }
                }
            }
        }

        strata.push(Stratum {
            rules: rules.iter().map(|r| r.id).collect(),
            recursive,
        });
    }
    Ok(strata)
}

/// Tarjan's strongly connected components over an adjacency list.
struct Tarjan<'a> {
    edges: &'a [BTreeSet<usize>],
    next: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn run(edges: &'a [BTreeSet<usize>]) -> Vec<Vec<usize>> {
        let n = edges.len();
        let mut tarjan = Tarjan {
            edges,
            next: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            stack: Vec::new(),
            on_stack: vec![false; n],
            components: Vec::new(),
        };
        for v in 0..n {
            if tarjan.index[v].is_none() {
                tarjan.visit(v);
            }
        }
        tarjan.components
    }

    fn visit(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.lowlink[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let edges = self.edges;
        for &w in edges[v].iter() {
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(wi) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(wi);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}
