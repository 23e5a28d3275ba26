//! Relation storage for one node. Staged Table deltas stay invisible until
//! [`RelationStore::commit`].

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SchemaError;
use crate::schema::Schema;
use crate::value::{Tuple, Value};

/// How a relation behaves across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Persistent; changes only at commit.
    Table,
    /// Recomputed every tick.
    Scratch,
    /// Network-transported; holds this tick's arrivals only.
    Channel,
}

impl RelationKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, RelationKind::Table)
    }
}

/// A named, schema-checked set of tuples, unique on its key columns.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    kind: RelationKind,
    schema: Schema,
    tuples: BTreeMap<Vec<Value>, Tuple>,
}

impl Relation {
    fn new(name: &str, kind: RelationKind, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            kind,
            schema,
            tuples: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.values()
    }

    pub fn get(&self, key: &[Value]) -> Option<&Tuple> {
        self.tuples.get(key)
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.tuples.get(tuple.key(self.schema.key_len())) == Some(tuple)
    }

    pub fn to_vec(&self) -> Vec<Tuple> {
        self.tuples.values().cloned().collect()
    }

    /// Adds a same-tick candidate. When the key is already present the
    /// greater tuple survives, so the outcome never depends on arrival order.
    ///
    /// Returns whether the relation changed.
    fn offer(&mut self, tuple: Tuple) -> bool {
        let key = tuple.key(self.schema.key_len()).to_vec();
        match self.tuples.get(&key) {
            Some(existing) if *existing >= tuple => false,
            _ => {
                self.tuples.insert(key, tuple);
                true
            }
        }
    }

    fn clear(&mut self) {
        self.tuples.clear();
    }
}

/// A staged retraction: by key, or by exact tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retraction {
    Key(Vec<Value>),
    Tuple(Tuple),
}

#[derive(Debug, Clone, Default)]
struct Delta {
    merges: BTreeMap<Vec<Value>, Tuple>,
    retractions: BTreeSet<Vec<Value>>,
    exact: BTreeSet<Tuple>,
}

/// Counts of what one commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub merged: usize,
    pub retracted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RelationStore {
    relations: BTreeMap<String, Relation>,
    staged: BTreeMap<String, Delta>,
}

impl RelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a relation. Redeclaring with the same kind and schema is a
    /// no-op; anything else is a conflict.
    pub fn declare(
        &mut self,
        name: &str,
        kind: RelationKind,
        schema: Schema,
    ) -> Result<(), SchemaError> {
        if let Some(existing) = self.relations.get(name) {
            if existing.kind == kind && existing.schema == schema {
                return Ok(());
            }
            return Err(SchemaError::Conflict {
                relation: name.to_string(),
            });
        }
        if kind == RelationKind::Channel && schema.address_index().is_none() {
            return Err(SchemaError::MissingAddress {
                relation: name.to_string(),
            });
        }
        self.relations
            .insert(name.to_string(), Relation::new(name, kind, schema));
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<&Relation, SchemaError> {
        self.relations
            .get(name)
            .ok_or_else(|| SchemaError::UnknownRelation(name.to_string()))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Validates a tuple against a relation's schema without storing it.
    pub fn check(&self, name: &str, tuple: &Tuple) -> Result<(), SchemaError> {
        self.read(name)?.schema.check(name, tuple)
    }

    /// Writes into a Scratch or Channel relation for the current tick.
    pub fn insert(&mut self, name: &str, tuple: Tuple) -> Result<bool, SchemaError> {
        let relation = self
            .relations
            .get_mut(name)
            .ok_or_else(|| SchemaError::UnknownRelation(name.to_string()))?;
        if relation.kind == RelationKind::Table {
            return Err(SchemaError::TableWrite {
                relation: name.to_string(),
            });
        }
        relation.schema.check(name, &tuple)?;
        Ok(relation.offer(tuple))
    }

    /// Stages tuples to be unioned into a Table at commit.
    pub fn merge<I>(&mut self, name: &str, tuples: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = Tuple>,
    {
        let schema = self.table(name)?.schema.clone();
        let delta = self.staged.entry(name.to_string()).or_default();
        for tuple in tuples {
            schema.check(name, &tuple)?;
            let key = tuple.key(schema.key_len()).to_vec();
            match delta.merges.get(&key) {
                Some(existing) if *existing >= tuple => {}
                _ => {
                    delta.merges.insert(key, tuple);
                }
            }
        }
        Ok(())
    }

    /// Stages removals from a Table, applied at commit after merges.
    pub fn retract<I>(&mut self, name: &str, retractions: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = Retraction>,
    {
        let schema = self.table(name)?.schema.clone();
        let delta = self.staged.entry(name.to_string()).or_default();
        for retraction in retractions {
            match retraction {
                Retraction::Key(key) => {
                    if key.len() != schema.key_len() {
                        return Err(SchemaError::Arity {
                            relation: name.to_string(),
                            expected: schema.key_len(),
                            found: key.len(),
                        });
                    }
                    delta.retractions.insert(key);
                }
                Retraction::Tuple(tuple) => {
                    schema.check(name, &tuple)?;
                    delta.exact.insert(tuple);
                }
            }
        }
        Ok(())
    }

    /// Applies every staged delta: merges first (overwriting by key), then
    /// retractions against the merged state.
    pub fn commit(&mut self) -> CommitSummary {
        let mut summary = CommitSummary::default();
        for (name, delta) in std::mem::take(&mut self.staged) {
            let Some(table) = self.relations.get_mut(&name) else {
                continue;
            };
            for (key, tuple) in delta.merges {
                if table.tuples.get(&key) != Some(&tuple) {
                    summary.merged += 1;
                }
                table.tuples.insert(key, tuple);
            }

            let before = table.tuples.len();
            table.tuples.retain(|key, tuple| {
                !delta.retractions.contains(key) && !delta.exact.contains(tuple)
            });
            summary.retracted += before - table.tuples.len();
        }
        summary
    }

    /// Empties every Scratch and Channel relation.
    pub fn reset_transient(&mut self) {
        for relation in self.relations.values_mut() {
            if relation.kind.is_transient() {
                relation.clear();
            }
        }
    }

    fn table(&self, name: &str) -> Result<&Relation, SchemaError> {
        let relation = self.read(name)?;
        if relation.kind != RelationKind::Table {
            return Err(SchemaError::NotATable {
                relation: name.to_string(),
            });
        }
        Ok(relation)
    }
}
