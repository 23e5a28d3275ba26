use std::fmt;

use crate::error::SchemaError;
use crate::value::Tuple;

/// Prefix marking a channel's location column.
pub const ADDRESS_PREFIX: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int,
    Str,
    /// Accepts any value.
    Any,
}

impl ColumnType {
    fn admits(self, other: ColumnType) -> bool {
        self == ColumnType::Any || self == other
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Str => "str",
            ColumnType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Ordered columns of a relation. The first `key_len` columns form the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    keys: Vec<Column>,
    values: Vec<Column>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, name: &str, ty: ColumnType) -> Self {
        self.keys.push(Column {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn value(mut self, name: &str, ty: ColumnType) -> Self {
        self.values.push(Column {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn key_len(&self) -> usize {
        self.keys.len()
    }

    pub fn arity(&self) -> usize {
        self.keys.len() + self.values.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.keys.iter().chain(self.values.iter())
    }

    /// Position of a column, matching with or without the `@` prefix.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let bare = name.trim_start_matches(ADDRESS_PREFIX);
        self.columns()
            .position(|c| c.name == name || c.name.trim_start_matches(ADDRESS_PREFIX) == bare)
    }

    /// Index of the single `@` key column, if there is exactly one.
    pub fn address_index(&self) -> Option<usize> {
        let mut found = self
            .keys
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name.starts_with(ADDRESS_PREFIX))
            .map(|(i, _)| i);
        match (found.next(), found.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        }
    }

    /// Rejects a tuple of the wrong arity or with a mistyped column.
    pub fn check(&self, relation: &str, tuple: &Tuple) -> Result<(), SchemaError> {
        if tuple.arity() != self.arity() {
            return Err(SchemaError::Arity {
                relation: relation.to_string(),
                expected: self.arity(),
                found: tuple.arity(),
            });
        }
        for (column, value) in self.columns().zip(tuple.values()) {
            let found = value.column_type();
            if !column.ty.admits(found) {
                return Err(SchemaError::ColumnType {
                    relation: relation.to_string(),
                    column: column.name.clone(),
                    expected: column.ty,
                    found,
                });
            }
        }
        Ok(())
    }
}
