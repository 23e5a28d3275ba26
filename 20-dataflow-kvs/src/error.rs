use std::io;

use thiserror::Error;

use crate::schema::ColumnType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown relation '{0}'")]
    UnknownRelation(String),

    #[error("relation '{relation}' expects {expected} columns, got {found}")]
    Arity {
        relation: String,
        expected: usize,
        found: usize,
    },

    #[error("column '{column}' of '{relation}' expects {expected}, got {found}")]
    ColumnType {
        relation: String,
        column: String,
        expected: ColumnType,
        found: ColumnType,
    },

    #[error("relation '{relation}' redeclared with a conflicting kind or schema")]
    Conflict { relation: String },

    #[error("channel '{relation}' needs exactly one '@' location column in its key")]
    MissingAddress { relation: String },

    #[error("'{relation}' is not a table")]
    NotATable { relation: String },

    #[error("table '{relation}' can only change through staged merge or retract")]
    TableWrite { relation: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("rule {rule}: unknown column '{column}'")]
    UnknownColumn { rule: usize, column: String },

    #[error("rule {rule}: column '{column}' is ambiguous between its sources")]
    AmbiguousColumn { rule: usize, column: String },

    #[error("rule {rule}: {reason}")]
    InvalidRule { rule: usize, reason: String },

    #[error("anti-join against '{relation}' is inside a recursive cycle")]
    UnstratifiedNegation { relation: String },

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("failed to bind {address}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("rule {rule} produced a tuple its target rejects")]
    Evaluation {
        rule: usize,
        #[source]
        source: SchemaError,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error talking to {peer}")]
    Io {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {peer}")]
    Timeout { peer: String },

    #[error("outbound queue is full")]
    QueueFull,

    #[error("transport has shut down")]
    Closed,
}
