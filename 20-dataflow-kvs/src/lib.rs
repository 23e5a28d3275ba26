//! A key-value store written as a small dataflow program.
//!
//! Each node holds named relations of three kinds. Tables persist across
//! ticks, Scratch relations are recomputed every tick, and Channels carry
//! tuples between nodes. Rules derive, merge, retract or send tuples, and
//! a node advances in discrete ticks: drain arrivals, evaluate to a fixpoint,
//! commit table deltas, ship outbound tuples.
//!
//! - [`value`] and [`schema`] define tuples and what a relation accepts.
//! - [`store`] holds the relations and the staged deltas of a tick.
//! - [`rule`], [`program`] and [`eval`] are the rule language, its validation
//!   and stratified plan, and the per-tick evaluator.
//! - [`node`] runs ticks by hand; [`runtime`] runs them on tokio.
//! - [`transport`] and [`wire`] move Channel tuples, in memory or over TCP.
//! - [`protocol`] is the key-value program itself, with [`topology`] naming
//!   the replicants of the replicated variant.
//! - [`client`], [`config`], [`cli`] and [`inspect`] sit at the edges.
//!
//! Integration tests drive nodes by hand over [`transport::memory`] and
//! through real sockets.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod eval;
pub mod inspect;
pub mod node;
pub mod program;
pub mod protocol;
pub mod rule;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod topology;
pub mod transport;
pub mod value;
pub mod wire;
