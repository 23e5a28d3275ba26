//! The key-value protocol as relations and rules.
//!
//! ```text
//! kvput                   channel [@address, key] => [value]
//! kvdel                   channel [@address, key]
//! kvget                   channel [@address, client, reqid, key]
//! kvget_response          channel [@client, reqid, key] => [value]
//! kvstate_delete_channel  channel [@address, key]
//! kvstate                 table   [key] => [value]
//! kvget_miss              scratch [client, reqid, key]
//!
//! kvstate        <+ kvput                      (key, value)
//! kvstate        <- kvdel                      (key)
//! kvstate        <- kvstate_delete_channel     (key)
//! kvget_response <~ kvget * kvstate on key     (client, reqid, key, value)
//! kvget_miss     <= kvget ! kvstate on key
//! ```
//!
//! The replicated variant adds a `kvstate_replicants [address]` table. Every
//! tick it re-sends the whole state to each replicant as plain puts, less the
//! keys deleted this tick, and forwards those deletes once:
//!
//! ```text
//! kvstate_snapshot       <= kvstate ! kvdel on key
//! kvput                  <~ kvstate_replicants * kvstate_snapshot   (address, key, value)
//! kvstate_delete_channel <~ kvstate_replicants * kvdel              (address, key)
//! ```
//!
//! A replicant applies forwarded deletes but does not forward them again.

use crate::{
    error::ConfigError,
    program::{Program, ProgramBuilder},
    rule::Rule,
    schema::{ColumnType, Schema},
};

pub const KVPUT: &str = "kvput";
pub const KVDEL: &str = "kvdel";
pub const KVGET: &str = "kvget";
pub const KVGET_RESPONSE: &str = "kvget_response";
pub const KVSTATE: &str = "kvstate";
pub const KVGET_MISS: &str = "kvget_miss";
pub const KVSTATE_REPLICANTS: &str = "kvstate_replicants";
pub const KVSTATE_SNAPSHOT: &str = "kvstate_snapshot";
pub const KVSTATE_DELETE_CHANNEL: &str = "kvstate_delete_channel";

/// Builds the single-node program.
pub fn kv_store() -> Result<Program, ConfigError> {
    declare(Program::builder()).build()
}

/// Builds the program that also pushes its state to `kvstate_replicants`.
pub fn replicated_kv_store() -> Result<Program, ConfigError> {
    declare(Program::builder())
        .table(
            KVSTATE_REPLICANTS,
            Schema::new().key("address", ColumnType::Str),
        )
        .scratch(
            KVSTATE_SNAPSHOT,
            Schema::new()
                .key("key", ColumnType::Any)
                .value("value", ColumnType::Any),
        )
        .rule(
            Rule::derive(KVSTATE_SNAPSHOT)
                .from(KVSTATE)
                .anti_join(KVDEL, [("key", "key")])
                .select(["key", "value"]),
        )
        .rule(
            Rule::send(KVPUT)
                .from(KVSTATE_REPLICANTS)
                .cross(KVSTATE_SNAPSHOT)
                .select(["address", "key", "value"]),
        )
        .rule(
            Rule::send(KVSTATE_DELETE_CHANNEL)
                .from(KVSTATE_REPLICANTS)
                .cross(KVDEL)
                .select(["kvstate_replicants.address", "key"]),
        )
        .build()
}

fn declare(builder: ProgramBuilder) -> ProgramBuilder {
    builder
        .channel(
            KVPUT,
            Schema::new()
                .key("@address", ColumnType::Str)
                .key("key", ColumnType::Any)
                .value("value", ColumnType::Any),
        )
        .channel(
            KVDEL,
            Schema::new()
                .key("@address", ColumnType::Str)
                .key("key", ColumnType::Any),
        )
        .channel(
            KVGET,
            Schema::new()
                .key("@address", ColumnType::Str)
                .key("client", ColumnType::Str)
                .key("reqid", ColumnType::Int)
                .key("key", ColumnType::Any),
        )
        .channel(
            KVGET_RESPONSE,
            Schema::new()
                .key("@client", ColumnType::Str)
                .key("reqid", ColumnType::Int)
                .key("key", ColumnType::Any)
                .value("value", ColumnType::Any),
        )
        .channel(
            KVSTATE_DELETE_CHANNEL,
            Schema::new()
                .key("@address", ColumnType::Str)
                .key("key", ColumnType::Any),
        )
        .table(
            KVSTATE,
            Schema::new()
                .key("key", ColumnType::Any)
                .value("value", ColumnType::Any),
        )
        .scratch(
            KVGET_MISS,
            Schema::new()
                .key("client", ColumnType::Str)
                .key("reqid", ColumnType::Int)
                .key("key", ColumnType::Any),
        )
        .rule(Rule::merge(KVSTATE).from(KVPUT).select(["key", "value"]))
        .rule(Rule::retract(KVSTATE).from(KVDEL).select(["key"]))
        .rule(
            Rule::retract(KVSTATE)
                .from(KVSTATE_DELETE_CHANNEL)
                .select(["key"]),
        )
        .rule(
            Rule::send(KVGET_RESPONSE)
                .from(KVGET)
                .join(KVSTATE, [("key", "key")])
                .select(["client", "reqid", "kvstate.key", "value"]),
        )
        .rule(
            Rule::derive(KVGET_MISS)
                .from(KVGET)
                .anti_join(KVSTATE, [("key", "key")])
                .select(["client", "reqid", "key"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_variants_build() {
        let single = kv_store().expect("single-node program");
        assert_eq!(single.describe().len(), 5);

        let replicated = replicated_kv_store().expect("replicated program");
        let rules = replicated.describe();
        assert_eq!(rules.len(), 8);
        assert!(rules.iter().any(|line| line.starts_with("kvput <~")));
        assert!(
            rules
                .iter()
                .any(|line| line.starts_with("kvstate_delete_channel <~"))
        );
    }
}
