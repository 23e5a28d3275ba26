use std::sync::{Arc, Mutex};

use anyhow::Result;
use dataflow_kvs::{
    inspect::Inspector,
    node::{Node, TickReport},
    protocol::{self, KVDEL, KVGET, KVGET_MISS, KVGET_RESPONSE, KVPUT, KVSTATE},
    store::RelationStore,
    transport::{
        Envelope, Inbox, Transport,
        memory::{MemoryNetwork, MemoryTransport},
    },
    tuple,
    value::Tuple,
};

const SERVER: &str = "server";
const CLIENT: &str = "client";

struct Harness {
    node: Node<MemoryTransport>,
    client: MemoryTransport,
    responses: Inbox,
    misses: Arc<Mutex<Vec<Tuple>>>,
}

/// Keeps every Get that matched nothing, across ticks.
struct MissRecorder(Arc<Mutex<Vec<Tuple>>>);

impl Inspector for MissRecorder {
    fn after_commit(&mut self, _report: &TickReport, store: &RelationStore) {
        if let Ok(relation) = store.read(KVGET_MISS) {
            self.0.lock().expect("recorder lock").extend(relation.to_vec());
        }
    }
}

impl Harness {
    fn new() -> Result<Self> {
        let network = MemoryNetwork::new();
        let (transport, inbox) = network.endpoint(SERVER);
        let (client, responses) = network.endpoint(CLIENT);
        let misses = Arc::new(Mutex::new(Vec::new()));
        let node = Node::new(protocol::kv_store()?, transport, inbox)
            .with_inspector(MissRecorder(Arc::clone(&misses)));
        Ok(Self {
            node,
            client,
            responses,
            misses,
        })
    }

    fn send(&self, relation: &str, tuples: Vec<Tuple>) {
        self.client.send(Envelope {
            from: CLIENT.into(),
            to: SERVER.into(),
            relation: relation.into(),
            tuples,
        });
    }

    fn put(&self, key: &str, value: &str) {
        self.send(KVPUT, vec![tuple![SERVER, key, value]]);
    }

    fn delete(&self, key: &str) {
        self.send(KVDEL, vec![tuple![SERVER, key]]);
    }

    fn get(&self, reqid: i64, key: &str) {
        self.send(KVGET, vec![tuple![SERVER, CLIENT, reqid, key]]);
    }

    fn state(&self) -> Result<Vec<Tuple>> {
        Ok(self.node.read(KVSTATE)?.to_vec())
    }

    fn responses(&mut self) -> Vec<Tuple> {
        self.responses
            .drain()
            .into_iter()
            .filter(|e| e.relation == KVGET_RESPONSE)
            .flat_map(|e| e.tuples)
            .collect()
    }

    fn misses(&self) -> Vec<Tuple> {
        self.misses.lock().expect("recorder lock").clone()
    }
}

#[test]
fn put_then_get_round_trips() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("color", "blue");
    let report = h.node.tick()?;
    assert_eq!(report.accepted, 1);
    assert_eq!(report.merged, 1);
    assert_eq!(h.state()?, vec![tuple!["color", "blue"]]);

    h.get(1, "color");
    let report = h.node.tick()?;
    assert_eq!(report.sent, 1);
    assert_eq!(h.responses(), vec![tuple![CLIENT, 1, "color", "blue"]]);
    assert!(h.misses().is_empty());
    Ok(())
}

#[test]
fn repeated_put_is_idempotent() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.node.tick()?;
    h.put("k", "v");
    let report = h.node.tick()?;

    assert_eq!(report.merged, 0);
    assert_eq!(h.state()?, vec![tuple!["k", "v"]]);
    Ok(())
}

#[test]
fn later_put_overwrites() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "old");
    h.node.tick()?;
    h.put("k", "new");
    h.node.tick()?;

    assert_eq!(h.state()?, vec![tuple!["k", "new"]]);
    Ok(())
}

#[test]
fn distinct_keys_are_independent() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("a", "1");
    h.put("b", "2");
    h.node.tick()?;
    h.delete("a");
    h.node.tick()?;

    assert_eq!(h.state()?, vec![tuple!["b", "2"]]);
    Ok(())
}

#[test]
fn delete_removes_and_later_gets_go_unanswered() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.node.tick()?;
    h.delete("k");
    let report = h.node.tick()?;
    assert_eq!(report.retracted, 1);
    assert!(h.state()?.is_empty());

    h.get(7, "k");
    let report = h.node.tick()?;
    assert_eq!(report.sent, 0);
    assert!(h.responses().is_empty());
    assert_eq!(h.misses(), vec![tuple![CLIENT, 7, "k"]]);
    Ok(())
}

#[test]
fn get_of_a_missing_key_leaves_the_table_alone() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("a", "1");
    h.put("b", "2");
    h.node.tick()?;
    let before = h.state()?;

    h.get(3, "absent");
    let report = h.node.tick()?;

    assert_eq!(report.merged, 0);
    assert_eq!(report.retracted, 0);
    assert_eq!(h.state()?, before);
    assert_eq!(h.misses(), vec![tuple![CLIENT, 3, "absent"]]);
    Ok(())
}

#[test]
fn delete_of_a_missing_key_is_a_no_op() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("keep", "v");
    h.node.tick()?;
    h.delete("never-stored");
    let report = h.node.tick()?;

    assert_eq!(report.retracted, 0);
    assert_eq!(h.state()?, vec![tuple!["keep", "v"]]);
    Ok(())
}

#[test]
fn same_tick_put_and_delete_ends_deleted() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.delete("k");
    let report = h.node.tick()?;

    assert_eq!(report.accepted, 2);
    assert!(h.state()?.is_empty());
    Ok(())
}

#[test]
fn same_tick_get_sees_the_previous_state() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.get(1, "k");
    h.node.tick()?;
    assert!(h.responses().is_empty());

    h.get(2, "k");
    h.node.tick()?;
    assert_eq!(h.responses(), vec![tuple![CLIENT, 2, "k", "v"]]);
    Ok(())
}

#[test]
fn competing_puts_in_one_tick_keep_the_greatest_value() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "b");
    h.put("k", "a");
    h.put("k", "c");
    h.node.tick()?;

    assert_eq!(h.state()?, vec![tuple!["k", "c"]]);
    Ok(())
}

#[test]
fn concurrent_gets_are_answered_separately() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.node.tick()?;
    h.get(1, "k");
    h.get(2, "k");
    h.get(3, "missing");
    h.node.tick()?;

    let mut responses = h.responses();
    responses.sort();
    assert_eq!(
        responses,
        vec![tuple![CLIENT, 1, "k", "v"], tuple![CLIENT, 2, "k", "v"]]
    );
    assert_eq!(h.misses(), vec![tuple![CLIENT, 3, "missing"]]);
    Ok(())
}

#[test]
fn malformed_requests_are_dropped() -> Result<()> {
    let mut h = Harness::new()?;

    h.send(KVPUT, vec![tuple![SERVER, "k"]]);
    h.send(KVGET, vec![tuple![SERVER, CLIENT, "not-a-reqid", "k"]]);
    h.send(KVSTATE, vec![tuple!["k", "v"]]);
    h.send("kvbogus", vec![tuple![SERVER]]);
    let report = h.node.tick()?;

    assert_eq!(report.accepted, 0);
    assert_eq!(report.rejected, 4);
    assert!(h.state()?.is_empty());
    assert!(h.responses().is_empty());
    Ok(())
}

#[test]
fn empty_ticks_change_nothing() -> Result<()> {
    let mut h = Harness::new()?;

    h.put("k", "v");
    h.node.tick()?;
    for _ in 0..3 {
        let report = h.node.tick()?;
        assert_eq!(report.merged + report.retracted + report.sent, 0);
    }
    assert_eq!(h.node.tick_count(), 4);
    assert_eq!(h.state()?, vec![tuple!["k", "v"]]);
    Ok(())
}
