use anyhow::Result;
use dataflow_kvs::{
    node::Node,
    protocol::{self, KVDEL, KVPUT, KVSTATE, KVSTATE_REPLICANTS},
    transport::{
        Envelope, Transport,
        memory::{MemoryNetwork, MemoryTransport},
    },
    tuple,
    value::Tuple,
};

struct Cluster {
    network: MemoryNetwork,
    client: MemoryTransport,
}

impl Cluster {
    fn new() -> Self {
        let network = MemoryNetwork::new();
        let (client, _inbox) = network.endpoint("client");
        Self { network, client }
    }

    /// A node that pushes its state to `replicants` every tick.
    fn primary(&self, address: &str, replicants: &[&str]) -> Result<Node<MemoryTransport>> {
        let (transport, inbox) = self.network.endpoint(address);
        let mut node = Node::new(protocol::replicated_kv_store()?, transport, inbox);
        node.seed(KVSTATE_REPLICANTS, replicants.iter().map(|r| tuple![*r]))?;
        Ok(node)
    }

    fn replica(&self, address: &str) -> Result<Node<MemoryTransport>> {
        let (transport, inbox) = self.network.endpoint(address);
        Ok(Node::new(protocol::kv_store()?, transport, inbox))
    }

    fn request(&self, to: &str, relation: &str, tuple: Tuple) {
        self.client.send(Envelope {
            from: "client".into(),
            to: to.into(),
            relation: relation.into(),
            tuples: vec![tuple],
        });
    }
}

fn state(node: &Node<MemoryTransport>) -> Result<Vec<Tuple>> {
    Ok(node.read(KVSTATE)?.to_vec())
}

fn tick_all(nodes: &mut [&mut Node<MemoryTransport>], rounds: usize) -> Result<()> {
    for _ in 0..rounds {
        for node in nodes.iter_mut() {
            node.tick()?;
        }
    }
    Ok(())
}

#[test]
fn replicant_catches_up_with_the_primary() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b"])?;
    let mut b = cluster.replica("b")?;

    cluster.request("a", KVPUT, tuple!["a", "k1", "v1"]);
    cluster.request("a", KVPUT, tuple!["a", "k2", "v2"]);
    tick_all(&mut [&mut a, &mut b], 2)?;

    assert_eq!(state(&a)?, state(&b)?);
    assert_eq!(state(&b)?.len(), 2);
    Ok(())
}

#[test]
fn state_converges_after_a_partition_heals() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b", "c"])?;
    let mut b = cluster.replica("b")?;
    let mut c = cluster.replica("c")?;

    cluster.network.partition("a", "c");
    cluster.request("a", KVPUT, tuple!["a", "k", "v"]);
    tick_all(&mut [&mut a, &mut b, &mut c], 3)?;

    assert_eq!(state(&a)?, vec![tuple!["k", "v"]]);
    assert_eq!(state(&b)?, vec![tuple!["k", "v"]]);
    assert!(state(&c)?.is_empty());
    assert!(cluster.network.dropped() > 0);

    cluster.network.heal("a", "c");
    tick_all(&mut [&mut a, &mut b, &mut c], 2)?;

    assert_eq!(state(&c)?, vec![tuple!["k", "v"]]);
    Ok(())
}

#[test]
fn overwrites_propagate() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b"])?;
    let mut b = cluster.replica("b")?;

    cluster.request("a", KVPUT, tuple!["a", "k", "old"]);
    tick_all(&mut [&mut a, &mut b], 2)?;
    cluster.request("a", KVPUT, tuple!["a", "k", "new"]);
    tick_all(&mut [&mut a, &mut b], 2)?;

    assert_eq!(state(&b)?, vec![tuple!["k", "new"]]);
    Ok(())
}

#[test]
fn deletes_reach_the_replicants() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b"])?;
    let mut b = cluster.replica("b")?;

    cluster.request("a", KVPUT, tuple!["a", "k", "v"]);
    cluster.request("a", KVPUT, tuple!["a", "other", "x"]);
    tick_all(&mut [&mut a, &mut b], 2)?;
    assert_eq!(state(&b)?.len(), 2);

    cluster.request("a", KVDEL, tuple!["a", "k"]);
    tick_all(&mut [&mut a, &mut b], 3)?;

    assert_eq!(state(&a)?, vec![tuple!["other", "x"]]);
    assert_eq!(state(&a)?, state(&b)?);
    Ok(())
}

#[test]
fn replicants_do_not_forward_deletes_again() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b"])?;
    let mut b = cluster.primary("b", &["c"])?;
    let mut c = cluster.replica("c")?;

    cluster.request("a", KVPUT, tuple!["a", "k", "v"]);
    tick_all(&mut [&mut a, &mut b, &mut c], 3)?;
    cluster.request("a", KVDEL, tuple!["a", "k"]);
    tick_all(&mut [&mut a, &mut b, &mut c], 3)?;

    assert!(state(&a)?.is_empty());
    assert!(state(&b)?.is_empty());
    assert_eq!(state(&c)?, vec![tuple!["k", "v"]]);
    Ok(())
}

#[test]
fn chained_replicas_forward_state() -> Result<()> {
    let cluster = Cluster::new();
    let mut a = cluster.primary("a", &["b"])?;
    let mut b = cluster.primary("b", &["c"])?;
    let mut c = cluster.replica("c")?;

    cluster.request("a", KVPUT, tuple!["a", "k", "v"]);
    tick_all(&mut [&mut a, &mut b, &mut c], 3)?;

    assert_eq!(state(&c)?, vec![tuple!["k", "v"]]);
    Ok(())
}
