use std::{collections::BTreeSet, net::SocketAddr};

use crate::{error::ConfigError, tuple, value::Tuple};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTopology {
    replicants: BTreeSet<SocketAddr>,
}

impl ReplicaTopology {
    /// Validates `replicants` for the node at `local`: every entry must parse
    /// as a socket address, must not be the node itself and must be listed
    /// once.
    pub fn new<I, S>(local: SocketAddr, replicants: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in replicants {
            let raw = raw.as_ref();
            let address = parse_address(raw)?;
            if address == local {
                return Err(ConfigError::InvalidAddress {
                    address: raw.to_string(),
                    reason: "a node cannot replicate to itself".to_string(),
                });
            }
            if !set.insert(address) {
                return Err(ConfigError::InvalidAddress {
                    address: raw.to_string(),
                    reason: "replicant listed twice".to_string(),
                });
            }
        }
        Ok(Self { replicants: set })
    }

    pub fn is_replicated(&self) -> bool {
        !self.replicants.is_empty()
    }

    pub fn replicants(&self) -> impl Iterator<Item = &SocketAddr> {
        self.replicants.iter()
    }

    /// Rows for the `kvstate_replicants` table.
    pub fn tuples(&self) -> Vec<Tuple> {
        self.replicants
            .iter()
            .map(|address| tuple![address.to_string()])
            .collect()
    }
}

pub fn parse_address(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|err: std::net::AddrParseError| ConfigError::InvalidAddress {
            address: raw.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SocketAddr {
        "127.0.0.1:7000".parse().expect("literal address")
    }

    #[test]
    fn accepts_distinct_peers() {
        let topology =
            ReplicaTopology::new(local(), ["127.0.0.1:7001", "127.0.0.1:7002"]).expect("valid");
        assert!(topology.is_replicated());
        assert_eq!(
            topology.tuples(),
            vec![tuple!["127.0.0.1:7001"], tuple!["127.0.0.1:7002"]]
        );
    }

    #[test]
    fn rejects_self_duplicates_and_garbage() {
        for bad in [
            vec!["127.0.0.1:7000"],
            vec!["127.0.0.1:7001", "127.0.0.1:7001"],
            vec!["not an address"],
        ] {
            let err = ReplicaTopology::new(local(), bad).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidAddress { .. }));
        }
    }

    #[test]
    fn empty_set_is_single_node() {
        let topology = ReplicaTopology::new(local(), Vec::<String>::new()).expect("valid");
        assert!(!topology.is_replicated());
        assert!(topology.tuples().is_empty());
    }
}
