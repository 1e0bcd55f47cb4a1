use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market::MarketName;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PeerAddress {
    //RPC base url, e.g. http://127.0.0.1:8081
    pub rpc: String,
    //host:port of the availability responder
    pub udp: String,
}

impl PeerAddress {
    pub fn new(rpc: impl Into<String>, udp: impl Into<String>) -> Self {
        Self {
            rpc: rpc.into(),
            udp: udp.into(),
        }
    }
}

//Sorted iteration fixes the order of forwarding attempts and of aggregated output
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PeerDirectory {
    inner: BTreeMap<MarketName, PeerAddress>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, name: impl Into<MarketName>, address: PeerAddress) {
        self.inner.insert(name.into(), address);
    }

    pub fn get(&self, name: &str) -> Option<&PeerAddress> {
        self.inner.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketName, &PeerAddress)> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{PeerAddress, PeerDirectory};

    #[test]
    fn test_that_iteration_is_sorted_by_market_name() {
        let mut peers = PeerDirectory::new();
        peers.add_peer(
            "Tokyo",
            PeerAddress::new("http://127.0.0.1:8082", "127.0.0.1:5002"),
        );
        peers.add_peer(
            "London",
            PeerAddress::new("http://127.0.0.1:8081", "127.0.0.1:5001"),
        );

        let names: Vec<&str> = peers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["London", "Tokyo"]);
        assert!(peers.get("London").is_some());
        assert!(peers.get("Paris").is_none());
    }
}
