//! Tracks live connections by the peer's advertised `host:port`.
//!
//! A peer can have at most one outbound connection (one this process
//! dialed) and any number of inbound connections (ones it accepted), kept
//! separately so a lookup can prefer the outbound leg without scanning a
//! flat, direction-tagged list.

use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::Error;

#[derive(Default)]
struct PeerEntry {
    outbound: Option<Connection>,
    inbound: Vec<Connection>,
}

impl PeerEntry {
    fn is_empty(&self) -> bool {
        self.outbound.is_none() && self.inbound.is_empty()
    }
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `conn` under `host_port`. Refuses a peer whose advertised
    /// address is this channel's own.
    pub fn set(
        &mut self,
        host_port: &str,
        conn: Connection,
        own_host_port: Option<&str>,
    ) -> Result<(), Error> {
        if own_host_port == Some(host_port) {
            return Err(Error::SelfPeer { addr: conn.remote_addr });
        }
        let entry = self.peers.entry(host_port.to_string()).or_default();
        match conn.direction {
            crate::connection::Direction::Outbound => entry.outbound = Some(conn),
            crate::connection::Direction::Inbound => entry.inbound.push(conn),
        }
        Ok(())
    }

    /// Looks up a connection to `host_port`, preferring an outbound leg.
    pub fn get(&self, host_port: &str) -> Option<Connection> {
        let entry = self.peers.get(host_port)?;
        entry
            .outbound
            .clone()
            .or_else(|| entry.inbound.first().cloned())
    }

    /// Removes `conn` from whichever peer entry holds it, dropping the
    /// entry entirely once both slots are empty.
    pub fn remove(&mut self, host_port: &str, conn: &Connection) {
        let mut drop_entry = false;
        if let Some(entry) = self.peers.get_mut(host_port) {
            if entry.outbound.as_ref().is_some_and(|c| std::sync::Arc::ptr_eq(c, conn)) {
                entry.outbound = None;
            }
            entry.inbound.retain(|c| !std::sync::Arc::ptr_eq(c, conn));
            drop_entry = entry.is_empty();
        }
        if drop_entry {
            self.peers.remove(host_port);
        }
    }

    pub fn all(&self) -> Vec<Connection> {
        let mut out = Vec::new();
        for entry in self.peers.values() {
            out.extend(entry.outbound.iter().cloned());
            out.extend(entry.inbound.iter().cloned());
        }
        out
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercising `set`/`get`/`remove` against a live connection needs a
    // real socket pair; that coverage lives in tests/integration.rs. Here
    // we only check the bookkeeping that doesn't need one.
    #[test]
    fn new_registry_has_no_peers() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.peer_count(), 0);
        assert!(registry.get("127.0.0.1:1234").is_none());
    }

}
