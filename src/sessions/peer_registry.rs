//! Peer roster of a running session.
//!
//! This module provides the [`PeerRegistry`] struct that records every peer
//! attached to the transport, in canonical order, with its role and address.
//! The tick loop walks it to decide whose input to sample and whose
//! statistics to refresh.

use crate::error::NetplayError;
use crate::sessions::builder::{PeerSpec, Topology};
use crate::{PeerId, PeerRole};

/// A peer attached to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Identifier the transport assigned.
    pub id: PeerId,
    /// Role in the session.
    pub role: PeerRole,
    /// Display name: `P<n>` for players, `spectator` for spectators.
    pub nickname: String,
    /// Remote address. `None` for the local player.
    pub address: Option<String>,
    /// Player slot. `None` for spectators.
    pub slot: Option<usize>,
}

impl Peer {
    fn from_spec(id: PeerId, spec: PeerSpec) -> Self {
        let nickname = match spec.slot {
            Some(slot) if spec.role.is_player() => format!("P{}", slot + 1),
            _ => "spectator".to_owned(),
        };
        Self {
            id,
            role: spec.role,
            nickname,
            address: spec.address,
            slot: spec.slot,
        }
    }

    /// Returns `true` if this is the local player.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.role == PeerRole::LocalPlayer
    }
}

/// Registry of every peer, in the order they were attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Attaches every peer of `topology` in canonical order.
    ///
    /// `attach` is called once per peer, in the same order the peers end up in
    /// the registry, and returns the id the transport assigned. The first error
    /// aborts the build.
    pub fn build<F>(topology: &Topology, mut attach: F) -> Result<Self, NetplayError>
    where
        F: FnMut(&PeerSpec) -> Result<PeerId, NetplayError>,
    {
        let specs = topology.peers();
        let mut peers = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = attach(&spec)?;
            peers.push(Peer::from_spec(id, spec));
        }
        Ok(Self { peers })
    }

    /// Looks up a peer by transport id.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.id == id)
    }

    /// Looks up the player occupying `slot`.
    #[must_use]
    pub fn by_slot(&self, slot: usize) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.slot == Some(slot))
    }

    /// The local player, or `None` when spectating.
    #[must_use]
    pub fn local_player(&self) -> Option<&Peer> {
        self.local_players().next()
    }

    /// Iterates over every peer in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Iterates over local players. Yields at most one peer.
    pub fn local_players(&self) -> impl Iterator<Item = &Peer> {
        self.with_role(PeerRole::LocalPlayer)
    }

    /// Iterates over remote players in slot order.
    pub fn remote_players(&self) -> impl Iterator<Item = &Peer> {
        self.with_role(PeerRole::RemotePlayer)
    }

    /// Iterates over spectators.
    pub fn spectators(&self) -> impl Iterator<Item = &Peer> {
        self.with_role(PeerRole::Spectator)
    }

    fn with_role(&self, role: PeerRole) -> impl Iterator<Item = &Peer> {
        self.peers.iter().filter(move |peer| peer.role == role)
    }

    /// Number of peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Removes every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::sessions::builder::{LocalRole, StartRequest};

    fn build(topology: &Topology) -> PeerRegistry {
        let mut next = 0;
        PeerRegistry::build(topology, |_| {
            next += 1;
            Ok(PeerId::new(next * 10))
        })
        .unwrap()
    }

    #[test]
    fn registry_follows_canonical_order() {
        let topology = StartRequest::new()
            .with_local_port(7000)
            .with_local_role(LocalRole::Player { slot: 1 })
            .add_remote("a")
            .add_spectator("s")
            .validate()
            .unwrap();
        let registry = build(&topology);

        let nicknames: Vec<_> = registry.iter().map(|peer| peer.nickname.as_str()).collect();
        assert_eq!(nicknames, vec!["P1", "P2", "spectator"]);
        assert_eq!(registry.local_players().count(), 1);
        assert_eq!(registry.local_player().unwrap().slot, Some(1));
        assert_eq!(registry.local_player().unwrap().address, None);
        assert_eq!(registry.remote_players().count(), 1);
        assert_eq!(registry.spectators().count(), 1);
    }

    #[test]
    fn ids_come_from_the_transport() {
        let topology = StartRequest::new()
            .with_local_port(7000)
            .add_remote("a")
            .validate()
            .unwrap();
        let registry = build(&topology);
        assert_eq!(registry.get(PeerId::new(20)).unwrap().slot, Some(1));
        assert_eq!(registry.by_slot(0).unwrap().id, PeerId::new(10));
        assert!(registry.get(PeerId::new(5)).is_none());
    }

    #[test]
    fn spectating_registry_has_no_local_player() {
        let topology = StartRequest::new()
            .with_local_port(7000)
            .with_local_role(LocalRole::Spectator {
                expected_players: Some(2),
            })
            .add_remote("host")
            .validate()
            .unwrap();
        let registry = build(&topology);
        assert_eq!(registry.len(), 1);
        assert!(registry.local_player().is_none());
        let host = registry.by_slot(0).unwrap();
        assert_eq!(host.nickname, "P1");
        assert_eq!(host.role, PeerRole::RemotePlayer);
    }

    #[test]
    fn attach_failure_aborts_the_build() {
        let topology = StartRequest::new()
            .with_local_port(7000)
            .add_remote("a")
            .validate()
            .unwrap();
        let mut calls = 0;
        let result = PeerRegistry::build(&topology, |spec| {
            calls += 1;
            match spec.role {
                PeerRole::RemotePlayer => Err(NetplayError::Transport {
                    context: "unreachable".to_owned(),
                }),
                _ => Ok(PeerId::new(0)),
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn clear_empties_the_registry() {
        let topology = StartRequest::new().with_local_port(7000).validate().unwrap();
        let mut registry = build(&topology);
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.local_player().is_none());
    }
}
