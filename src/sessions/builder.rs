use crate::buttons::MULTITAP_CAPACITY;
use crate::error::{NetplayError, TopologyError};
use crate::sessions::config::SavePayload;
use crate::PeerRole;

const DEFAULT_ROLLBACK_WINDOW: usize = 7;
const DEFAULT_LOCAL_DELAY: u32 = 0;
/// Slots kept beyond the rollback window: the frame being loaded and the one
/// being saved in the same batch.
const EXTRA_STATE_SLOTS: usize = 2;

/// What this machine is in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalRole {
    /// A player occupying `slot` (0-based) in the topology.
    Player {
        /// The local player's slot.
        slot: usize,
    },
    /// A spectator of a host with `expected_players` players.
    Spectator {
        /// Player count of the host session. Required.
        expected_players: Option<usize>,
    },
}

impl Default for LocalRole {
    fn default() -> Self {
        LocalRole::Player { slot: 0 }
    }
}

/// A request to start a session, as produced by a host's netplay dialog.
///
/// Consuming `with_*` methods fill the request; [`StartRequest::validate`]
/// checks it and turns it into a [`Topology`].
///
/// ```
/// use netplay_rollback::{LocalRole, NetplayError, StartRequest, TopologyError};
///
/// let result = StartRequest::new()
///     .with_local_port(55435)
///     .with_local_role(LocalRole::Player { slot: 1 })
///     .add_remote("198.51.100.4:55435")
///     .add_remote("198.51.100.9:55435")
///     .validate();
/// assert_eq!(
///     result.unwrap_err(),
///     NetplayError::Topology(TopologyError::AmbiguousMultitapAssignment { remotes: 2 })
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "StartRequest has no effect unless passed to RollbackSession::start()"]
pub struct StartRequest {
    local_port: u16,
    local_role: LocalRole,
    local_delay: u32,
    rollback_window: usize,
    remotes: Vec<String>,
    spectators: Vec<String>,
    multitap: bool,
    max_spectators: Option<usize>,
    save_payload: SavePayload,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl StartRequest {
    /// Construct a new request with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            local_port: 0,
            local_role: LocalRole::default(),
            local_delay: DEFAULT_LOCAL_DELAY,
            rollback_window: DEFAULT_ROLLBACK_WINDOW,
            remotes: Vec::new(),
            spectators: Vec::new(),
            multitap: false,
            max_spectators: None,
            save_payload: SavePayload::default(),
        }
    }

    /// Sets the UDP port to listen on. Required.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Sets whether this machine plays or spectates. Default is player 1.
    pub fn with_local_role(mut self, role: LocalRole) -> Self {
        self.local_role = role;
        self
    }

    /// Sets the local input delay in frames. Default is 0.
    pub fn with_local_delay(mut self, delay: u32) -> Self {
        self.local_delay = delay;
        self
    }

    /// Sets how many frames may be predicted ahead of confirmed input. Default is 7.
    pub fn with_rollback_window(mut self, window: usize) -> Self {
        self.rollback_window = window;
        self
    }

    /// Adds a remote player address. Remote players fill the non-local slots in
    /// the order they are added. When spectating, the single remote is the host.
    pub fn add_remote(mut self, address: impl Into<String>) -> Self {
        self.remotes.push(address.into());
        self
    }

    /// Adds a spectator address to stream confirmed inputs to.
    pub fn add_spectator(mut self, address: impl Into<String>) -> Self {
        self.spectators.push(address.into());
        self
    }

    /// Enables the multitap, which is required for more than two players.
    pub fn with_multitap(mut self, enabled: bool) -> Self {
        self.multitap = enabled;
        self
    }

    /// Caps the number of spectators. Defaults to the number of spectator
    /// addresses added.
    pub fn with_max_spectators(mut self, max: usize) -> Self {
        self.max_spectators = Some(max);
        self
    }

    /// Sets what Save updates report back to the transport.
    pub fn with_save_payload(mut self, payload: SavePayload) -> Self {
        self.save_payload = payload;
        self
    }

    /// Checks the request and derives the session topology.
    ///
    /// # Errors
    ///
    /// Returns [`NetplayError::Topology`], reporting the first failed check in
    /// this order:
    /// 1. [`TopologyError::MissingLocalPort`]
    /// 2. role checks: [`TopologyError::AmbiguousMultitapAssignment`] for a
    ///    player, [`TopologyError::SpectatorRequiresSingleHost`] then
    ///    [`TopologyError::MissingSpectatorPlayerCount`] for a spectator
    /// 3. [`TopologyError::LocalSlotOutOfRange`]
    /// 4. [`TopologyError::TooManyPlayers`]
    /// 5. [`TopologyError::TooManySpectators`], for a player only. A spectator
    ///    relays to nobody, so its spectator addresses are dropped unchecked.
    pub fn validate(&self) -> Result<Topology, NetplayError> {
        if self.local_port == 0 {
            return Err(TopologyError::MissingLocalPort.into());
        }

        let remotes = self.remotes.len();
        let player_count = match self.local_role {
            LocalRole::Player { slot } => {
                if remotes > 1 && !self.multitap {
                    return Err(TopologyError::AmbiguousMultitapAssignment { remotes }.into());
                }
                let players = remotes + 1;
                if slot >= players {
                    return Err(TopologyError::LocalSlotOutOfRange { slot, players }.into());
                }
                players
            },
            LocalRole::Spectator { expected_players } => {
                if remotes != 1 {
                    return Err(TopologyError::SpectatorRequiresSingleHost { remotes }.into());
                }
                match expected_players {
                    Some(players) if players > 0 => players,
                    _ => return Err(TopologyError::MissingSpectatorPlayerCount.into()),
                }
            },
        };

        if player_count > MULTITAP_CAPACITY {
            return Err(TopologyError::TooManyPlayers {
                players: player_count,
                max: MULTITAP_CAPACITY,
            }
            .into());
        }

        let spectators = match self.local_role {
            LocalRole::Player { .. } => self.spectators.clone(),
            LocalRole::Spectator { .. } => Vec::new(),
        };
        let max_spectators = match self.local_role {
            LocalRole::Player { .. } => self.max_spectators.unwrap_or(spectators.len()),
            LocalRole::Spectator { .. } => 0,
        };
        if spectators.len() > max_spectators {
            return Err(TopologyError::TooManySpectators {
                spectators: spectators.len(),
                max: max_spectators,
            }
            .into());
        }

        Ok(Topology {
            local_port: self.local_port,
            local_role: self.local_role,
            local_delay: self.local_delay,
            rollback_window: self.rollback_window,
            player_count,
            max_spectators,
            remotes: self.remotes.clone(),
            spectators,
            save_payload: self.save_payload,
        })
    }
}

/// One peer to attach, in canonical order. See [`Topology::peers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// Role of the peer.
    pub role: PeerRole,
    /// Remote address. `None` for the local player.
    pub address: Option<String>,
    /// Player slot. `None` for spectators.
    pub slot: Option<usize>,
}

/// A validated session layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    local_port: u16,
    local_role: LocalRole,
    local_delay: u32,
    rollback_window: usize,
    player_count: usize,
    max_spectators: usize,
    remotes: Vec<String>,
    spectators: Vec<String>,
    save_payload: SavePayload,
}

impl Topology {
    /// UDP port to listen on.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// What this machine is in the session.
    #[must_use]
    pub fn local_role(&self) -> LocalRole {
        self.local_role
    }

    /// Slot of the local player, or `None` when spectating.
    #[must_use]
    pub fn local_slot(&self) -> Option<usize> {
        match self.local_role {
            LocalRole::Player { slot } => Some(slot),
            LocalRole::Spectator { .. } => None,
        }
    }

    /// Returns `true` when this machine spectates.
    #[must_use]
    pub fn is_spectating(&self) -> bool {
        self.local_slot().is_none()
    }

    /// Local input delay in frames.
    #[must_use]
    pub fn local_delay(&self) -> u32 {
        self.local_delay
    }

    /// Rollback depth in frames.
    #[must_use]
    pub fn rollback_window(&self) -> usize {
        self.rollback_window
    }

    /// Number of players, local and remote.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.player_count
    }

    /// Number of controller ports fed from the session.
    #[must_use]
    pub fn input_slots(&self) -> usize {
        self.player_count.min(MULTITAP_CAPACITY)
    }

    /// Whether port 1 needs a multitap.
    #[must_use]
    pub fn needs_multitap(&self) -> bool {
        self.player_count > 2
    }

    /// Spectator slots to reserve.
    #[must_use]
    pub fn max_spectators(&self) -> usize {
        self.max_spectators
    }

    /// Remote player addresses, in the order they were added.
    #[must_use]
    pub fn remotes(&self) -> &[String] {
        &self.remotes
    }

    /// Spectator addresses, in the order they were added.
    #[must_use]
    pub fn spectators(&self) -> &[String] {
        &self.spectators
    }

    /// What Save updates report back.
    #[must_use]
    pub fn save_payload(&self) -> SavePayload {
        self.save_payload
    }

    /// Number of save-state slots the session needs.
    ///
    /// A player keeps `rollback_window + 2` snapshots. A spectator never rolls
    /// back further than it trails the host, so it keeps
    /// `min(rollback_window, spectator_delay) + 2`.
    #[must_use]
    pub fn state_capacity(&self, spectator_delay: usize) -> usize {
        let depth = if self.is_spectating() {
            self.rollback_window.min(spectator_delay)
        } else {
            self.rollback_window
        };
        depth + EXTRA_STATE_SLOTS
    }

    /// Peers to attach, in canonical order.
    ///
    /// Players come first by slot, the local player at its own slot and the
    /// remote players in the other slots in the order they were added.
    /// Spectators follow. When spectating, the only peer is the host in slot 0.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerSpec> {
        let Some(local_slot) = self.local_slot() else {
            return self
                .remotes
                .iter()
                .take(1)
                .map(|host| PeerSpec {
                    role: PeerRole::RemotePlayer,
                    address: Some(host.clone()),
                    slot: Some(0),
                })
                .collect();
        };

        let mut remotes = self.remotes.iter();
        let mut peers = Vec::with_capacity(self.player_count + self.spectators.len());
        for slot in 0..self.player_count {
            if slot == local_slot {
                peers.push(PeerSpec {
                    role: PeerRole::LocalPlayer,
                    address: None,
                    slot: Some(slot),
                });
            } else if let Some(address) = remotes.next() {
                peers.push(PeerSpec {
                    role: PeerRole::RemotePlayer,
                    address: Some(address.clone()),
                    slot: Some(slot),
                });
            }
        }
        peers.extend(self.spectators.iter().map(|address| PeerSpec {
            role: PeerRole::Spectator,
            address: Some(address.clone()),
            slot: None,
        }));
        peers
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

    fn topology_error(request: &StartRequest) -> TopologyError {
        match request.validate() {
            Err(NetplayError::Topology(kind)) => kind,
            other => panic!("expected a topology error, got {:?}", other),
        }
    }

    fn player(slot: usize) -> StartRequest {
        StartRequest::new()
            .with_local_port(7000)
            .with_local_role(LocalRole::Player { slot })
    }

    fn spectator(expected_players: Option<usize>) -> StartRequest {
        StartRequest::new()
            .with_local_port(7000)
            .with_local_role(LocalRole::Spectator { expected_players })
    }

    // ==========================================
    // Validation
    // ==========================================

    #[test]
    fn missing_port_is_checked_first() {
        let request = StartRequest::new()
            .with_local_role(LocalRole::Spectator {
                expected_players: None,
            })
            .add_remote("a")
            .add_remote("b");
        assert_eq!(topology_error(&request), TopologyError::MissingLocalPort);
    }

    #[test]
    fn several_remotes_need_multitap() {
        let request = player(0).add_remote("a").add_remote("b");
        assert_eq!(
            topology_error(&request),
            TopologyError::AmbiguousMultitapAssignment { remotes: 2 }
        );
        assert!(request.with_multitap(true).validate().is_ok());
    }

    #[test]
    fn spectator_needs_exactly_one_host() {
        assert_eq!(
            topology_error(&spectator(Some(2))),
            TopologyError::SpectatorRequiresSingleHost { remotes: 0 }
        );
        assert_eq!(
            topology_error(&spectator(Some(2)).add_remote("a").add_remote("b")),
            TopologyError::SpectatorRequiresSingleHost { remotes: 2 }
        );
    }

    #[test]
    fn spectator_needs_player_count() {
        assert_eq!(
            topology_error(&spectator(None).add_remote("host")),
            TopologyError::MissingSpectatorPlayerCount
        );
        assert_eq!(
            topology_error(&spectator(Some(0)).add_remote("host")),
            TopologyError::MissingSpectatorPlayerCount
        );
    }

    #[test]
    fn local_slot_must_exist() {
        assert_eq!(
            topology_error(&player(2).add_remote("a")),
            TopologyError::LocalSlotOutOfRange {
                slot: 2,
                players: 2
            }
        );
    }

    #[test]
    fn at_most_five_players() {
        let mut request = player(0).with_multitap(true);
        for index in 0..5 {
            request = request.add_remote(format!("10.0.0.{index}:7000"));
        }
        assert_eq!(
            topology_error(&request),
            TopologyError::TooManyPlayers { players: 6, max: 5 }
        );
        assert_eq!(
            topology_error(&spectator(Some(6)).add_remote("host")),
            TopologyError::TooManyPlayers { players: 6, max: 5 }
        );
    }

    #[test]
    fn spectator_cap_is_enforced() {
        let request = player(0)
            .add_remote("a")
            .add_spectator("s1")
            .add_spectator("s2")
            .with_max_spectators(1);
        assert_eq!(
            topology_error(&request),
            TopologyError::TooManySpectators {
                spectators: 2,
                max: 1
            }
        );
    }

    // ==========================================
    // Derived topology
    // ==========================================

    #[test]
    fn single_player_session() {
        let topology = player(0).validate().unwrap();
        assert_eq!(topology.player_count(), 1);
        assert_eq!(topology.input_slots(), 1);
        assert!(!topology.needs_multitap());
        assert_eq!(topology.max_spectators(), 0);
    }

    #[test]
    fn max_spectators_defaults_to_addresses_given() {
        let topology = player(0)
            .add_remote("a")
            .add_spectator("s1")
            .add_spectator("s2")
            .validate()
            .unwrap();
        assert_eq!(topology.max_spectators(), 2);
    }

    #[test]
    fn state_capacity_for_players_and_spectators() {
        let topology = player(0).with_rollback_window(8).validate().unwrap();
        assert_eq!(topology.state_capacity(90), 10);

        let watching = spectator(Some(2))
            .add_remote("host")
            .with_rollback_window(8)
            .validate()
            .unwrap();
        assert_eq!(watching.state_capacity(90), 10);
        assert_eq!(watching.state_capacity(3), 5);
    }

    #[test]
    fn canonical_order_places_local_at_its_slot() {
        let topology = player(2)
            .with_multitap(true)
            .add_remote("a")
            .add_remote("b")
            .add_remote("c")
            .add_spectator("s")
            .validate()
            .unwrap();
        let peers = topology.peers();
        let summary: Vec<_> = peers
            .iter()
            .map(|peer| (peer.role, peer.address.as_deref(), peer.slot))
            .collect();
        assert_eq!(
            summary,
            vec![
                (PeerRole::RemotePlayer, Some("a"), Some(0)),
                (PeerRole::RemotePlayer, Some("b"), Some(1)),
                (PeerRole::LocalPlayer, None, Some(2)),
                (PeerRole::RemotePlayer, Some("c"), Some(3)),
                (PeerRole::Spectator, Some("s"), None),
            ]
        );
        assert_eq!(topology.input_slots(), 4);
        assert!(topology.needs_multitap());
    }

    #[test]
    fn spectating_attaches_only_the_host() {
        let topology = spectator(Some(3))
            .add_remote("host")
            .add_spectator("ignored")
            .validate()
            .unwrap();
        assert!(topology.is_spectating());
        assert_eq!(
            topology.peers(),
            vec![PeerSpec {
                role: PeerRole::RemotePlayer,
                address: Some("host".to_owned()),
                slot: Some(0),
            }]
        );
        assert_eq!(topology.player_count(), 3);
    }

    #[test]
    fn spectating_drops_spectator_addresses_unchecked() {
        let topology = spectator(Some(2))
            .add_remote("host")
            .add_spectator("s1")
            .add_spectator("s2")
            .with_max_spectators(1)
            .validate()
            .unwrap();
        assert!(topology.spectators().is_empty());
        assert_eq!(topology.max_spectators(), 0);
        assert_eq!(topology.peers().len(), 1);
    }
}
