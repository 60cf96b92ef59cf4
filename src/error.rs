use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::codec::CodecError;
use crate::Frame;

/// Reasons a session-start request was rejected before any session was created.
///
/// Returned inside [`NetplayError::Topology`] by [`StartRequest::validate`] and
/// [`RollbackSession::start`].
///
/// [`StartRequest::validate`]: crate::StartRequest::validate
/// [`RollbackSession::start`]: crate::RollbackSession::start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TopologyError {
    /// No local port was given to listen on.
    MissingLocalPort,
    /// The local player was given several remote addresses but multitap is off,
    /// so there is no controller port to map the extra players onto.
    AmbiguousMultitapAssignment {
        /// Number of remote addresses supplied.
        remotes: usize,
    },
    /// A spectator connects to exactly one host.
    SpectatorRequiresSingleHost {
        /// Number of remote addresses supplied.
        remotes: usize,
    },
    /// A spectator must declare how many players the host session has.
    MissingSpectatorPlayerCount,
    /// The local player slot does not exist in the resulting topology.
    LocalSlotOutOfRange {
        /// The requested slot.
        slot: usize,
        /// Number of players in the topology.
        players: usize,
    },
    /// More players than controller ports available through the multitap.
    TooManyPlayers {
        /// Number of players in the topology.
        players: usize,
        /// Maximum supported number of players.
        max: usize,
    },
    /// More spectator addresses than the configured maximum.
    TooManySpectators {
        /// Number of spectator addresses supplied.
        spectators: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::MissingLocalPort => write!(f, "a local port is required"),
            TopologyError::AmbiguousMultitapAssignment { remotes } => write!(
                f,
                "{} remote players require multitap to be enabled",
                remotes
            ),
            TopologyError::SpectatorRequiresSingleHost { remotes } => write!(
                f,
                "a spectator connects to exactly one host, got {} addresses",
                remotes
            ),
            TopologyError::MissingSpectatorPlayerCount => {
                write!(f, "a spectator must declare the host's player count")
            },
            TopologyError::LocalSlotOutOfRange { slot, players } => write!(
                f,
                "local slot {} is outside a {}-player topology",
                slot, players
            ),
            TopologyError::TooManyPlayers { players, max } => {
                write!(f, "{} players exceed the maximum of {}", players, max)
            },
            TopologyError::TooManySpectators { spectators, max } => {
                write!(f, "{} spectators exceed the maximum of {}", spectators, max)
            },
        }
    }
}

/// This enum contains all errors this library can return.
///
/// Only [`NetplayError::Topology`] and [`NetplayError::Transport`] ever reach the caller
/// of [`RollbackSession::start`]. Everything else is produced inside the tick loop,
/// where it is logged and recovered from, except [`NetplayError::StateBufferExhausted`]
/// which tears the session down.
///
/// [`RollbackSession::start`]: crate::RollbackSession::start
#[derive(Debug, Clone, PartialEq)]
pub enum NetplayError {
    /// The session-start request describes an invalid topology.
    Topology(TopologyError),
    /// The session transport could not be created or configured.
    Transport {
        /// A description of what failed.
        context: String,
    },
    /// A save-state slot could not grow to hold a snapshot.
    StateBufferExhausted {
        /// The frame that was being saved.
        frame: Frame,
        /// The snapshot size in bytes.
        requested: usize,
    },
    /// A negative frame number reached the save-state store.
    InvalidFrame {
        /// The frame that was rejected.
        frame: Frame,
    },
    /// An input block could not be encoded or decoded.
    Codec(CodecError),
}

impl Display for NetplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetplayError::Topology(kind) => write!(f, "Invalid topology: {}", kind),
            NetplayError::Transport { context } => write!(f, "Transport error: {}", context),
            NetplayError::StateBufferExhausted { frame, requested } => write!(
                f,
                "Could not allocate {} bytes for the snapshot of frame {}",
                requested, frame
            ),
            NetplayError::InvalidFrame { frame } => {
                write!(f, "Invalid frame {}: frame must be non-negative", frame)
            },
            NetplayError::Codec(err) => write!(f, "Codec error: {}", err),
        }
    }
}

impl Error for NetplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetplayError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TopologyError> for NetplayError {
    fn from(kind: TopologyError) -> Self {
        NetplayError::Topology(kind)
    }
}

impl From<CodecError> for NetplayError {
    fn from(err: CodecError) -> Self {
        NetplayError::Codec(err)
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
    use crate::codec::CodecOperation;

    #[test]
    fn topology_error_converts_into_netplay_error() {
        let err: NetplayError = TopologyError::MissingSpectatorPlayerCount.into();
        assert_eq!(
            err,
            NetplayError::Topology(TopologyError::MissingSpectatorPlayerCount)
        );
    }

    #[test]
    fn topology_display_names_the_counts() {
        let err = NetplayError::from(TopologyError::AmbiguousMultitapAssignment { remotes: 3 });
        let text = err.to_string();
        assert!(text.contains("Invalid topology"));
        assert!(text.contains('3'));
        assert!(text.contains("multitap"));
    }

    #[test]
    fn exhausted_display_mentions_frame_and_size() {
        let err = NetplayError::StateBufferExhausted {
            frame: Frame::new(42),
            requested: 4096,
        };
        let text = err.to_string();
        assert!(text.contains("4096"));
        assert!(text.contains("42"));
    }

    #[test]
    fn codec_errors_expose_their_source() {
        let err = NetplayError::from(CodecError::decode("truncated", CodecOperation::DecodeInputBlock));
        assert!(err.source().is_some());
        assert!(NetplayError::InvalidFrame {
            frame: Frame::new(-3)
        }
        .source()
        .is_none());
    }
}
