/// Connection statistics for one remote peer, as last reported by the transport.
///
/// The tick loop refreshes these once per tick for every remote player; the most
/// recent sample replaces the previous one.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[must_use = "NetStats should be inspected or used after being queried"]
pub struct NetStats {
    /// Round-trip time of the most recent ping, in milliseconds.
    pub ping_ms: u32,
    /// Rolling average round-trip time, in milliseconds.
    pub avg_ping_ms: f32,
    /// Variation of the round-trip time around its average, in milliseconds.
    pub jitter_ms: f32,
    /// Frames this peer runs ahead of the remote peer. Negative when behind.
    pub frame_advantage: f32,
}

impl NetStats {
    /// Creates a new `NetStats` instance with default values.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for NetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            ping_ms,
            avg_ping_ms,
            jitter_ms,
            frame_advantage,
        } = self;

        write!(
            f,
            "NetStats {{ ping: {}ms, avg: {:.1}ms, jitter: {:.1}ms, advantage: {:+.1} }}",
            ping_ms, avg_ping_ms, jitter_ms, frame_advantage
        )
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

    #[test]
    fn default_is_zeroed() {
        let stats = NetStats::new();
        assert_eq!(stats.ping_ms, 0);
        assert!(stats.avg_ping_ms.abs() < f32::EPSILON);
        assert_eq!(stats, NetStats::default());
    }

    #[test]
    fn display_formats_every_field() {
        let stats = NetStats {
            ping_ms: 48,
            avg_ping_ms: 45.0,
            jitter_ms: 3.0,
            frame_advantage: -1.5,
        };
        assert_eq!(
            stats.to_string(),
            "NetStats { ping: 48ms, avg: 45.0ms, jitter: 3.0ms, advantage: -1.5 }"
        );
    }

    #[test]
    fn display_signs_positive_advantage() {
        let stats = NetStats {
            frame_advantage: 2.0,
            ..NetStats::default()
        };
        assert!(stats.to_string().contains("advantage: +2.0"));
    }
}
