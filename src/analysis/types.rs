//! Core data types for peer connection and goodbye analysis.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp of a log line (current local date + logged time of day)
pub type Timestamp = NaiveDateTime;

/// Number of peer id characters shown in log output
pub const SHORT_PEER_ID_LENGTH: usize = 12;

/// Client type used when a peer never reported an agent
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Shorten a peer id for log output without splitting a character
pub fn short_peer_id(peer_id: &str) -> &str {
    match peer_id.char_indices().nth(SHORT_PEER_ID_LENGTH) {
        Some((idx, _)) => &peer_id[..idx],
        None => peer_id,
    }
}

/// Reason recorded for a goodbye timing entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GoodbyeReason {
    /// Reason text sent by the remote peer
    Received(String),
    /// Synthesized when a peer disconnects without ever sending a goodbye
    DisconnectWithoutGoodbye,
}

impl GoodbyeReason {
    /// Textual form of the synthetic reason
    pub const DISCONNECT_WITHOUT_GOODBYE: &'static str = "disconnect_without_goodbye";

    pub fn as_str(&self) -> &str {
        match self {
            GoodbyeReason::Received(reason) => reason,
            GoodbyeReason::DisconnectWithoutGoodbye => Self::DISCONNECT_WITHOUT_GOODBYE,
        }
    }

    /// True when no goodbye message was actually received
    pub fn is_synthetic(&self) -> bool {
        matches!(self, GoodbyeReason::DisconnectWithoutGoodbye)
    }
}

impl From<String> for GoodbyeReason {
    fn from(reason: String) -> Self {
        if reason == Self::DISCONNECT_WITHOUT_GOODBYE {
            GoodbyeReason::DisconnectWithoutGoodbye
        } else {
            GoodbyeReason::Received(reason)
        }
    }
}

impl From<GoodbyeReason> for String {
    fn from(reason: GoodbyeReason) -> Self {
        match reason {
            GoodbyeReason::Received(reason) => reason,
            GoodbyeReason::DisconnectWithoutGoodbye => {
                GoodbyeReason::DISCONNECT_WITHOUT_GOODBYE.to_string()
            }
        }
    }
}

impl fmt::Display for GoodbyeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing details of a single goodbye from a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodbyeTiming {
    pub reason: GoodbyeReason,
    pub timestamp: Timestamp,
    /// Time since the connection was established (zero if unknown)
    #[serde(with = "humantime_serde")]
    pub duration_from_start: Duration,
    /// 1-based position of this goodbye for the peer
    pub sequence: usize,
}

/// Accumulated state of a single remote peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub connected_at: Option<Timestamp>,
    pub disconnected_at: Option<Timestamp>,
    pub disconnected: bool,
    #[serde(with = "humantime_serde")]
    pub connection_duration: Duration,
    pub handshake_ok: bool,
    pub client_type: Option<String>,
    pub goodbye_count: usize,
    pub last_goodbye: Option<String>,
    pub goodbye_timings: Vec<GoodbyeTiming>,
    pub first_goodbye_at: Option<Timestamp>,
    #[serde(with = "humantime_serde")]
    pub time_to_first_goodbye: Duration,
    pub reconnection_attempts: usize,
}

impl PeerRecord {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ..Default::default()
        }
    }

    /// Client family, or "unknown" if the peer never completed a handshake
    pub fn client_or_unknown(&self) -> &str {
        self.client_type.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }
}

/// Peer connected or disconnected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub peer_id: String,
    pub connected: bool,
    pub time: Timestamp,
}

/// Status handshake completed with a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeEvent {
    pub peer_id: String,
    pub success: bool,
    pub agent: String,
    pub seq_number: u64,
    pub fork_digest: String,
    pub time: Timestamp,
}

/// Goodbye message received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodbyeEvent {
    pub peer_id: String,
    pub reason: String,
    pub time: Timestamp,
}

/// Upstream failure reported by the crawler process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
    pub time: Timestamp,
}

/// Event extracted from a single log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connection(ConnectionEvent),
    Handshake(HandshakeEvent),
    Goodbye(GoodbyeEvent),
    Error(ErrorEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connection(_) => EventKind::Connection,
            Event::Handshake(_) => EventKind::Handshake,
            Event::Goodbye(_) => EventKind::Goodbye,
            Event::Error(_) => EventKind::Error,
        }
    }

    pub fn time(&self) -> Timestamp {
        match self {
            Event::Connection(e) => e.time,
            Event::Handshake(e) => e.time,
            Event::Goodbye(e) => e.time,
            Event::Error(e) => e.time,
        }
    }
}

/// Event category, one dispatcher queue each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Handshake,
    Goodbye,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Connection => write!(f, "connection"),
            EventKind::Handshake => write!(f, "handshake"),
            EventKind::Goodbye => write!(f, "goodbye"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

/// Copy of the process-wide counters of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_goodbyes: usize,
    pub goodbye_reasons: BTreeMap<String, usize>,
    pub goodbyes_by_client: BTreeMap<String, BTreeMap<String, usize>>,
    pub errors: Vec<String>,
    pub connection_failed: bool,
}

/// Timing statistics for one goodbye reason
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodbyeReasonTiming {
    pub reason: String,
    pub count: usize,
    #[serde(with = "humantime_serde")]
    pub average_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub median_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    pub client_breakdown: BTreeMap<String, usize>,
}

/// A recurring timing pattern for a client and goodbye reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPattern {
    /// Client family, or "all" for patterns across every client
    pub client_type: String,
    pub goodbye_reason: String,
    #[serde(with = "humantime_serde")]
    pub average_duration: Duration,
    pub occurrences: usize,
    /// Human-readable description
    pub pattern: String,
}

/// Timing correlation analysis for a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTiming {
    pub total_connections: usize,
    #[serde(with = "humantime_serde")]
    pub average_connection_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub median_connection_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub fastest_disconnect: Duration,
    #[serde(with = "humantime_serde")]
    pub longest_connection: Duration,
    pub goodbye_reason_timings: BTreeMap<String, GoodbyeReasonTiming>,
    pub client_specific_timings: BTreeMap<String, BTreeMap<String, GoodbyeReasonTiming>>,
    pub client_timing_patterns: Vec<TimingPattern>,
    pub suspicious_patterns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goodbye_reason_string_forms() {
        let synthetic = GoodbyeReason::from("disconnect_without_goodbye".to_string());
        assert!(synthetic.is_synthetic());
        assert_eq!(synthetic.to_string(), "disconnect_without_goodbye");

        let received = GoodbyeReason::from("client shutdown".to_string());
        assert_eq!(received, GoodbyeReason::Received("client shutdown".to_string()));
        assert_eq!(String::from(received), "client shutdown");
    }

    #[test]
    fn test_short_peer_id() {
        assert_eq!(short_peer_id("16Uiu2HAmABCDEFGHIJ"), "16Uiu2HAmABC");
        assert_eq!(short_peer_id("abc"), "abc");
    }

    #[test]
    fn test_client_or_unknown() {
        let mut peer = PeerRecord::new("abc");
        assert_eq!(peer.client_or_unknown(), "unknown");
        peer.client_type = Some("teku".to_string());
        assert_eq!(peer.client_or_unknown(), "teku");
    }
}
