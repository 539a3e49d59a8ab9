//! Per-peer state aggregation.
//!
//! [`NetworkState`] holds every peer record and the run-wide counters and
//! knows how to apply each event variant. At runtime it is owned by a single
//! [`Aggregator`] task that drains the dispatcher queues and answers queries
//! over a request channel, so mutation is serialized without a lock and
//! callers only ever see copies.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::EventQueues;
use super::severity::classify;
use super::timing;
use super::types::*;

/// Client families recognized in agent strings, in match order
pub const KNOWN_CLIENTS: [&str; 8] = [
    "lighthouse",
    "prysm",
    "nimbus",
    "lodestar",
    "grandine",
    "teku",
    "erigon",
    "caplin",
];

/// Error messages that mark the whole run as failed
const CONNECTION_FAILURE_MARKERS: [&str; 2] =
    ["Connection to beacon node failed", "terminated abnormally"];

/// Capacity of the query channel
const QUERY_CAPACITY: usize = 16;

/// Map an agent string to its client family
pub fn normalize_client_type(agent: &str) -> String {
    let agent = agent.to_lowercase();

    if let Some(client) = KNOWN_CLIENTS.iter().find(|c| agent.contains(*c)) {
        return client.to_string();
    }

    info!("Unidentified user agent: {}", agent);

    match agent.split('/').next() {
        Some(prefix) if !prefix.is_empty() => prefix.to_string(),
        _ => UNKNOWN_CLIENT.to_string(),
    }
}

/// Non-negative time between two log timestamps
fn elapsed(from: Timestamp, to: Timestamp) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

/// All peer records and counters of a run
#[derive(Debug, Clone, Default)]
pub struct NetworkState {
    peers: HashMap<String, PeerRecord>,
    totals: RunTotals,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply any event through its handler
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Connection(e) => self.handle_connection(e),
            Event::Handshake(e) => self.handle_handshake(e),
            Event::Goodbye(e) => self.handle_goodbye(e),
            Event::Error(e) => self.handle_error(e),
        }
    }

    pub fn handle_connection(&mut self, event: ConnectionEvent) {
        let ConnectionEvent {
            peer_id,
            connected,
            time,
        } = event;

        let Some(peer) = self.peers.get_mut(&peer_id) else {
            if connected {
                info!("New peer connection {}", short_peer_id(&peer_id));
                let mut peer = PeerRecord::new(peer_id.clone());
                peer.connected_at = Some(time);
                self.peers.insert(peer_id, peer);
            } else {
                debug!("Disconnect from unknown peer {}", short_peer_id(&peer_id));
            }
            return;
        };

        if connected {
            peer.reconnection_attempts += 1;
            peer.connected_at = Some(time);
            peer.disconnected = false;
            peer.disconnected_at = None;

            info!(
                "Peer {} reconnected (attempt {})",
                short_peer_id(&peer_id),
                peer.reconnection_attempts
            );
            return;
        }

        if peer.disconnected {
            warn!("Received duplicate disconnect for peer {}", short_peer_id(&peer_id));
            return;
        }

        peer.disconnected = true;
        peer.disconnected_at = Some(time);

        if let Some(connected_at) = peer.connected_at {
            peer.connection_duration = elapsed(connected_at, time);
        }

        // first_goodbye_at stays unset: no goodbye was ever received
        if peer.goodbye_count == 0 && peer.goodbye_timings.is_empty() {
            peer.goodbye_timings.push(GoodbyeTiming {
                reason: GoodbyeReason::DisconnectWithoutGoodbye,
                timestamp: time,
                duration_from_start: peer.connection_duration,
                sequence: 1,
            });
        }

        info!(
            "Peer {} ({}) disconnected after {}s",
            short_peer_id(&peer_id),
            peer.client_or_unknown(),
            peer.connection_duration.as_secs()
        );
    }

    pub fn handle_handshake(&mut self, event: HandshakeEvent) {
        let client_type = normalize_client_type(&event.agent);

        let peer = self
            .peers
            .entry(event.peer_id.clone())
            .or_insert_with(|| {
                let mut peer = PeerRecord::new(event.peer_id.clone());
                peer.connected_at = Some(event.time);
                peer
            });

        peer.handshake_ok = event.success;
        peer.client_type = Some(client_type.clone());

        let result = if event.success { "success" } else { "failure" };
        info!(
            "Handshake {} with {} ({}, seq={}, fork-digest={})",
            result,
            short_peer_id(&event.peer_id),
            client_type,
            event.seq_number,
            event.fork_digest
        );
    }

    pub fn handle_goodbye(&mut self, event: GoodbyeEvent) {
        let GoodbyeEvent {
            peer_id,
            reason,
            time,
        } = event;

        self.totals.total_goodbyes += 1;
        *self.totals.goodbye_reasons.entry(reason.clone()).or_insert(0) += 1;

        let mut after_connect = None;
        let client_type = match self.peers.get_mut(&peer_id) {
            Some(peer) => {
                peer.goodbye_count += 1;
                peer.last_goodbye = Some(reason.clone());

                let duration_from_start = match peer.connected_at {
                    Some(connected_at) => {
                        let d = elapsed(connected_at, time);
                        after_connect = Some(d);
                        d
                    }
                    None => Duration::ZERO,
                };

                if peer.goodbye_count == 1 {
                    peer.first_goodbye_at = Some(time);
                    peer.time_to_first_goodbye = duration_from_start;
                }

                let sequence = peer.goodbye_timings.len() + 1;
                peer.goodbye_timings.push(GoodbyeTiming {
                    reason: GoodbyeReason::Received(reason.clone()),
                    timestamp: time,
                    duration_from_start,
                    sequence,
                });

                // Covers peers that say goodbye without a disconnect line
                if !peer.disconnected {
                    peer.connection_duration = duration_from_start;
                }

                peer.client_or_unknown().to_string()
            }
            None => {
                let mut peer = PeerRecord::new(peer_id.clone());
                peer.goodbye_count = 1;
                peer.last_goodbye = Some(reason.clone());
                peer.first_goodbye_at = Some(time);
                peer.goodbye_timings.push(GoodbyeTiming {
                    reason: GoodbyeReason::Received(reason.clone()),
                    timestamp: time,
                    duration_from_start: Duration::ZERO,
                    sequence: 1,
                });
                self.peers.insert(peer_id.clone(), peer);

                UNKNOWN_CLIENT.to_string()
            }
        };

        *self
            .totals
            .goodbyes_by_client
            .entry(client_type.clone())
            .or_default()
            .entry(reason.clone())
            .or_insert(0) += 1;

        let timing_info = after_connect
            .map(|d| format!(" (after {}s)", d.as_secs()))
            .unwrap_or_default();

        info!(
            "Goodbye [{}] from {} ({}): {}{}",
            classify(&reason),
            short_peer_id(&peer_id),
            client_type,
            reason,
            timing_info
        );
    }

    pub fn handle_error(&mut self, event: ErrorEvent) {
        error!("{}", event.message);

        if CONNECTION_FAILURE_MARKERS
            .iter()
            .any(|marker| event.message.contains(marker))
        {
            self.totals.connection_failed = true;
        }

        self.totals.errors.push(event.message);
    }

    pub fn peer(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn peers(&self) -> &HashMap<String, PeerRecord> {
        &self.peers
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    pub fn connection_failed(&self) -> bool {
        self.totals.connection_failed
    }

    /// Deep copy of every peer record
    pub fn snapshot_peers(&self) -> HashMap<String, PeerRecord> {
        self.peers.clone()
    }

    /// Number of handshaked peers per client family
    pub fn client_distribution(&self) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for peer in self.peers.values().filter(|p| p.handshake_ok) {
            *distribution
                .entry(peer.client_or_unknown().to_string())
                .or_insert(0) += 1;
        }
        distribution
    }
}

/// Errors returned when talking to the aggregator task
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("aggregator is no longer running")]
    Stopped,
    #[error("aggregator task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

enum Query {
    SnapshotPeers(oneshot::Sender<HashMap<String, PeerRecord>>),
    ClientDistribution(oneshot::Sender<BTreeMap<String, usize>>),
    Totals(oneshot::Sender<RunTotals>),
    Finish,
}

/// Task that exclusively owns the network state
pub struct Aggregator {
    state: NetworkState,
    queues: EventQueues,
    queries: mpsc::Receiver<Query>,
    cancel: CancellationToken,
}

impl Aggregator {
    /// Spawn the aggregator on the current tokio runtime
    pub fn spawn(
        state: NetworkState,
        queues: EventQueues,
        cancel: CancellationToken,
    ) -> AggregatorHandle {
        let (query_tx, query_rx) = mpsc::channel(QUERY_CAPACITY);

        let aggregator = Aggregator {
            state,
            queues,
            queries: query_rx,
            cancel,
        };

        AggregatorHandle {
            client: StateClient { queries: query_tx },
            task: tokio::spawn(aggregator.run()),
        }
    }

    async fn run(mut self) -> NetworkState {
        info!("Aggregator started");

        loop {
            if self.cancel.is_cancelled() {
                info!("Aggregator cancelled");
                self.drain();
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                Some(e) = self.queues.connection.recv() => self.state.handle_connection(e),
                Some(e) = self.queues.handshake.recv() => self.state.handle_handshake(e),
                Some(e) = self.queues.goodbye.recv() => self.state.handle_goodbye(e),
                Some(e) = self.queues.error.recv() => self.state.handle_error(e),
                query = self.queries.recv() => match query {
                    Some(Query::Finish) | None => {
                        self.drain();
                        break;
                    }
                    Some(query) => self.answer(query),
                },
            }
        }

        info!("Aggregator stopped with {} peers", self.state.peers.len());
        self.state
    }

    /// Apply everything still buffered in the queues
    fn drain(&mut self) {
        let mut drained = 0;
        while let Some(event) = self.queues.try_next() {
            self.state.apply(event);
            drained += 1;
        }
        debug!("Drained {} queued events", drained);
    }

    fn answer(&self, query: Query) {
        // A requester that went away no longer needs the answer
        match query {
            Query::SnapshotPeers(reply) => {
                let _ = reply.send(self.state.snapshot_peers());
            }
            Query::ClientDistribution(reply) => {
                let _ = reply.send(self.state.client_distribution());
            }
            Query::Totals(reply) => {
                let _ = reply.send(self.state.totals.clone());
            }
            Query::Finish => {}
        }
    }
}

/// Cloneable query side of the aggregator
#[derive(Debug, Clone)]
pub struct StateClient {
    queries: mpsc::Sender<Query>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::SnapshotPeers(_) => write!(f, "SnapshotPeers"),
            Query::ClientDistribution(_) => write!(f, "ClientDistribution"),
            Query::Totals(_) => write!(f, "Totals"),
            Query::Finish => write!(f, "Finish"),
        }
    }
}

impl StateClient {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, AggregatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queries
            .send(make(reply_tx))
            .await
            .map_err(|_| AggregatorError::Stopped)?;
        reply_rx.await.map_err(|_| AggregatorError::Stopped)
    }

    /// Deep copy of every peer record
    pub async fn snapshot_peers(&self) -> Result<HashMap<String, PeerRecord>, AggregatorError> {
        self.request(Query::SnapshotPeers).await
    }

    /// Number of handshaked peers per client family
    pub async fn client_distribution(&self) -> Result<BTreeMap<String, usize>, AggregatorError> {
        self.request(Query::ClientDistribution).await
    }

    pub async fn totals(&self) -> Result<RunTotals, AggregatorError> {
        self.request(Query::Totals).await
    }

    /// Timing analysis over a fresh snapshot, computed on the caller's task
    pub async fn analyze_connection_timing(&self) -> Result<ConnectionTiming, AggregatorError> {
        let peers = self.snapshot_peers().await?;
        Ok(timing::analyze_connection_timing(&peers))
    }
}

/// Owner handle of a running aggregator
#[derive(Debug)]
pub struct AggregatorHandle {
    client: StateClient,
    task: JoinHandle<NetworkState>,
}

impl AggregatorHandle {
    pub fn client(&self) -> StateClient {
        self.client.clone()
    }

    /// Apply what is still queued, stop the task and return the final state
    pub async fn finish(self) -> Result<NetworkState, AggregatorError> {
        // Already stopped (cancelled) is fine: the task still returns its state
        let _ = self.client.queries.send(Query::Finish).await;
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dispatcher;
    use chrono::{NaiveDate, TimeDelta};

    fn at(secs: i64) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn connection(peer_id: &str, connected: bool, secs: i64) -> ConnectionEvent {
        ConnectionEvent {
            peer_id: peer_id.to_string(),
            connected,
            time: at(secs),
        }
    }

    fn goodbye(peer_id: &str, reason: &str, secs: i64) -> GoodbyeEvent {
        GoodbyeEvent {
            peer_id: peer_id.to_string(),
            reason: reason.to_string(),
            time: at(secs),
        }
    }

    fn handshake(peer_id: &str, agent: &str, secs: i64) -> HandshakeEvent {
        HandshakeEvent {
            peer_id: peer_id.to_string(),
            success: true,
            agent: agent.to_string(),
            seq_number: 5,
            fork_digest: "0x1234".to_string(),
            time: at(secs),
        }
    }

    #[test]
    fn test_normalize_client_type() {
        assert_eq!(normalize_client_type("Lighthouse/v4.0.1/x86_64-linux"), "lighthouse");
        assert_eq!(normalize_client_type("teku/v23.1.0"), "teku");
        assert_eq!(normalize_client_type("erigon/caplin"), "erigon");
        assert_eq!(normalize_client_type("Reth/v1.0"), "reth");
        assert_eq!(normalize_client_type("mystery"), "mystery");
        assert_eq!(normalize_client_type("/weird"), "unknown");
        assert_eq!(normalize_client_type(""), "unknown");
    }

    #[test]
    fn test_connect_creates_peer() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));

        let peer = state.peer("a").unwrap();
        assert_eq!(peer.connected_at, Some(at(0)));
        assert!(!peer.disconnected);
        assert_eq!(peer.reconnection_attempts, 0);
    }

    #[test]
    fn test_disconnect_of_unknown_peer_is_ignored() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("ghost", false, 0));
        assert!(state.peer("ghost").is_none());
    }

    #[test]
    fn test_disconnect_without_goodbye_is_synthesized() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));
        state.handle_connection(connection("a", false, 42));

        let peer = state.peer("a").unwrap();
        assert!(peer.disconnected);
        assert_eq!(peer.disconnected_at, Some(at(42)));
        assert_eq!(peer.connection_duration, Duration::from_secs(42));
        assert_eq!(peer.goodbye_timings.len(), 1);
        assert_eq!(
            peer.goodbye_timings[0].reason,
            GoodbyeReason::DisconnectWithoutGoodbye
        );
        assert_eq!(peer.goodbye_timings[0].sequence, 1);
        assert_eq!(peer.goodbye_timings[0].duration_from_start, Duration::from_secs(42));
        assert!(peer.first_goodbye_at.is_none());
        assert_eq!(peer.goodbye_count, 0);
    }

    #[test]
    fn test_duplicate_disconnect_is_noop() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));
        state.handle_connection(connection("a", false, 10));
        let before = state.peer("a").unwrap().clone();

        state.handle_connection(connection("a", false, 99));

        assert_eq!(state.peer("a").unwrap(), &before);
    }

    #[test]
    fn test_reconnection_clears_disconnect() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));
        state.handle_connection(connection("a", false, 10));
        state.handle_connection(connection("a", true, 20));

        let peer = state.peer("a").unwrap();
        assert!(!peer.disconnected);
        assert!(peer.disconnected_at.is_none());
        assert_eq!(peer.connected_at, Some(at(20)));
        assert_eq!(peer.reconnection_attempts, 1);
    }

    #[test]
    fn test_disconnected_tracks_last_connection_event() {
        let mut state = NetworkState::new();
        let toggles = [true, false, false, true, true, false, true, false, false, true];

        for (i, &connected) in toggles.iter().enumerate() {
            state.handle_connection(connection("a", connected, i as i64));
            let peer = state.peer("a").unwrap();
            assert_eq!(peer.disconnected, !connected, "after event {}", i);
            if connected {
                assert!(peer.disconnected_at.is_none());
            }
        }
    }

    #[test]
    fn test_handshake_sets_client() {
        let mut state = NetworkState::new();
        state.handle_handshake(handshake("a", "Prysm/v5.0.0/abc", 3));

        let peer = state.peer("a").unwrap();
        assert!(peer.handshake_ok);
        assert_eq!(peer.client_type.as_deref(), Some("prysm"));
        assert_eq!(peer.connected_at, Some(at(3)));
    }

    #[test]
    fn test_goodbye_for_known_peer() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));
        state.handle_handshake(handshake("a", "nimbus", 1));
        state.handle_goodbye(goodbye("a", "client has too many peers", 30));
        state.handle_goodbye(goodbye("a", "client shutdown", 45));

        let peer = state.peer("a").unwrap();
        assert_eq!(peer.goodbye_count, 2);
        assert_eq!(peer.last_goodbye.as_deref(), Some("client shutdown"));
        assert_eq!(peer.first_goodbye_at, Some(at(30)));
        assert_eq!(peer.time_to_first_goodbye, Duration::from_secs(30));
        assert_eq!(peer.connection_duration, Duration::from_secs(45));
        for (i, timing) in peer.goodbye_timings.iter().enumerate() {
            assert_eq!(timing.sequence, i + 1);
        }

        let totals = state.totals();
        assert_eq!(totals.total_goodbyes, 2);
        assert_eq!(totals.goodbyes_by_client["nimbus"]["client shutdown"], 1);
    }

    #[test]
    fn test_goodbye_after_disconnect_keeps_duration() {
        let mut state = NetworkState::new();
        state.handle_connection(connection("a", true, 0));
        state.handle_connection(connection("a", false, 10));
        state.handle_goodbye(goodbye("a", "client shutdown", 15));

        let peer = state.peer("a").unwrap();
        assert_eq!(peer.connection_duration, Duration::from_secs(10));
        assert_eq!(peer.goodbye_timings.len(), 2);
        assert_eq!(peer.goodbye_timings[1].sequence, 2);
        assert_eq!(peer.first_goodbye_at, Some(at(15)));
    }

    #[test]
    fn test_goodbye_for_unknown_peer() {
        let mut state = NetworkState::new();
        state.handle_goodbye(goodbye("stranger", "irrelevant network", 5));

        let peer = state.peer("stranger").unwrap();
        assert!(peer.connected_at.is_none());
        assert_eq!(peer.goodbye_count, 1);
        assert_eq!(peer.first_goodbye_at, Some(at(5)));
        assert_eq!(peer.goodbye_timings[0].duration_from_start, Duration::ZERO);

        let totals = state.totals();
        assert_eq!(totals.total_goodbyes, 1);
        assert_eq!(totals.goodbye_reasons["irrelevant network"], 1);
        assert_eq!(totals.goodbyes_by_client["unknown"]["irrelevant network"], 1);
    }

    #[test]
    fn test_goodbye_counters_increment_by_one() {
        let mut state = NetworkState::new();
        state.handle_handshake(handshake("a", "lodestar/v1", 0));

        for n in 1..=5 {
            state.handle_goodbye(goodbye("a", "peer score too low", n));
            let totals = state.totals();
            assert_eq!(totals.goodbye_reasons["peer score too low"], n as usize);
            assert_eq!(
                totals.goodbyes_by_client["lodestar"]["peer score too low"],
                n as usize
            );
        }
    }

    #[test]
    fn test_connection_failed_is_sticky() {
        let mut state = NetworkState::new();
        state.handle_error(ErrorEvent {
            message: "Waiting for dialback from Prysm node".to_string(),
            time: at(0),
        });
        assert!(!state.connection_failed());

        state.handle_error(ErrorEvent {
            message: "Connection to beacon node failed: refused".to_string(),
            time: at(1),
        });
        assert!(state.connection_failed());

        state.handle_connection(connection("a", true, 2));
        state.handle_goodbye(goodbye("a", "client shutdown", 3));
        state.handle_error(ErrorEvent {
            message: "something else".to_string(),
            time: at(4),
        });
        assert!(state.connection_failed());
        assert_eq!(state.totals().errors.len(), 3);
    }

    #[test]
    fn test_client_distribution_counts_handshaked_peers() {
        let mut state = NetworkState::new();
        state.handle_handshake(handshake("a", "lighthouse/v4", 0));
        state.handle_handshake(handshake("b", "lighthouse/v5", 0));
        state.handle_handshake(handshake("c", "teku", 0));
        state.handle_connection(connection("d", true, 0));

        let distribution = state.client_distribution();
        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution["lighthouse"], 2);
        assert_eq!(distribution["teku"], 1);
    }

    #[tokio::test]
    async fn test_aggregator_applies_and_answers() {
        let (publisher, queues) = dispatcher::bounded(10);
        let cancel = CancellationToken::new();
        let handle = Aggregator::spawn(NetworkState::new(), queues, cancel);
        let client = handle.client();

        assert!(publisher.publish(Event::Handshake(handshake("a", "grandine", 0))));

        let mut peers = HashMap::new();
        for _ in 0..100 {
            peers = client.snapshot_peers().await.unwrap();
            if !peers.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(peers["a"].client_type.as_deref(), Some("grandine"));

        let distribution = client.client_distribution().await.unwrap();
        assert_eq!(distribution["grandine"], 1);

        let state = handle.finish().await.unwrap();
        assert_eq!(state.peers().len(), 1);
        assert!(matches!(client.totals().await, Err(AggregatorError::Stopped)));
    }

    #[tokio::test]
    async fn test_overflowing_queue_applies_only_buffered_events() {
        let (publisher, queues) = dispatcher::bounded(dispatcher::DEFAULT_QUEUE_CAPACITY);

        for i in 0..=dispatcher::DEFAULT_QUEUE_CAPACITY {
            publisher.publish(Event::Connection(connection(&format!("peer{}", i), true, 0)));
        }

        let handle = Aggregator::spawn(NetworkState::new(), queues, CancellationToken::new());
        let state = handle.finish().await.unwrap();

        assert_eq!(state.peers().len(), dispatcher::DEFAULT_QUEUE_CAPACITY);
        assert!(state.peer(&format!("peer{}", dispatcher::DEFAULT_QUEUE_CAPACITY)).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_aggregator_returns_state() {
        let (_publisher, queues) = dispatcher::bounded(4);
        let cancel = CancellationToken::new();
        let handle = Aggregator::spawn(NetworkState::new(), queues, cancel.clone());

        cancel.cancel();
        let state = handle.finish().await.unwrap();
        assert!(state.peers().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_applies_buffered_events() {
        let (publisher, queues) = dispatcher::bounded(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        publisher.publish(Event::Connection(connection("a", true, 0)));
        publisher.publish(Event::Goodbye(goodbye("a", "client shutdown", 9)));

        let handle = Aggregator::spawn(NetworkState::new(), queues, cancel);
        let state = handle.finish().await.unwrap();
        assert_eq!(state.peer("a").unwrap().goodbye_count, 1);
    }
}
