//! Run orchestrator.
//!
//! Wires line readers, the event dispatcher and the aggregator together for a
//! live run, and provides the offline replay path over a captured log file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use color_eyre::eyre::{Context, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::analysis::aggregator::{Aggregator, AggregatorHandle, NetworkState, StateClient};
use crate::analysis::dispatcher::{self, EventPublisher};
use crate::analysis::log_parser::{self, PATTERNS};
use crate::analysis::report::RunReport;
use crate::analysis::types::*;
use crate::config::Config;

/// Line counters of a single input stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines: usize,
    pub events: usize,
    pub dropped: usize,
}

impl ReaderStats {
    fn merge(&mut self, other: ReaderStats) {
        self.lines += other.lines;
        self.events += other.events;
        self.dropped += other.dropped;
    }
}

/// Read lines until EOF or cancellation, publishing every recognized event
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the stream.
pub fn spawn_line_reader<R>(
    reader: R,
    name: impl Into<String>,
    publisher: EventPublisher,
    cancel: CancellationToken,
) -> JoinHandle<ReaderStats>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.into();

    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        let mut stats = ReaderStats::default();

        loop {
            if cancel.is_cancelled() {
                debug!("Reader {} cancelled", name);
                break;
            }

            let segment = tokio::select! {
                _ = cancel.cancelled() => break,
                segment = segments.next_segment() => segment,
            };

            let bytes = match segment {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    warn!("Reader {} stopped on read error: {}", name, e);
                    break;
                }
            };

            stats.lines += 1;
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches('\r');

            let Some(event) = PATTERNS.match_line(line) else {
                continue;
            };

            stats.events += 1;
            let kind = event.kind();
            if !publisher.publish(event) {
                stats.dropped += 1;
                debug!("Dropped {} event from {}: queue full", kind, name);
            }
        }

        info!(
            "Reader {} finished: {} lines, {} events, {} dropped",
            name, stats.lines, stats.events, stats.dropped
        );
        stats
    })
}

/// Log run totals every `every` until cancelled
pub fn spawn_status_reporter(
    client: StateClient,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let (totals, distribution) =
                match tokio::try_join!(client.totals(), client.client_distribution()) {
                    Ok(answers) => answers,
                    Err(e) => {
                        debug!("Status reporter stopping: {}", e);
                        break;
                    }
                };

            let clients: Vec<String> = distribution
                .iter()
                .map(|(client, count)| format!("{}={}", client, count))
                .collect();

            info!(
                "Status: {} goodbyes, {} errors, clients [{}]{}",
                totals.total_goodbyes,
                totals.errors.len(),
                clients.join(", "),
                if totals.connection_failed {
                    " (connection failed)"
                } else {
                    ""
                }
            );
        }
    })
}

/// A live run: readers feeding one aggregator
pub struct Pipeline {
    publisher: EventPublisher,
    aggregator: AggregatorHandle,
    readers: Vec<JoinHandle<ReaderStats>>,
    reporter: JoinHandle<()>,
    cancel: CancellationToken,
    started_at: Timestamp,
}

impl Pipeline {
    /// Start the aggregator, status reporter and duration timer
    ///
    /// Cancelling `parent` stops the run early; the pipeline never cancels it.
    pub fn start(config: &Config, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (publisher, queues) = dispatcher::bounded(config.queue_capacity);

        let aggregator = Aggregator::spawn(NetworkState::new(), queues, cancel.clone());
        let reporter =
            spawn_status_reporter(aggregator.client(), config.report_interval, cancel.clone());

        if let Some(limit) = config.test_duration {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        info!("Test duration of {:?} elapsed, stopping", limit);
                        cancel.cancel();
                    }
                }
            });
        }

        info!("Pipeline started (queue capacity {})", config.queue_capacity);

        Self {
            publisher,
            aggregator,
            readers: Vec::new(),
            reporter,
            cancel,
            started_at: Local::now().naive_local(),
        }
    }

    /// Feed another input stream into the run
    pub fn add_reader<R>(&mut self, reader: R, name: impl Into<String>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.readers.push(spawn_line_reader(
            reader,
            name,
            self.publisher.clone(),
            self.cancel.clone(),
        ));
    }

    pub fn client(&self) -> StateClient {
        self.aggregator.client()
    }

    /// Wait for every reader to stop, then shut down and build the report
    pub async fn finish(self) -> Result<RunReport> {
        let Pipeline {
            publisher,
            aggregator,
            readers,
            reporter,
            cancel,
            started_at,
        } = self;

        let mut stats = ReaderStats::default();
        for reader in readers {
            stats.merge(reader.await.context("Line reader task failed")?);
        }
        drop(publisher);

        cancel.cancel();
        reporter.await.context("Status reporter task failed")?;

        let state = aggregator
            .finish()
            .await
            .context("Failed to collect aggregated state")?;

        info!(
            "Run finished: {} lines, {} events, {} dropped",
            stats.lines, stats.events, stats.dropped
        );

        Ok(RunReport::build(&state, started_at, Local::now().naive_local()))
    }
}

/// Watch the given inputs (stdin when empty) until EOF or cancellation
pub async fn run_watch(
    config: &Config,
    inputs: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let mut files = Vec::with_capacity(inputs.len());
    for path in inputs {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open input {}", path.display()))?;
        files.push((path.display().to_string(), file));
    }

    let mut pipeline = Pipeline::start(config, cancel);

    if files.is_empty() {
        info!("Reading crawler output from stdin");
        pipeline.add_reader(tokio::io::stdin(), "stdin");
    }

    for (name, file) in files {
        info!("Reading crawler output from {}", name);
        pipeline.add_reader(file, name);
    }

    pipeline.finish().await
}

/// Apply events in order to a fresh state
pub fn replay_events(events: impl IntoIterator<Item = Event>) -> NetworkState {
    let mut state = NetworkState::new();
    for event in events {
        state.apply(event);
    }
    state
}

/// Analyze a captured crawler log without the live pipeline
///
/// Every line is applied, so unlike a live run nothing is dropped.
pub fn replay_log_file(path: &Path) -> Result<RunReport> {
    let events = log_parser::parse_log_file(path)?;

    let now = Local::now().naive_local();
    let start = events.iter().map(Event::time).min().unwrap_or(now);
    let end = events.iter().map(Event::time).max().unwrap_or(now);

    let state = replay_events(events);
    info!("Replayed {} into {} peers", path.display(), state.peers().len());

    Ok(RunReport::build(&state, start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dispatcher::DEFAULT_QUEUE_CAPACITY;

    #[tokio::test]
    async fn test_line_reader_publishes_events() {
        let (publisher, mut queues) = dispatcher::bounded(DEFAULT_QUEUE_CAPACITY);
        let input: &[u8] = b"10:00:00.1 Connected with peer peer_id=a\r\n\
            garbage \xff\xfe line\n\
            10:00:01.0 Disconnected from handshaked peer peer_id=a";

        let stats = spawn_line_reader(input, "test", publisher, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stats,
            ReaderStats {
                lines: 3,
                events: 2,
                dropped: 0
            }
        );
        assert_eq!(queues.connection.len(), 2);
        assert!(matches!(queues.try_next(), Some(Event::Connection(c)) if c.connected));
    }

    #[tokio::test]
    async fn test_line_reader_counts_drops() {
        let (publisher, queues) = dispatcher::bounded(1);
        let input: &[u8] = b"10:00:00.1 Connected with peer peer_id=a\n\
            10:00:00.2 Connected with peer peer_id=b\n";

        let stats = spawn_line_reader(input, "test", publisher, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.events, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(queues.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_reader_stops() {
        let (publisher, queues) = dispatcher::bounded(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let input: &[u8] = b"10:00:00.1 Connected with peer peer_id=a\n";
        let stats = spawn_line_reader(input, "test", publisher, cancel)
            .await
            .unwrap();

        assert_eq!(stats.lines, 0);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_replay_events_in_order() {
        let time = Local::now().naive_local();
        let state = replay_events([
            Event::Connection(ConnectionEvent {
                peer_id: "a".to_string(),
                connected: true,
                time,
            }),
            Event::Connection(ConnectionEvent {
                peer_id: "a".to_string(),
                connected: false,
                time,
            }),
        ]);

        let peer = state.peer("a").unwrap();
        assert!(peer.disconnected);
        assert_eq!(peer.goodbye_timings.len(), 1);
    }
}
