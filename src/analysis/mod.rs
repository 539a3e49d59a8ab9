//! Crawler log analysis.
//!
//! This module turns the crawler's log lines into typed events, aggregates
//! them into per-peer state, and derives connection timing patterns that
//! hint at our node being downscored by the network.

pub mod types;
pub mod severity;
pub mod log_parser;
pub mod dispatcher;
pub mod aggregator;
pub mod timing;
pub mod report;

pub use types::*;
pub use severity::{classify, Severity};
pub use log_parser::{match_line, parse_log_file};
pub use dispatcher::{EventPublisher, EventQueues};
pub use aggregator::{Aggregator, AggregatorError, AggregatorHandle, NetworkState, StateClient};
pub use timing::{analyze_connection_timing, downscore_indicators};
pub use report::{generate_text_report, print_summary, write_json_report, RunReport};
