//! # Peerscore - Peer score analysis for beacon network crawler runs
//!
//! This library turns the log output of a beacon network crawler into a
//! picture of how remote peers treat our node: who connected, which client
//! they run, when and why they said goodbye, and whether the timing of those
//! goodbyes suggests we are being downscored.
//!
//! ## Architecture
//!
//! - `analysis::log_parser`: ordered regex rules turning log lines into events
//! - `analysis::dispatcher`: bounded per-category queues with drop-on-full publishing
//! - `analysis::aggregator`: the single task that owns all peer state
//! - `analysis::timing`: connection/goodbye timing statistics and pattern detection
//! - `analysis::report`: score, summary and JSON/text rendering
//! - `config`: YAML configuration with command-line overrides
//! - `orchestrator`: live pipeline wiring and offline replay
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use peerscore::{analysis::report, orchestrator};
//!
//! let run = orchestrator::replay_log_file(Path::new("crawler.log"))?;
//! report::print_summary(&run);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Malformed log lines never fail a run; they simply produce no event.
//! Fallible I/O returns `color_eyre::eyre::Result` with context, while
//! library error types (`ConfigError`, `AggregatorError`) use `thiserror`.

pub mod analysis;
pub mod config;
pub mod orchestrator;
