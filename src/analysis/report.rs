//! Report generation for peer score runs.
//!
//! Assembles the final run report from the aggregated state and the timing
//! analysis, and renders it as JSON or human-readable text.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::aggregator::NetworkState;
use super::severity::{classify, Severity};
use super::timing::{analyze_connection_timing, downscore_indicators};
use super::types::*;

/// Default file name of the JSON report
pub const DEFAULT_JSON_REPORT_FILE: &str = "peer-score-report.json";

/// Score points lost per error-severity goodbye
const ERROR_GOODBYE_PENALTY: f64 = 5.0;

/// Client count that earns the full diversity score
const FULL_DIVERSITY_CLIENTS: usize = 4;

/// Full results of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub total_connections: usize,
    pub successful_handshakes: usize,
    pub failed_handshakes: usize,
    pub goodbye_messages: usize,
    pub goodbye_reasons: BTreeMap<String, usize>,
    pub goodbyes_by_client: BTreeMap<String, BTreeMap<String, usize>>,
    pub peers_by_client: BTreeMap<String, usize>,
    pub unique_clients: usize,
    pub peers: BTreeMap<String, PeerRecord>,
    pub overall_score: f64,
    pub score_classification: String,
    pub summary: String,
    pub errors: Vec<String>,
    pub connection_failed: bool,
    pub timing_analysis: ConnectionTiming,
    pub downscore_indicators: Vec<String>,
}

impl RunReport {
    /// Build the report from the final state of a run
    pub fn build(state: &NetworkState, start_time: Timestamp, end_time: Timestamp) -> Self {
        let totals = state.totals();
        let peers = state.peers();

        let successful_handshakes = peers.values().filter(|p| p.handshake_ok).count();
        let failed_handshakes = peers.len() - successful_handshakes;

        let mut peers_by_client = BTreeMap::new();
        for client in peers.values().filter_map(|p| p.client_type.as_ref()) {
            *peers_by_client.entry(client.clone()).or_insert(0) += 1;
        }

        let error_goodbyes: usize = totals
            .goodbye_reasons
            .iter()
            .filter(|(reason, _)| classify(reason) == Severity::Error)
            .map(|(_, count)| *count)
            .sum();

        let overall_score = overall_score(
            totals.connection_failed,
            peers.len(),
            successful_handshakes,
            peers_by_client.len(),
            error_goodbyes,
        );

        let summary = if totals.connection_failed {
            format!(
                "FAILED: Connection to beacon node failed | Errors: {}",
                totals.errors.len()
            )
        } else {
            format!(
                "Score: {:.1}% | Connections: {} | Handshakes: {} | Clients: {} | Goodbyes: {}",
                overall_score,
                peers.len(),
                successful_handshakes,
                peers_by_client.len(),
                totals.total_goodbyes
            )
        };

        let timing_analysis = analyze_connection_timing(peers);
        let downscore_indicators = downscore_indicators(&timing_analysis);

        log::info!("Report completed: {}", summary);

        Self {
            generated_at: chrono::Local::now().naive_local(),
            start_time,
            end_time,
            duration: (end_time - start_time).to_std().unwrap_or_default(),
            total_connections: peers.len(),
            successful_handshakes,
            failed_handshakes,
            goodbye_messages: totals.total_goodbyes,
            goodbye_reasons: totals.goodbye_reasons.clone(),
            goodbyes_by_client: totals.goodbyes_by_client.clone(),
            unique_clients: peers_by_client.len(),
            peers_by_client,
            peers: peers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            overall_score,
            score_classification: classify_score(totals.connection_failed, overall_score)
                .to_string(),
            summary,
            errors: totals.errors.clone(),
            connection_failed: totals.connection_failed,
            timing_analysis,
            downscore_indicators,
        }
    }
}

/// Overall network health score in percent
///
/// Average of handshake success rate and client diversity, minus a fixed
/// penalty per error-severity goodbye. A failed run scores zero.
pub fn overall_score(
    connection_failed: bool,
    total_connections: usize,
    successful_handshakes: usize,
    unique_clients: usize,
    error_goodbyes: usize,
) -> f64 {
    if connection_failed || total_connections == 0 {
        return 0.0;
    }

    let connection_score = successful_handshakes as f64 / total_connections as f64 * 100.0;
    let diversity_score =
        unique_clients.min(FULL_DIVERSITY_CLIENTS) as f64 / FULL_DIVERSITY_CLIENTS as f64 * 100.0;
    let penalty = error_goodbyes as f64 * ERROR_GOODBYE_PENALTY;

    ((connection_score + diversity_score) / 2.0 - penalty).max(0.0)
}

/// Human-readable category of a score
pub fn classify_score(connection_failed: bool, score: f64) -> &'static str {
    if connection_failed {
        "Connection Failed"
    } else if score >= 90.0 {
        "Excellent"
    } else if score >= 80.0 {
        "Good"
    } else if score >= 60.0 {
        "Fair"
    } else if score >= 40.0 {
        "Poor"
    } else {
        "Critical"
    }
}

/// Generate JSON report
pub fn write_json_report(report: &RunReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report
pub fn generate_text_report(report: &RunReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    // Header
    lines.push("=".repeat(80));
    lines.push("                          PEER SCORE REPORT".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!("Generated: {}", report.generated_at.format("%Y-%m-%d %H:%M:%S")));
    lines.push(format!("Duration: {}s", report.duration.as_secs()));
    lines.push(format!(
        "Score: {:.1}% ({})",
        report.overall_score, report.score_classification
    ));
    lines.push(report.summary.clone());
    lines.push(String::new());

    lines.push(format!("Peers: {}", report.total_connections));
    lines.push(format!(
        "Handshakes: {} successful, {} failed",
        report.successful_handshakes, report.failed_handshakes
    ));
    if !report.peers_by_client.is_empty() {
        lines.push("Clients:".to_string());
        for (client, count) in &report.peers_by_client {
            lines.push(format!("  {:<12} {}", client, count));
        }
    }
    lines.push(String::new());

    // Peers whose only recorded goodbye is the one synthesized at disconnect
    let silent = report
        .peers
        .values()
        .filter(|p| !p.goodbye_timings.is_empty())
        .filter(|p| p.goodbye_timings.iter().all(|t| t.reason.is_synthetic()))
        .count();
    if silent > 0 {
        lines.push(format!("Disconnected without goodbye: {}", silent));
        lines.push(String::new());
    }

    if !report.goodbye_reasons.is_empty() {
        lines.push(format!("Goodbyes: {}", report.goodbye_messages));
        for (reason, count) in &report.goodbye_reasons {
            lines.push(format!("  [{}] {}: {}", classify(reason), reason, count));
        }
        lines.push(String::new());
    }

    let timing = &report.timing_analysis;
    if timing.total_connections > 0 {
        lines.push("=".repeat(80));
        lines.push("                            TIMING ANALYSIS".to_string());
        lines.push("=".repeat(80));
        lines.push(String::new());

        lines.push(format!("Connections analyzed: {}", timing.total_connections));
        lines.push(format!(
            "Average: {}s | Median: {}s | Fastest: {}s | Longest: {}s",
            timing.average_connection_duration.as_secs(),
            timing.median_connection_duration.as_secs(),
            timing.fastest_disconnect.as_secs(),
            timing.longest_connection.as_secs()
        ));
        lines.push(String::new());

        for (reason, t) in &timing.goodbye_reason_timings {
            lines.push(format!(
                "  {}: {} (avg {}s, median {}s, min {}s, max {}s)",
                reason,
                t.count,
                t.average_duration.as_secs(),
                t.median_duration.as_secs(),
                t.min_duration.as_secs(),
                t.max_duration.as_secs()
            ));
        }
        lines.push(String::new());

        for pattern in &timing.client_timing_patterns {
            lines.push(format!("  Pattern: {}", pattern.pattern));
        }
        for suspicious in &timing.suspicious_patterns {
            lines.push(format!("  WARNING: {}", suspicious));
        }
        lines.push(String::new());
    }

    if !report.downscore_indicators.is_empty() {
        lines.push("Downscore indicators:".to_string());
        for indicator in &report.downscore_indicators {
            lines.push(format!("  - {}", indicator));
        }
        lines.push(String::new());
    }

    if !report.errors.is_empty() {
        lines.push("Errors:".to_string());
        for error in &report.errors {
            lines.push(format!("  - {}", error));
        }
        lines.push(String::new());
    }

    // Footer
    lines.push("=".repeat(80));

    lines.join("\n")
}

/// Print a summary to stdout
pub fn print_summary(report: &RunReport) {
    println!("\n=== PEER SCORE SUMMARY ===\n");
    println!("{}", report.summary);
    println!("Classification: {}", report.score_classification);

    if report.timing_analysis.total_connections > 0 {
        println!(
            "\nConnection timing: avg {}s, median {}s",
            report.timing_analysis.average_connection_duration.as_secs(),
            report.timing_analysis.median_connection_duration.as_secs()
        );
    }

    if !report.downscore_indicators.is_empty() {
        println!("\nDownscore indicators:");
        for indicator in &report.downscore_indicators {
            println!("  - {}", indicator);
        }
    }

    println!();
}
