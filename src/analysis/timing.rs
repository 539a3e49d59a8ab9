//! Connection and goodbye timing correlation.
//!
//! Looks at how long peers stay connected before saying goodbye and flags
//! shapes that suggest remote peers are downscoring us: quick rejections,
//! disconnects clustered around common timeouts, and a high share of
//! error-severity goodbye reasons.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use super::severity::{classify, Severity};
use super::types::*;

pub const PEER_SCORE_TOO_LOW: &str = "peer score too low";
pub const CLIENT_BANNED: &str = "client banned this node";
pub const UNABLE_TO_VERIFY_NETWORK: &str = "unable to verify network";
pub const IRRELEVANT_NETWORK: &str = "irrelevant network";

/// Client type used for patterns detected across all clients
pub const ALL_CLIENTS: &str = "all";

/// Per-client timeout candidates, in seconds
const CLIENT_TIMEOUTS_SECS: [u64; 5] = [30, 60, 120, 240, 300];
const CLIENT_TIMEOUT_TOLERANCE: Duration = Duration::from_secs(3);

/// Run-wide timeout candidates, in seconds
const GLOBAL_TIMEOUTS_SECS: [u64; 6] = [30, 60, 120, 240, 300, 600];
const GLOBAL_TIMEOUT_TOLERANCE: Duration = Duration::from_secs(5);

/// Minimum bucket size before looking for a pattern
const MIN_PATTERN_OCCURRENCES: usize = 3;

const FAST_REJECTION: Duration = Duration::from_secs(10);
const FAST_DISCONNECT: Duration = Duration::from_secs(5);
const FAST_SCORE_REJECTION: Duration = Duration::from_secs(30);

/// Sorted durations with the summary statistics used throughout the analysis
struct DurationStats {
    count: usize,
    min: Duration,
    max: Duration,
    median: Duration,
    average: Duration,
}

impl DurationStats {
    /// Median is `sorted[len / 2]`: no interpolation for even lengths
    fn from_unsorted(mut durations: Vec<Duration>) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort();

        let count = durations.len();
        let total: u128 = durations.iter().map(|d| d.as_nanos()).sum();
        let average = Duration::from_nanos((total / count as u128) as u64);

        Some(Self {
            count,
            min: durations[0],
            max: durations[count - 1],
            median: durations[count / 2],
            average,
        })
    }
}

/// Whole seconds, for human-readable strings
fn secs(d: Duration) -> String {
    format!("{}s", d.as_secs_f64().round())
}

fn within(value: Duration, target: Duration, tolerance: Duration) -> bool {
    let diff = if value > target {
        value - target
    } else {
        target - value
    };
    diff <= tolerance
}

fn matching_timeout(average: Duration, candidates: &[u64], tolerance: Duration) -> Option<u64> {
    candidates
        .iter()
        .copied()
        .find(|&c| within(average, Duration::from_secs(c), tolerance))
}

fn reason_timing(reason: &str, durations: &[(String, Duration)]) -> Option<GoodbyeReasonTiming> {
    let stats = DurationStats::from_unsorted(durations.iter().map(|(_, d)| *d).collect())?;

    let mut client_breakdown = BTreeMap::new();
    for (client, _) in durations {
        *client_breakdown.entry(client.clone()).or_insert(0) += 1;
    }

    Some(GoodbyeReasonTiming {
        reason: reason.to_string(),
        count: stats.count,
        average_duration: stats.average,
        median_duration: stats.median,
        min_duration: stats.min,
        max_duration: stats.max,
        client_breakdown,
    })
}

/// Pattern for one client's goodbyes with one reason
fn client_pattern(client: &str, timing: &GoodbyeReasonTiming) -> Option<TimingPattern> {
    if timing.count < MIN_PATTERN_OCCURRENCES {
        return None;
    }

    let reason = &timing.reason;
    let average = timing.average_duration;

    let description = if average < FAST_REJECTION {
        format!(
            "Fast rejection: {} peers send '{}' very quickly (avg {}, {} occurrences)",
            client,
            reason,
            secs(average),
            timing.count
        )
    } else if let Some(timeout) =
        matching_timeout(average, &CLIENT_TIMEOUTS_SECS, CLIENT_TIMEOUT_TOLERANCE)
    {
        format!(
            "Timeout pattern: {} peers disconnect with '{}' around {}s mark ({} occurrences)",
            client, reason, timeout, timing.count
        )
    } else {
        return None;
    };

    Some(TimingPattern {
        client_type: client.to_string(),
        goodbye_reason: reason.clone(),
        average_duration: average,
        occurrences: timing.count,
        pattern: description,
    })
}

/// Timeout clustering across all clients, looser than the per-client check
fn global_timeout_pattern(timing: &GoodbyeReasonTiming) -> Option<TimingPattern> {
    if timing.count < MIN_PATTERN_OCCURRENCES {
        return None;
    }

    let timeout = matching_timeout(
        timing.average_duration,
        &GLOBAL_TIMEOUTS_SECS,
        GLOBAL_TIMEOUT_TOLERANCE,
    )?;

    Some(TimingPattern {
        client_type: ALL_CLIENTS.to_string(),
        goodbye_reason: timing.reason.clone(),
        average_duration: timing.average_duration,
        occurrences: timing.count,
        pattern: format!(
            "Global timeout pattern: '{}' disconnects cluster around {}s mark ({} occurrences)",
            timing.reason, timeout, timing.count
        ),
    })
}

/// (error-severity goodbyes, all goodbyes) over the reason buckets
fn error_share(reason_timings: &BTreeMap<String, GoodbyeReasonTiming>) -> (usize, usize) {
    let total: usize = reason_timings.values().map(|t| t.count).sum();
    let errors: usize = reason_timings
        .values()
        .filter(|t| classify(&t.reason) == Severity::Error)
        .map(|t| t.count)
        .sum();
    (errors, total)
}

fn percent(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64 * 100.0
}

fn suspicious_patterns(timing: &ConnectionTiming) -> Vec<String> {
    let mut suspicious = Vec::new();
    let reasons = &timing.goodbye_reason_timings;

    let (errors, total) = error_share(reasons);
    if total > 0 && errors as f64 > total as f64 * 0.3 {
        suspicious.push(format!(
            "High error rate: {:.1}% of goodbyes are error-severity ({}/{})",
            percent(errors, total),
            errors,
            total
        ));
    }

    if let Some(score) = reasons.get(PEER_SCORE_TOO_LOW).filter(|t| t.count > 2) {
        suspicious.push(format!(
            "Multiple peer score rejections: {} peers rejected us for low score (avg after {})",
            score.count,
            secs(score.average_duration)
        ));
    }

    if let Some(banned) = reasons.get(CLIENT_BANNED).filter(|t| t.count > 1) {
        suspicious.push(format!(
            "Multiple bans: {} peers banned this node (avg after {})",
            banned.count,
            secs(banned.average_duration)
        ));
    }

    if timing.total_connections > 0 && timing.fastest_disconnect < FAST_DISCONNECT {
        let fast: usize = reasons
            .values()
            .filter(|t| t.min_duration < FAST_DISCONNECT)
            .map(|t| t.count)
            .sum();

        if fast as f64 > timing.total_connections as f64 * 0.25 {
            suspicious.push(format!(
                "Fast disconnects: {} goodbyes arrived within 5s of connecting (fastest {:.1}s)",
                fast,
                timing.fastest_disconnect.as_secs_f64()
            ));
        }
    }

    suspicious
}

/// Analyze connection durations and goodbye timings of a peer snapshot
pub fn analyze_connection_timing(peers: &HashMap<String, PeerRecord>) -> ConnectionTiming {
    let mut timing = ConnectionTiming::default();

    let connection_durations: Vec<Duration> = peers
        .values()
        .map(|p| p.connection_duration)
        .filter(|d| !d.is_zero())
        .collect();

    if let Some(stats) = DurationStats::from_unsorted(connection_durations) {
        timing.total_connections = stats.count;
        timing.fastest_disconnect = stats.min;
        timing.longest_connection = stats.max;
        timing.median_connection_duration = stats.median;
        timing.average_connection_duration = stats.average;
    }

    // reason -> [(client, duration)] and client -> reason -> [(client, duration)]
    let mut by_reason: BTreeMap<String, Vec<(String, Duration)>> = BTreeMap::new();
    let mut by_client: BTreeMap<String, BTreeMap<String, Vec<(String, Duration)>>> =
        BTreeMap::new();

    for peer in peers.values() {
        let client = peer.client_or_unknown();
        for goodbye in &peer.goodbye_timings {
            if goodbye.duration_from_start.is_zero() {
                continue;
            }
            let entry = (client.to_string(), goodbye.duration_from_start);
            by_reason
                .entry(goodbye.reason.to_string())
                .or_default()
                .push(entry.clone());
            by_client
                .entry(client.to_string())
                .or_default()
                .entry(goodbye.reason.to_string())
                .or_default()
                .push(entry);
        }
    }

    for (reason, durations) in &by_reason {
        if let Some(reason_timing) = reason_timing(reason, durations) {
            timing
                .goodbye_reason_timings
                .insert(reason.clone(), reason_timing);
        }
    }

    for (client, reasons) in &by_client {
        for (reason, durations) in reasons {
            let Some(client_timing) = reason_timing(reason, durations) else {
                continue;
            };

            if let Some(pattern) = client_pattern(client, &client_timing) {
                timing.client_timing_patterns.push(pattern);
            }

            timing
                .client_specific_timings
                .entry(client.clone())
                .or_default()
                .insert(reason.clone(), client_timing);
        }
    }

    let global_patterns: Vec<TimingPattern> = timing
        .goodbye_reason_timings
        .values()
        .filter_map(global_timeout_pattern)
        .collect();
    timing.client_timing_patterns.extend(global_patterns);

    timing.suspicious_patterns = suspicious_patterns(&timing);

    log::debug!(
        "Timing analysis: {} connections, {} reasons, {} patterns, {} suspicious",
        timing.total_connections,
        timing.goodbye_reason_timings.len(),
        timing.client_timing_patterns.len(),
        timing.suspicious_patterns.len()
    );

    timing
}

/// Indicators that remote peers are downscoring this node
pub fn downscore_indicators(timing: &ConnectionTiming) -> Vec<String> {
    let mut indicators = Vec::new();
    let reasons = &timing.goodbye_reason_timings;

    if let Some(score) = reasons.get(PEER_SCORE_TOO_LOW).filter(|t| t.count > 0) {
        indicators.push(format!(
            "Direct peer score rejections: {} peers rejected us for low peer score",
            score.count
        ));
        if score.average_duration < FAST_SCORE_REJECTION {
            indicators.push(format!(
                "Fast peer score rejection (avg {}) suggests reputation issue",
                secs(score.average_duration)
            ));
        }
    }

    if let Some(banned) = reasons.get(CLIENT_BANNED).filter(|t| t.count > 0) {
        indicators.push(format!(
            "Client bans: {} peers banned this node",
            banned.count
        ));
    }

    for pattern in &timing.client_timing_patterns {
        if pattern.goodbye_reason == PEER_SCORE_TOO_LOW || pattern.goodbye_reason == CLIENT_BANNED {
            indicators.push(format!("Consistent pattern: {}", pattern.pattern));
        }
        if pattern.average_duration < FAST_REJECTION
            && pattern.occurrences >= MIN_PATTERN_OCCURRENCES
        {
            indicators.push(format!(
                "Suspicious fast pattern: {} peers send '{}' after {} on average ({} occurrences)",
                pattern.client_type,
                pattern.goodbye_reason,
                secs(pattern.average_duration),
                pattern.occurrences
            ));
        }
    }

    if let Some(verify) = reasons.get(UNABLE_TO_VERIFY_NETWORK).filter(|t| t.count > 2) {
        indicators.push(format!(
            "Network verification failures: {} peers unable to verify network",
            verify.count
        ));
    }

    if let Some(irrelevant) = reasons.get(IRRELEVANT_NETWORK).filter(|t| t.count > 2) {
        indicators.push(format!(
            "Network mismatch: {} peers reported irrelevant network",
            irrelevant.count
        ));
    }

    let (errors, total) = error_share(reasons);
    if total > 0 && errors as f64 > total as f64 * 0.5 {
        indicators.push(format!(
            "Majority error goodbyes: {:.1}% of goodbyes indicate rejection ({}/{})",
            percent(errors, total),
            errors,
            total
        ));
    }

    indicators
}
