//! Log parsing for beacon network crawler output.
//!
//! Turns raw (possibly ANSI-colored) log lines into typed events. Rules are
//! tried in a fixed order and only the first matching rule is applied, so a
//! line never produces more than one event.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{Local, NaiveDate, NaiveTime};
use color_eyre::eyre::{Context, Result};
use rayon::prelude::*;
use regex::{Captures, Regex};

use super::types::*;

/// Extracts an event from the captures of a matched rule
type Extractor = fn(&Captures<'_>) -> Option<Event>;

/// A named line shape
pub struct Rule {
    pub name: &'static str,
    pub regex: Regex,
    extract: Extractor,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, extract: Extractor) -> Self {
        Self {
            name,
            regex: Regex::new(pattern)
                .unwrap_or_else(|e| panic!("Invalid {} regex: {}", name, e)),
            extract,
        }
    }
}

/// Compiled regex patterns for log parsing
pub struct LogPatterns {
    /// Match: ANSI SGR color sequences "\x1b[1;32m"
    pub ansi: Regex,
    /// Line rules in first-match order
    rules: Vec<Rule>,
}

impl LogPatterns {
    pub fn new() -> Self {
        let rules = vec![
            // Match: "09:55:15.319669 ... Connected with peer ... peer_id=<ID>"
            Rule::new(
                "connection",
                r"(\d{2}:\d{2}:\d{2}\.\d+).*Connected with peer.*peer_id=(\w+)",
                |caps| {
                    Some(Event::Connection(ConnectionEvent {
                        peer_id: caps.get(2)?.as_str().to_string(),
                        connected: true,
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... Performed successful handshake ... peer_id=<ID> seq=<N> agent=<AGENT> fork-digest=<DIGEST>"
            Rule::new(
                "handshake",
                r"(\d{2}:\d{2}:\d{2}\.\d+).*Performed successful handshake.*peer_id=(\w+).*seq=(\d+).*agent=([^\s]+).*fork-digest=(\w+)",
                |caps| {
                    let seq_number: u64 = caps
                        .get(3)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(0);

                    Some(Event::Handshake(HandshakeEvent {
                        peer_id: caps.get(2)?.as_str().to_string(),
                        success: true,
                        agent: caps.get(4)?.as_str().to_string(),
                        seq_number,
                        fork_digest: caps.get(5)?.as_str().to_string(),
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... Received goodbye message ... peer_id=<ID> msg=\"<REASON>\""
            Rule::new(
                "goodbye",
                r#"(\d{2}:\d{2}:\d{2}\.\d+).*Received goodbye message.*peer_id=(\w+).*msg="([^"]+)""#,
                |caps| {
                    Some(Event::Goodbye(GoodbyeEvent {
                        peer_id: caps.get(2)?.as_str().to_string(),
                        reason: caps.get(3)?.as_str().to_string(),
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... Disconnected from handshaked peer ... peer_id=<ID>"
            Rule::new(
                "disconnect",
                r"(\d{2}:\d{2}:\d{2}\.\d+).*Disconnected from handshaked peer.*peer_id=(\w+)",
                |caps| {
                    Some(Event::Connection(ConnectionEvent {
                        peer_id: caps.get(2)?.as_str().to_string(),
                        connected: false,
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... Perform status request ... peer_id=<ID>"
            // Recognized so it shadows later rules, but carries nothing we track yet.
            Rule::new(
                "status",
                r"(\d{2}:\d{2}:\d{2}\.\d+).*Perform status request.*peer_id=(\w+)",
                |_| None,
            ),
            // Match: "... Connection to beacon node failed ... err=\"<ERR>\""
            Rule::new(
                "connection_failed",
                r#"(\d{2}:\d{2}:\d{2}\.\d+).*Connection to beacon node failed.*err="([^"]+)""#,
                |caps| {
                    Some(Event::Error(ErrorEvent {
                        message: format!(
                            "Connection to beacon node failed: {}",
                            caps.get(2)?.as_str()
                        ),
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... terminated abnormally ... err=\"<ERR>\""
            Rule::new(
                "terminated_abnormally",
                r#"(\d{2}:\d{2}:\d{2}\.\d+).*terminated abnormally.*err="([^"]+)""#,
                |caps| {
                    Some(Event::Error(ErrorEvent {
                        message: format!(
                            "Process terminated abnormally: {}",
                            caps.get(2)?.as_str()
                        ),
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
            // Match: "... Waiting for dialback from Prysm node"
            Rule::new(
                "dialback_waiting",
                r"(\d{2}:\d{2}:\d{2}\.\d+).*Waiting for dialback from Prysm node",
                |caps| {
                    Some(Event::Error(ErrorEvent {
                        message: "Waiting for dialback from Prysm node".to_string(),
                        time: parse_timestamp(caps.get(1)?.as_str()),
                    }))
                },
            ),
        ];

        Self {
            ansi: Regex::new(r"\x1b\[[0-9;]*m").expect("Invalid ansi regex"),
            rules,
        }
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Name of the first rule matching the cleaned line, if any
    pub fn matching_rule(&self, line: &str) -> Option<&'static str> {
        let clean = self.ansi.replace_all(line, "");
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(&clean))
            .map(|rule| rule.name)
    }

    /// Convert a raw log line into at most one event
    pub fn match_line(&self, line: &str) -> Option<Event> {
        let clean = self.ansi.replace_all(line, "");

        for rule in &self.rules {
            if let Some(caps) = rule.regex.captures(&clean) {
                // First matching rule decides, even when it yields nothing
                return (rule.extract)(&caps);
            }
        }

        None
    }
}

impl Default for LogPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Global patterns instance
pub static PATTERNS: LazyLock<LogPatterns> = LazyLock::new(LogPatterns::new);

/// Match a line against the global patterns
pub fn match_line(line: &str) -> Option<Event> {
    PATTERNS.match_line(line)
}

/// Combine a "09:55:15.319669" time of day with a date
pub fn combine_timestamp(date: NaiveDate, time_of_day: &str) -> Option<Timestamp> {
    let time = NaiveTime::parse_from_str(time_of_day, "%H:%M:%S%.f").ok()?;
    Some(date.and_time(time))
}

/// Parse a log time of day on today's date, falling back to now
///
/// Lines carry no date, so a line logged just before midnight and parsed
/// just after it lands on the wrong day.
pub fn parse_timestamp(time_of_day: &str) -> Timestamp {
    let now = Local::now().naive_local();
    combine_timestamp(now.date(), time_of_day).unwrap_or(now)
}

/// Parse a captured log file into events, in line order
pub fn parse_log_file(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut lines = Vec::new();
    for line_result in reader.lines() {
        match line_result {
            Ok(l) => lines.push(l),
            Err(_) => continue, // Skip malformed lines
        }
    }

    let events: Vec<Event> = lines
        .par_iter()
        .filter_map(|line| PATTERNS.match_line(line))
        .collect();

    log::info!(
        "Parsed {}: {} lines, {} events",
        path.display(),
        lines.len(),
        events.len()
    );

    Ok(events)
}
