//! Severity tiers for goodbye reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How worrying a goodbye reason is for our node's standing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine disconnects (peer full, shutting down)
    Normal,
    /// Reasons that point at our node being rejected
    Error,
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "NORMAL"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a goodbye reason by exact, case-sensitive match
pub fn classify(reason: &str) -> Severity {
    match reason {
        "client has too many peers" | "client shutdown" => Severity::Normal,
        "peer score too low"
        | "client banned this node"
        | "irrelevant network"
        | "unable to verify network"
        | "fault/error" => Severity::Error,
        _ => Severity::Unknown,
    }
}
