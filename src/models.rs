use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain Models
// ============================================================================

/// A single transaction as reported by one upstream.
///
/// Every field except `timestamp` is opaque to the aggregator and passed
/// through verbatim, including absent and `null` values. Records are never
/// mutated once decoded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Transaction {
    /// Parsed ISO-8601 timestamp, or `None` when absent or malformed.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}
