//! Published result of one cycle.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Serialize, Serializer};

use crate::neighbourhood::Neighbour;
use crate::transport::CheckOutcome;

pub const STATE_OK: &str = "ok";
pub const STATE_SKIPPED: &str = "skipped";

/// Top-level keys written next to the flattened check labels.
pub const SNAPSHOT_KEYS: [&str; 3] = ["neighbourhood_state", "neighbourhood", "produced_at"];

/// Outcome of every probe of a cycle plus the neighbourhood it saw.
///
/// Serializes flat: one key per check label next to `neighbourhood_state`
/// and `neighbourhood`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSnapshot {
    #[serde(flatten)]
    pub checks: BTreeMap<String, CheckOutcome>,
    /// `ok`, `skipped`, or the discovery / selection error.
    pub neighbourhood_state: String,
    pub neighbourhood: Vec<Neighbour>,
    #[serde(serialize_with = "unix_seconds")]
    pub produced_at: SystemTime,
}

impl ResultSnapshot {
    pub fn outcome(&self, label: &str) -> Option<&CheckOutcome> {
        self.checks.get(label)
    }

    /// True if any probe failed or the neighbourhood could not be built.
    pub fn has_errors(&self) -> bool {
        self.checks.values().any(CheckOutcome::is_error)
            || !matches!(self.neighbourhood_state.as_str(), STATE_OK | STATE_SKIPPED)
    }
}

fn unix_seconds<S: Serializer>(at: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let secs = at
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    serializer.serialize_u64(secs)
}
