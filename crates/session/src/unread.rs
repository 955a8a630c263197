use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::SessionId;

/// Per-session count of live messages that arrived while another session was active.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnreadCounters {
    counts: BTreeMap<SessionId, u64>,
}

impl UnreadCounters {
    pub fn increment(&mut self, session_id: &SessionId) -> u64 {
        let count = self.counts.entry(session_id.clone()).or_default();
        *count = count.saturating_add(1);
        *count
    }

    /// Clears the counter for a session the user just opened.
    pub fn reset(&mut self, session_id: &SessionId) {
        self.counts.remove(session_id);
    }

    pub fn get(&self, session_id: &SessionId) -> u64 {
        self.counts.get(session_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().copied().fold(0, u64::saturating_add)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, u64)> {
        self.counts.iter().map(|(id, count)| (id, *count))
    }
}
