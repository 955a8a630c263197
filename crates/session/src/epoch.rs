use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Activation counter captured by every fetch and live event.
///
/// Epoch `0` means no session has been activated yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FetchEpoch(pub u64);

impl FetchEpoch {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FetchEpoch {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Shared epoch counter deciding whether an asynchronous result still applies.
///
/// Clones observe the same counter, so the coordinator can advance it at call time while the
/// store validates results later on its own task.
#[derive(Debug, Clone, Default)]
pub struct EpochGuard {
    current: Arc<AtomicU64>,
}

impl EpochGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new activation and returns its epoch.
    pub fn advance(&self) -> FetchEpoch {
        FetchEpoch(self.current.fetch_add(1, Ordering::AcqRel).saturating_add(1))
    }

    pub fn current(&self) -> FetchEpoch {
        FetchEpoch(self.current.load(Ordering::Acquire))
    }

    pub fn is_current(&self, epoch: FetchEpoch) -> bool {
        self.current() == epoch
    }
}
