use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three independently fetched pieces of session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceKind {
    Metadata,
    History,
    Roster,
}

impl SliceKind {
    pub const ALL: [SliceKind; 3] = [Self::Metadata, Self::History, Self::Roster];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::History => "history",
            Self::Roster => "roster",
        }
    }
}

impl fmt::Display for SliceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Lifecycle of one slice fetch within the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FetchState {
    #[default]
    Idle,
    Pending,
    Fulfilled,
    /// Recoverable failure marker the UI may surface next to the empty slice.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTransition {
    Start,
    Fulfill,
    Reject { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTransitionRejection {
    AlreadyPending,
    NotPending { current: FetchState },
}

pub type FetchTransitionResult = Result<FetchState, FetchTransitionRejection>;

impl FetchState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Rejected { reason } => Some(reason),
            Self::Idle | Self::Pending | Self::Fulfilled => None,
        }
    }

    /// A fetch may start from any non-pending state; settling requires a pending fetch so a
    /// duplicated completion cannot overwrite an earlier outcome.
    pub fn apply(&self, transition: FetchTransition) -> FetchTransitionResult {
        match transition {
            FetchTransition::Start => match self {
                Self::Pending => Err(FetchTransitionRejection::AlreadyPending),
                Self::Idle | Self::Fulfilled | Self::Rejected { .. } => Ok(Self::Pending),
            },
            FetchTransition::Fulfill => self.settle(Self::Fulfilled),
            FetchTransition::Reject { reason } => self.settle(Self::Rejected { reason }),
        }
    }

    fn settle(&self, next: FetchState) -> FetchTransitionResult {
        match self {
            Self::Pending => Ok(next),
            Self::Idle | Self::Fulfilled | Self::Rejected { .. } => {
                Err(FetchTransitionRejection::NotPending {
                    current: self.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SliceStates {
    pub metadata: FetchState,
    pub history: FetchState,
    pub roster: FetchState,
}

impl SliceStates {
    pub fn get(&self, slice: SliceKind) -> &FetchState {
        match slice {
            SliceKind::Metadata => &self.metadata,
            SliceKind::History => &self.history,
            SliceKind::Roster => &self.roster,
        }
    }

    pub(crate) fn get_mut(&mut self, slice: SliceKind) -> &mut FetchState {
        match slice {
            SliceKind::Metadata => &mut self.metadata,
            SliceKind::History => &mut self.history,
            SliceKind::Roster => &mut self.roster,
        }
    }

    pub fn all_idle(&self) -> bool {
        SliceKind::ALL
            .iter()
            .all(|slice| matches!(self.get(*slice), FetchState::Idle))
    }

    pub fn all_settled(&self) -> bool {
        SliceKind::ALL
            .iter()
            .all(|slice| self.get(*slice).is_settled())
    }
}
