#![deny(unsafe_code)]

//! Chat session synchronization core.
//!
//! Keeps one conversation's metadata, roster, and ordered message history consistent while
//! independent fetches and live deliveries race each other and the user switches sessions.
//! Nothing in this crate performs I/O; the coordinator lives in the `parley` crate.

pub mod epoch;
pub mod error;
/// Per-slice fetch lifecycle.
pub mod fetch;
pub mod ids;
pub mod message;
pub mod ordering;
pub mod store;
pub mod unread;

pub use epoch::{EpochGuard, FetchEpoch};
pub use error::{SyncError, SyncResult};
pub use fetch::{
    FetchState, FetchTransition, FetchTransitionRejection, FetchTransitionResult, SliceKind,
    SliceStates,
};
pub use ids::{MessageId, ParticipantId, SessionId};
pub use message::{ChatSession, ContentKind, IncomingMessage, Message, Participant, Provenance};
pub use ordering::{DroppedDuplicate, MergeOutcome, canonical_cmp, is_canonical, merge, merge_tracked};
pub use store::{ApplyOutcome, SessionSnapshot, SessionStore, SlicePayload};
pub use unread::UnreadCounters;
