//! Authoritative in-memory state for the active conversation.
//!
//! The store is a plain state machine: every mutation is a method taking `&mut self`, and
//! every asynchronous result must present the epoch it was issued under. Results from a
//! superseded activation are reported as [`ApplyOutcome::Stale`] and leave state untouched.

use serde::{Deserialize, Serialize};

use super::epoch::{EpochGuard, FetchEpoch};
use super::fetch::{FetchState, FetchTransition, FetchTransitionRejection, SliceKind, SliceStates};
use super::ids::SessionId;
use super::message::{ChatSession, IncomingMessage, Message, Participant, Provenance};
use super::ordering::merge_tracked;
use super::unread::UnreadCounters;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlicePayload {
    Chat(ChatSession),
    Messages(Vec<Message>),
    Participants(Vec<Participant>),
}

impl SlicePayload {
    pub fn slice(&self) -> SliceKind {
        match self {
            Self::Chat(_) => SliceKind::Metadata,
            Self::Messages(_) => SliceKind::History,
            Self::Participants(_) => SliceKind::Roster,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
    /// A live message for a session other than the active one; counted as unread.
    Background { unread: u64 },
    Invalid(FetchTransitionRejection),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveSession {
    session_id: SessionId,
    epoch: FetchEpoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub epoch: FetchEpoch,
    pub chat: Option<ChatSession>,
    pub participants: Option<Vec<Participant>>,
    pub messages: Option<Vec<Message>>,
    pub loading: bool,
    pub fetches: SliceStates,
    pub unread: UnreadCounters,
}

impl SessionSnapshot {
    /// Resolves the roster entry that wrote `message`, if the roster is loaded.
    pub fn author_of(&self, message: &Message) -> Option<&Participant> {
        self.participants
            .as_ref()?
            .iter()
            .find(|participant| participant.id == message.author)
    }

    pub fn message_count(&self) -> usize {
        self.messages.as_ref().map_or(0, Vec::len)
    }

    pub fn is_settled(&self) -> bool {
        self.fetches.all_settled()
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    guard: EpochGuard,
    active: Option<ActiveSession>,
    chat: Option<ChatSession>,
    participants: Option<Vec<Participant>>,
    messages: Option<Vec<Message>>,
    loading: bool,
    fetches: SliceStates,
    unread: UnreadCounters,
}

impl SessionStore {
    pub fn new(guard: EpochGuard) -> Self {
        Self {
            guard,
            ..Self::default()
        }
    }

    pub fn guard(&self) -> &EpochGuard {
        &self.guard
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|active| &active.session_id)
    }

    pub fn epoch(&self) -> FetchEpoch {
        self.active
            .as_ref()
            .map_or_else(FetchEpoch::default, |active| active.epoch)
    }

    pub fn chat(&self) -> Option<&ChatSession> {
        self.chat.as_ref()
    }

    pub fn participants(&self) -> Option<&[Participant]> {
        self.participants.as_deref()
    }

    pub fn messages(&self) -> Option<&[Message]> {
        self.messages.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn fetch_state(&self, slice: SliceKind) -> &FetchState {
        self.fetches.get(slice)
    }

    pub fn unread(&self) -> &UnreadCounters {
        &self.unread
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id().cloned(),
            epoch: self.epoch(),
            chat: self.chat.clone(),
            participants: self.participants.clone(),
            messages: self.messages.clone(),
            loading: self.loading,
            fetches: self.fetches.clone(),
            unread: self.unread.clone(),
        }
    }

    /// Replaces all session state with an empty, loading activation of `session_id`.
    ///
    /// `epoch` must already be current: an activation that was superseded before the store
    /// saw it is discarded.
    pub fn activate(&mut self, session_id: SessionId, epoch: FetchEpoch) -> ApplyOutcome {
        if !self.guard.is_current(epoch) {
            tracing::debug!(session_id = %session_id, epoch = %epoch, "activation superseded before it was applied");
            return ApplyOutcome::Stale;
        }

        self.unread.reset(&session_id);
        self.active = Some(ActiveSession { session_id, epoch });
        self.chat = None;
        self.participants = None;
        self.messages = None;
        self.loading = true;
        self.fetches = SliceStates::default();
        ApplyOutcome::Applied
    }

    pub fn mark_read(&mut self, session_id: &SessionId) {
        self.unread.reset(session_id);
    }

    /// Moves one slice to `pending`, clearing whatever it held.
    pub fn mark_pending(&mut self, epoch: FetchEpoch, slice: SliceKind) -> ApplyOutcome {
        if !self.accepts(epoch) {
            return ApplyOutcome::Stale;
        }

        let first_of_epoch = self.fetches.all_idle();
        if let Err(rejection) = self.transition(slice, FetchTransition::Start) {
            return ApplyOutcome::Invalid(rejection);
        }

        match slice {
            SliceKind::Metadata => self.chat = None,
            SliceKind::History => self.messages = None,
            SliceKind::Roster => self.participants = None,
        }
        if first_of_epoch {
            self.loading = true;
        }
        ApplyOutcome::Applied
    }

    pub fn fulfill(&mut self, epoch: FetchEpoch, payload: SlicePayload) -> ApplyOutcome {
        let slice = payload.slice();
        if !self.accepts(epoch) {
            tracing::debug!(epoch = %epoch, slice = %slice, "discarding stale fetch result");
            return ApplyOutcome::Stale;
        }

        if let Err(rejection) = self.transition(slice, FetchTransition::Fulfill) {
            tracing::warn!(epoch = %epoch, slice = %slice, ?rejection, "ignoring fetch result for a slice that is not pending");
            return ApplyOutcome::Invalid(rejection);
        }

        match payload {
            SlicePayload::Chat(chat) => self.chat = Some(chat),
            SlicePayload::Messages(history) => self.install_history(history),
            SlicePayload::Participants(roster) => self.participants = Some(dedup_roster(roster)),
        }
        self.loading = false;
        ApplyOutcome::Applied
    }

    /// Records a failed fetch, leaving the slice empty and every other slice untouched.
    pub fn reject(
        &mut self,
        epoch: FetchEpoch,
        slice: SliceKind,
        reason: impl Into<String>,
    ) -> ApplyOutcome {
        if !self.accepts(epoch) {
            tracing::debug!(epoch = %epoch, slice = %slice, "discarding stale fetch failure");
            return ApplyOutcome::Stale;
        }

        let reason = reason.into();
        if let Err(rejection) = self.transition(
            slice,
            FetchTransition::Reject {
                reason: reason.clone(),
            },
        ) {
            tracing::warn!(epoch = %epoch, slice = %slice, ?rejection, "ignoring fetch failure for a slice that is not pending");
            return ApplyOutcome::Invalid(rejection);
        }

        tracing::warn!(epoch = %epoch, slice = %slice, reason = %reason, "slice fetch failed");
        self.loading = false;
        ApplyOutcome::Applied
    }

    /// `epoch` is the one observed when the message arrived. Messages for other sessions
    /// are not staged; they bump that session's unread counter and rely on a later refetch.
    pub fn append_live_message(
        &mut self,
        epoch: FetchEpoch,
        incoming: IncomingMessage,
    ) -> ApplyOutcome {
        let IncomingMessage {
            session_id,
            message,
        } = incoming;

        let is_active = self.session_id() == Some(&session_id);
        if !is_active {
            let unread = self.unread.increment(&session_id);
            tracing::debug!(session_id = %session_id, message_id = %message.id, unread, "live message for a background session");
            return ApplyOutcome::Background { unread };
        }

        if !self.accepts(epoch) {
            tracing::debug!(session_id = %session_id, message_id = %message.id, epoch = %epoch, "discarding live message from a superseded activation");
            return ApplyOutcome::Stale;
        }

        let message = message.with_provenance(Provenance::Live);
        let existing = self.messages.take().unwrap_or_default();
        let outcome = merge_tracked(&existing, std::slice::from_ref(&message));
        for duplicate in &outcome.dropped {
            tracing::debug!(message_id = %duplicate.id, kept = ?duplicate.kept, "live message already present");
        }
        self.messages = Some(outcome.messages);
        ApplyOutcome::Applied
    }

    fn accepts(&self, epoch: FetchEpoch) -> bool {
        self.guard.is_current(epoch) && self.active.as_ref().is_some_and(|active| active.epoch == epoch)
    }

    fn transition(
        &mut self,
        slice: SliceKind,
        transition: FetchTransition,
    ) -> Result<(), FetchTransitionRejection> {
        let state = self.fetches.get_mut(slice);
        *state = state.apply(transition)?;
        Ok(())
    }

    fn install_history(&mut self, history: Vec<Message>) {
        let history = history
            .into_iter()
            .map(|message| message.with_provenance(Provenance::History))
            .collect::<Vec<_>>();
        // Live messages that landed while history was pending are already in the slice and
        // count as first-seen.
        let existing = self.messages.take().unwrap_or_default();
        let outcome = merge_tracked(&existing, &history);
        if !outcome.dropped.is_empty() {
            tracing::debug!(
                duplicates = outcome.dropped.len(),
                "history overlapped messages delivered live"
            );
        }
        self.messages = Some(outcome.messages);
    }
}

fn dedup_roster(roster: Vec<Participant>) -> Vec<Participant> {
    let mut unique: Vec<Participant> = Vec::with_capacity(roster.len());
    for participant in roster {
        if !unique.iter().any(|existing| existing.id == participant.id) {
            unique.push(participant);
        }
    }
    unique
}
