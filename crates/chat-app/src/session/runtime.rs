//! Single-owner runtime for the session store; handles reach it only through channels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parley_api::{ChatApi, Credential, FetchError};
use parley_session::error::RuntimeClosedSnafu;
use parley_session::{
    ApplyOutcome, EpochGuard, FetchEpoch, SessionId, SessionSnapshot, SessionStore, SliceKind,
    SlicePayload, SyncResult,
};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::events::{FetchSettled, SessionEvent};
use super::ingest::LiveIngest;

pub type SessionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cloneable front door to a running session runtime.
///
/// The runtime stops once every handle and [`LiveIngest`] has been dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    guard: EpochGuard,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn spawn(api: Arc<dyn ChatApi>) -> Self {
        let (handle, worker) = create_session(api);
        tokio::spawn(worker);
        handle
    }

    /// Switches to `session_id` and requests its three slices.
    ///
    /// The epoch is reserved before this returns, so live messages ingested afterwards are
    /// tagged with the new activation even if the runtime has not processed it yet.
    pub fn begin_session(
        &self,
        session_id: impl AsRef<str>,
        credential: Credential,
    ) -> SyncResult<FetchEpoch> {
        let session_id = SessionId::parse(session_id.as_ref())?;
        let epoch = self.guard.advance();
        tracing::info!(session_id = %session_id, epoch = %epoch, "beginning session");

        self.events
            .send(SessionEvent::Begin {
                session_id,
                epoch,
                credential,
            })
            .map_err(|_| {
                RuntimeClosedSnafu {
                    stage: "begin-session",
                }
                .build()
            })?;
        Ok(epoch)
    }

    pub fn ingest(&self) -> LiveIngest {
        LiveIngest::new(self.guard.clone(), self.events.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Resolves once activation `epoch`, or a later one, has settled every slice.
    pub async fn wait_settled(&self, epoch: FetchEpoch) -> SyncResult<SessionSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.epoch >= epoch && snapshot.is_settled())
            .await
            .map_err(|_| {
                RuntimeClosedSnafu {
                    stage: "wait-settled",
                }
                .build()
            })?
            .clone();
        Ok(snapshot)
    }

    pub fn current_epoch(&self) -> FetchEpoch {
        self.guard.current()
    }
}

/// Builds a runtime without spawning it. The caller must poll the worker.
pub fn create_session(api: Arc<dyn ChatApi>) -> (SessionHandle, SessionWorker) {
    let guard = EpochGuard::new();
    let store = SessionStore::new(guard.clone());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (settled_tx, settled_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());

    let runtime = SessionRuntime {
        api,
        store,
        events: events_rx,
        settled_tx,
        settled_rx,
        snapshots: snapshot_tx,
        in_flight: Vec::new(),
    };
    let handle = SessionHandle {
        guard,
        events: events_tx,
        snapshots: snapshot_rx,
    };
    (handle, Box::pin(runtime.run()))
}

struct SessionRuntime {
    api: Arc<dyn ChatApi>,
    store: SessionStore,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    settled_tx: mpsc::UnboundedSender<FetchSettled>,
    settled_rx: mpsc::UnboundedReceiver<FetchSettled>,
    snapshots: watch::Sender<SessionSnapshot>,
    in_flight: Vec<AbortHandle>,
}

impl SessionRuntime {
    async fn run(mut self) {
        tracing::debug!("session runtime started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle_event(event);
                }
                // `settled_tx` lives on `self`, so this channel never closes while looping.
                Some(settled) = self.settled_rx.recv() => self.handle_settled(settled),
            }
            self.publish();
        }

        self.abort_in_flight();
        tracing::debug!("session runtime stopped");
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Begin {
                session_id,
                epoch,
                credential,
            } => self.handle_begin(session_id, epoch, credential),
            SessionEvent::Live { epoch, incoming } => {
                let outcome = self.store.append_live_message(epoch, incoming);
                tracing::trace!(epoch = %epoch, ?outcome, "live message offered to store");
            }
        }
    }

    fn handle_begin(&mut self, session_id: SessionId, epoch: FetchEpoch, credential: Credential) {
        // Opening a session marks it read even when a later switch supersedes it.
        self.spawn_mark_read(session_id.clone(), credential.clone());
        self.store.mark_read(&session_id);

        if !self.store.activate(session_id.clone(), epoch).is_applied() {
            return;
        }

        self.abort_in_flight();
        for slice in SliceKind::ALL {
            match self.store.mark_pending(epoch, slice) {
                ApplyOutcome::Applied => {
                    self.spawn_fetch(slice, session_id.clone(), epoch, credential.clone());
                }
                outcome => {
                    tracing::warn!(session_id = %session_id, epoch = %epoch, slice = %slice, ?outcome, "slice was not started");
                }
            }
        }
    }

    fn handle_settled(&mut self, settled: FetchSettled) {
        let FetchSettled {
            session_id,
            epoch,
            slice,
            result,
        } = settled;

        let outcome = match result {
            Ok(payload) => self.store.fulfill(epoch, payload),
            Err(error) => self.store.reject(epoch, slice, error.to_string()),
        };
        tracing::debug!(session_id = %session_id, epoch = %epoch, slice = %slice, ?outcome, "fetch settled");
    }

    fn spawn_fetch(
        &mut self,
        slice: SliceKind,
        session_id: SessionId,
        epoch: FetchEpoch,
        credential: Credential,
    ) {
        let api = Arc::clone(&self.api);
        let settled_tx = self.settled_tx.clone();
        let task = tokio::spawn(async move {
            let result = fetch_slice(api.as_ref(), slice, &session_id, &credential).await;
            let _ = settled_tx.send(FetchSettled::new(session_id, epoch, slice, result));
        });

        self.in_flight.retain(|handle| !handle.is_finished());
        self.in_flight.push(task.abort_handle());
    }

    fn spawn_mark_read(&self, session_id: SessionId, credential: Credential) {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            match api.mark_read(&session_id, &credential).await {
                Ok(()) => tracing::debug!(session_id = %session_id, "session marked read"),
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "failed to mark session read");
                }
            }
        });
    }

    fn abort_in_flight(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }

    fn publish(&self) {
        let next = self.store.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn fetch_slice(
    api: &dyn ChatApi,
    slice: SliceKind,
    session_id: &SessionId,
    credential: &Credential,
) -> Result<SlicePayload, FetchError> {
    match slice {
        SliceKind::Metadata => api
            .fetch_chat(session_id, credential)
            .await
            .map(SlicePayload::Chat),
        SliceKind::History => api
            .fetch_messages(session_id, credential)
            .await
            .map(SlicePayload::Messages),
        SliceKind::Roster => api
            .fetch_participants(session_id, credential)
            .await
            .map(SlicePayload::Participants),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use parley_api::{BoxFuture, Endpoint, FetchResult};
    use parley_session::{
        ChatSession, FetchState, IncomingMessage, Message, Participant, ParticipantId, Provenance,
        SyncError,
    };
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct PendingFetch {
        session_id: SessionId,
        slice: SliceKind,
        respond: oneshot::Sender<FetchResult<SlicePayload>>,
    }

    /// Chat API whose responses are supplied by the test, one request at a time.
    struct ScriptedApi {
        requests: mpsc::UnboundedSender<PendingFetch>,
        mark_reads: mpsc::UnboundedSender<SessionId>,
    }

    impl ScriptedApi {
        async fn ask(&self, session_id: &SessionId, slice: SliceKind) -> FetchResult<SlicePayload> {
            let (respond, response) = oneshot::channel();
            let _ = self.requests.send(PendingFetch {
                session_id: session_id.clone(),
                slice,
                respond,
            });
            match response.await {
                Ok(result) => result,
                Err(_) => Err(malformed(slice)),
            }
        }
    }

    fn malformed(slice: SliceKind) -> FetchError {
        FetchError::MalformedPayload {
            stage: "scripted-api",
            endpoint: Endpoint::Slice(slice),
            field: "data",
        }
    }

    impl ChatApi for ScriptedApi {
        fn fetch_chat<'a>(
            &'a self,
            session_id: &'a SessionId,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, FetchResult<ChatSession>> {
            Box::pin(async move {
                match self.ask(session_id, SliceKind::Metadata).await? {
                    SlicePayload::Chat(chat) => Ok(chat),
                    _ => Err(malformed(SliceKind::Metadata)),
                }
            })
        }

        fn fetch_messages<'a>(
            &'a self,
            session_id: &'a SessionId,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, FetchResult<Vec<Message>>> {
            Box::pin(async move {
                match self.ask(session_id, SliceKind::History).await? {
                    SlicePayload::Messages(messages) => Ok(messages),
                    _ => Err(malformed(SliceKind::History)),
                }
            })
        }

        fn fetch_participants<'a>(
            &'a self,
            session_id: &'a SessionId,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, FetchResult<Vec<Participant>>> {
            Box::pin(async move {
                match self.ask(session_id, SliceKind::Roster).await? {
                    SlicePayload::Participants(participants) => Ok(participants),
                    _ => Err(malformed(SliceKind::Roster)),
                }
            })
        }

        fn mark_read<'a>(
            &'a self,
            session_id: &'a SessionId,
            _credential: &'a Credential,
        ) -> BoxFuture<'a, FetchResult<()>> {
            Box::pin(async move {
                let _ = self.mark_reads.send(session_id.clone());
                Ok(())
            })
        }
    }

    struct Harness {
        handle: SessionHandle,
        requests: mpsc::UnboundedReceiver<PendingFetch>,
        mark_reads: mpsc::UnboundedReceiver<SessionId>,
    }

    impl Harness {
        fn start() -> Self {
            let (requests_tx, requests) = mpsc::unbounded_channel();
            let (mark_reads_tx, mark_reads) = mpsc::unbounded_channel();
            let api = Arc::new(ScriptedApi {
                requests: requests_tx,
                mark_reads: mark_reads_tx,
            });
            Self {
                handle: SessionHandle::spawn(api),
                requests,
                mark_reads,
            }
        }

        /// Collects the three slice requests issued for `session_id`.
        async fn requests_for(&mut self, session_id: &str) -> HashMap<SliceKind, PendingFetch> {
            let mut pending = HashMap::new();
            while pending.len() < SliceKind::ALL.len() {
                let request = timeout(WAIT, self.requests.recv())
                    .await
                    .expect("timed out waiting for fetch request")
                    .expect("scripted api dropped");
                if request.session_id.as_str() == session_id {
                    pending.insert(request.slice, request);
                }
            }
            pending
        }

        async fn wait_for(
            &self,
            predicate: impl FnMut(&SessionSnapshot) -> bool,
        ) -> SessionSnapshot {
            let mut snapshots = self.handle.subscribe();
            timeout(WAIT, snapshots.wait_for(predicate))
                .await
                .expect("timed out waiting for snapshot")
                .expect("runtime stopped")
                .clone()
        }
    }

    fn respond(pending: &mut HashMap<SliceKind, PendingFetch>, result: FetchResult<SlicePayload>) {
        let slice = match &result {
            Ok(payload) => payload.slice(),
            Err(error) => match error.endpoint() {
                Some(Endpoint::Slice(slice)) => slice,
                other => panic!("unexpected endpoint {other:?}"),
            },
        };
        let request = pending.remove(&slice).expect("slice was not requested");
        let _ = request.respond.send(result);
    }

    fn chat(id: &str) -> SlicePayload {
        SlicePayload::Chat(ChatSession::new(SessionId::new(id), id.to_uppercase()))
    }

    fn history(messages: &[(&str, i64)]) -> SlicePayload {
        SlicePayload::Messages(
            messages
                .iter()
                .map(|(id, created_at)| Message::text(*id, "u1", "hello", *created_at))
                .collect(),
        )
    }

    fn roster() -> SlicePayload {
        SlicePayload::Participants(vec![Participant::new(ParticipantId::new("u1"), "ann")])
    }

    fn live(session_id: &str, id: &str, created_at: i64) -> IncomingMessage {
        IncomingMessage::new(
            SessionId::new(session_id),
            Message::text(id, "u1", "live", created_at),
        )
    }

    fn message_ids(snapshot: &SessionSnapshot) -> Vec<String> {
        snapshot
            .messages
            .iter()
            .flatten()
            .map(|message| message.id.as_str().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn begin_session_loads_every_slice_and_marks_read() {
        let mut harness = Harness::start();
        let epoch = harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();

        let marked = timeout(WAIT, harness.mark_reads.recv()).await.unwrap();
        assert_eq!(marked, Some(SessionId::new("c1")));

        let mut pending = harness.requests_for("c1").await;
        let loading = harness.wait_for(|snapshot| snapshot.epoch == epoch).await;
        assert!(loading.loading);
        assert!(loading.fetches.history.is_pending());

        respond(&mut pending, Ok(chat("c1")));
        respond(&mut pending, Ok(history(&[("m2", 200), ("m1", 100)])));
        respond(&mut pending, Ok(roster()));

        let settled = timeout(WAIT, harness.handle.wait_settled(epoch))
            .await
            .expect("timed out waiting for settlement")
            .unwrap();
        assert_eq!(settled.epoch, epoch);
        assert!(!settled.loading);
        assert_eq!(settled.chat.as_ref().map(|chat| chat.name.as_str()), Some("C1"));
        assert_eq!(message_ids(&settled), vec!["m1", "m2"]);
        let first = &settled.messages.as_ref().unwrap()[0];
        assert_eq!(settled.author_of(first).map(Participant::label), Some("ann"));
    }

    #[tokio::test]
    async fn live_message_during_pending_history_is_kept() {
        let mut harness = Harness::start();
        harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let mut pending = harness.requests_for("c1").await;

        harness
            .handle
            .ingest()
            .on_incoming_message(live("c1", "m3", 300))
            .unwrap();
        harness
            .wait_for(|snapshot| snapshot.message_count() == 1)
            .await;

        respond(&mut pending, Ok(history(&[("m1", 100), ("m2", 200)])));
        respond(&mut pending, Ok(chat("c1")));
        respond(&mut pending, Ok(roster()));

        let settled = harness.wait_for(SessionSnapshot::is_settled).await;
        assert_eq!(message_ids(&settled), vec!["m1", "m2", "m3"]);
        let provenance = settled
            .messages
            .iter()
            .flatten()
            .map(|message| message.provenance)
            .collect::<Vec<_>>();
        assert_eq!(
            provenance,
            vec![Provenance::History, Provenance::History, Provenance::Live]
        );
    }

    #[tokio::test]
    async fn duplicate_live_message_is_ignored() {
        let mut harness = Harness::start();
        harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let mut pending = harness.requests_for("c1").await;
        respond(&mut pending, Ok(history(&[("m1", 100)])));
        respond(&mut pending, Ok(chat("c1")));
        respond(&mut pending, Ok(roster()));
        harness.wait_for(SessionSnapshot::is_settled).await;

        let ingest = harness.handle.ingest();
        ingest.on_incoming_message(live("c1", "m1", 100)).unwrap();
        ingest.on_incoming_message(live("c1", "m2", 200)).unwrap();

        let snapshot = harness
            .wait_for(|snapshot| snapshot.message_count() == 2)
            .await;
        assert_eq!(message_ids(&snapshot), vec!["m1", "m2"]);
        assert_eq!(
            snapshot.messages.as_ref().unwrap()[0].provenance,
            Provenance::History
        );
    }

    #[tokio::test]
    async fn switching_sessions_discards_the_previous_results() {
        let mut harness = Harness::start();
        harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let mut first = harness.requests_for("c1").await;

        let second_epoch = harness
            .handle
            .begin_session("c2", Credential::bearer("t"))
            .unwrap();
        let mut second = harness.requests_for("c2").await;

        respond(&mut first, Ok(history(&[("old", 1)])));
        respond(&mut first, Ok(chat("c1")));
        respond(&mut first, Ok(roster()));
        respond(&mut second, Ok(history(&[("new", 2)])));
        respond(&mut second, Ok(chat("c2")));
        respond(&mut second, Ok(roster()));

        let settled = harness
            .wait_for(|snapshot| snapshot.epoch == second_epoch && snapshot.is_settled())
            .await;
        assert_eq!(settled.session_id, Some(SessionId::new("c2")));
        assert_eq!(settled.chat.as_ref().map(|chat| chat.id.as_str()), Some("c2"));
        assert_eq!(message_ids(&settled), vec!["new"]);
    }

    #[tokio::test]
    async fn failed_roster_leaves_other_slices_intact() {
        let mut harness = Harness::start();
        harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let mut pending = harness.requests_for("c1").await;

        respond(&mut pending, Ok(chat("c1")));
        respond(&mut pending, Ok(history(&[("m1", 100)])));
        respond(
            &mut pending,
            Err(FetchError::Status {
                stage: "scripted-api",
                endpoint: Endpoint::Slice(SliceKind::Roster),
                status: 500,
                body: "boom".to_owned(),
            }),
        );

        let settled = harness.wait_for(SessionSnapshot::is_settled).await;
        assert!(settled.chat.is_some());
        assert_eq!(message_ids(&settled), vec!["m1"]);
        assert_eq!(settled.participants, None);
        assert!(matches!(settled.fetches.roster, FetchState::Rejected { .. }));
        assert!(settled.fetches.roster.error().is_some());
    }

    #[tokio::test]
    async fn background_messages_count_as_unread_until_opened() {
        let mut harness = Harness::start();
        harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let _pending = harness.requests_for("c1").await;

        let ingest = harness.handle.ingest();
        ingest.on_incoming_message(live("c2", "x1", 10)).unwrap();
        ingest.on_incoming_message(live("c2", "x2", 20)).unwrap();

        let snapshot = harness
            .wait_for(|snapshot| snapshot.unread.total() == 2)
            .await;
        assert_eq!(snapshot.unread.get(&SessionId::new("c2")), 2);
        assert_eq!(snapshot.message_count(), 0);

        harness
            .handle
            .begin_session("c2", Credential::bearer("t"))
            .unwrap();
        let snapshot = harness
            .wait_for(|snapshot| snapshot.session_id == Some(SessionId::new("c2")))
            .await;
        assert_eq!(snapshot.unread.total(), 0);
    }

    #[tokio::test]
    async fn empty_session_id_is_rejected_without_side_effects() {
        let harness = Harness::start();
        let before = harness.handle.current_epoch();

        let error = harness
            .handle
            .begin_session("   ", Credential::bearer("t"))
            .unwrap_err();

        assert!(matches!(error, SyncError::InvalidId { .. }));
        assert_eq!(harness.handle.current_epoch(), before);
        assert_eq!(harness.handle.snapshot(), SessionSnapshot::default());
    }

    #[tokio::test]
    async fn worker_stops_when_handles_are_dropped() {
        let (requests, _requests_rx) = mpsc::unbounded_channel();
        let (mark_reads, _mark_reads_rx) = mpsc::unbounded_channel();
        let (handle, worker) = create_session(Arc::new(ScriptedApi {
            requests,
            mark_reads,
        }));
        let ingest = handle.ingest();
        drop(handle);
        drop(ingest);

        timeout(WAIT, worker).await.expect("worker kept running");
    }

    #[tokio::test]
    async fn begin_after_worker_stopped_reports_closed_runtime() {
        let (requests, _requests_rx) = mpsc::unbounded_channel();
        let (mark_reads, _mark_reads_rx) = mpsc::unbounded_channel();
        let (handle, worker) = create_session(Arc::new(ScriptedApi {
            requests,
            mark_reads,
        }));
        drop(worker);

        let error = handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap_err();
        assert!(matches!(error, SyncError::RuntimeClosed { .. }));

        let error = handle.wait_settled(FetchEpoch::new(1)).await.unwrap_err();
        assert!(matches!(error, SyncError::RuntimeClosed { .. }));
    }

    #[tokio::test]
    async fn wait_settled_skips_superseded_activations() {
        let mut harness = Harness::start();
        let first = harness
            .handle
            .begin_session("c1", Credential::bearer("t"))
            .unwrap();
        let mut stale = harness.requests_for("c1").await;
        let second = harness
            .handle
            .begin_session("c2", Credential::bearer("t"))
            .unwrap();
        let mut pending = harness.requests_for("c2").await;

        let waiter = {
            let handle = harness.handle.clone();
            tokio::spawn(async move { handle.wait_settled(first).await })
        };
        respond(&mut stale, Ok(chat("c1")));
        respond(&mut stale, Ok(history(&[("old", 1)])));
        respond(&mut stale, Ok(roster()));
        respond(&mut pending, Ok(chat("c2")));
        respond(&mut pending, Ok(history(&[("new", 2)])));
        respond(&mut pending, Ok(roster()));

        let settled = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(settled.epoch, second);
        assert_eq!(message_ids(&settled), vec!["new"]);
    }
}
