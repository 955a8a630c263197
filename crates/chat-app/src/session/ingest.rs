use std::pin::pin;

use futures::{Stream, StreamExt};
use parley_session::{EpochGuard, IncomingMessage, SyncResult, error::RuntimeClosedSnafu};
use tokio::sync::mpsc;

use super::events::SessionEvent;

/// Entry point for the real-time transport.
///
/// Each message is stamped with the epoch current at arrival and handed to the runtime,
/// which applies it on the same task as fetch results. Backpressure belongs to the transport.
#[derive(Debug, Clone)]
pub struct LiveIngest {
    guard: EpochGuard,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl LiveIngest {
    pub(crate) fn new(guard: EpochGuard, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { guard, events }
    }

    pub fn on_incoming_message(&self, incoming: IncomingMessage) -> SyncResult<()> {
        let epoch = self.guard.current();
        tracing::trace!(
            session_id = %incoming.session_id,
            message_id = %incoming.message.id,
            epoch = %epoch,
            "live message received"
        );
        self.events
            .send(SessionEvent::Live { epoch, incoming })
            .map_err(|_| {
                RuntimeClosedSnafu {
                    stage: "on-incoming-message",
                }
                .build()
            })
    }

    /// Drains a transport stream into the runtime, returning how many messages were forwarded.
    pub async fn forward<S>(&self, stream: S) -> SyncResult<u64>
    where
        S: Stream<Item = IncomingMessage>,
    {
        let mut stream = pin!(stream);
        let mut forwarded = 0_u64;
        while let Some(incoming) = stream.next().await {
            self.on_incoming_message(incoming)?;
            forwarded = forwarded.saturating_add(1);
        }
        Ok(forwarded)
    }
}
