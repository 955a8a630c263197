use parley_api::{Credential, FetchError};
use parley_session::{FetchEpoch, IncomingMessage, SessionId, SliceKind, SlicePayload};

/// Inputs delivered to the session runtime by handles and the live ingest.
#[derive(Debug)]
pub enum SessionEvent {
    /// The user opened `session_id`; `epoch` was reserved when the call was made.
    Begin {
        session_id: SessionId,
        epoch: FetchEpoch,
        credential: Credential,
    },
    /// The transport delivered a message; `epoch` is the one observed on arrival.
    Live {
        epoch: FetchEpoch,
        incoming: IncomingMessage,
    },
}

/// Completion of one slice fetch, tagged with the activation it was issued under.
#[derive(Debug)]
pub struct FetchSettled {
    pub session_id: SessionId,
    pub epoch: FetchEpoch,
    pub slice: SliceKind,
    pub result: Result<SlicePayload, FetchError>,
}

impl FetchSettled {
    pub fn new(
        session_id: SessionId,
        epoch: FetchEpoch,
        slice: SliceKind,
        result: Result<SlicePayload, FetchError>,
    ) -> Self {
        Self {
            session_id,
            epoch,
            slice,
            result,
        }
    }
}
