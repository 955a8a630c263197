mod events;
mod ingest;
mod runtime;

pub use events::{FetchSettled, SessionEvent};
pub use ingest::LiveIngest;
pub use runtime::{SessionHandle, SessionWorker, create_session};
