use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncError {
    #[snafu(display("{id_type} '{raw}' is empty"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
    },
    #[snafu(display("session runtime stopped before `{stage}` could be delivered"))]
    RuntimeClosed { stage: &'static str },
}

pub type SyncResult<T> = Result<T, SyncError>;
