use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parley_session::{ChatSession, Message, Participant, SessionId, SliceKind};
use snafu::Snafu;

pub const DEFAULT_API_HOST: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque bearer token supplied by the auth collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub api_host: String,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(api_host: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into().trim().to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_HOST)
    }
}

/// Remote operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Slice(SliceKind),
    MarkRead,
    /// Messages pushed by the real-time transport rather than fetched.
    Live,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slice(slice) => write!(formatter, "{slice}"),
            Self::MarkRead => formatter.write_str("mark-read"),
            Self::Live => formatter.write_str("live"),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("api host '{api_host}' is not a valid base URL"))]
    InvalidApiHost {
        stage: &'static str,
        api_host: String,
        source: url::ParseError,
    },
    #[snafu(display("api host '{api_host}' cannot carry path segments"))]
    UnsupportedApiHost {
        stage: &'static str,
        api_host: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{endpoint} request failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        endpoint: Endpoint,
        source: reqwest::Error,
    },
    #[snafu(display("{endpoint} endpoint returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: Endpoint,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode {endpoint} payload: {source}"))]
    Decode {
        stage: &'static str,
        endpoint: Endpoint,
        source: serde_json::Error,
    },
    #[snafu(display("{endpoint} payload is missing `{field}`"))]
    MalformedPayload {
        stage: &'static str,
        endpoint: Endpoint,
        field: &'static str,
    },
}

impl FetchError {
    /// Endpoint the failure belongs to, when it came from a request.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. }
            | Self::MalformedPayload { endpoint, .. } => Some(*endpoint),
            Self::InvalidApiHost { .. } | Self::UnsupportedApiHost { .. } | Self::HttpClient { .. } => None,
        }
    }
}

/// Remote collaborator that populates a session and acknowledges reads.
///
/// Every fetch is independent; the coordinator issues all three concurrently.
pub trait ChatApi: Send + Sync {
    fn fetch_chat<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<ChatSession>>;

    fn fetch_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<Vec<Message>>>;

    fn fetch_participants<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<Vec<Participant>>>;

    fn mark_read<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<()>>;
}
