use parley_session::{ChatSession, Message, Participant, SessionId, SliceKind};
use reqwest::{Client, Method, Url};
use snafu::{ResultExt, ensure};

use super::provider::{
    ApiConfig, BoxFuture, ChatApi, Credential, Endpoint, FetchResult, HttpClientSnafu,
    InvalidApiHostSnafu, StatusSnafu, TransportSnafu, UnsupportedApiHostSnafu,
};
use super::wire::{decode_chat, decode_messages, decode_participants};

/// Status failures keep at most this much of the response body.
const MAX_ERROR_BODY_BYTES: usize = 512;

/// REST adapter for the chat backend.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base: Url,
}

impl HttpChatApi {
    pub fn new(config: ApiConfig) -> FetchResult<Self> {
        let base = Url::parse(&config.api_host).context(InvalidApiHostSnafu {
            stage: "http-api-new",
            api_host: config.api_host.clone(),
        })?;
        ensure!(
            !base.cannot_be_a_base(),
            UnsupportedApiHostSnafu {
                stage: "http-api-new",
                api_host: config.api_host.clone(),
            }
        );

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { client, base })
    }

    /// Builds `{base}/api/chats/{session_id}[/{tail}]`, escaping the session id.
    fn chat_url(&self, session_id: &SessionId, tail: Option<&str>) -> FetchResult<Url> {
        let mut url = self.base.clone();
        {
            let Ok(mut segments) = url.path_segments_mut() else {
                return UnsupportedApiHostSnafu {
                    stage: "build-chat-url",
                    api_host: self.base.to_string(),
                }
                .fail();
            };
            segments
                .pop_if_empty()
                .extend(["api", "chats", session_id.as_str()]);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: Endpoint,
        url: Url,
        credential: &Credential,
    ) -> FetchResult<String> {
        tracing::debug!(%endpoint, %url, "sending chat api request");
        let response = self
            .client
            .request(method, url)
            .bearer_auth(credential.token())
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-request",
                endpoint,
            })?;

        let status = response.status();
        let body = response.text().await.context(TransportSnafu {
            stage: "read-response-body",
            endpoint,
        })?;

        if !status.is_success() {
            return StatusSnafu {
                stage: "check-response-status",
                endpoint,
                status: status.as_u16(),
                body: truncate_body(body),
            }
            .fail();
        }

        Ok(body)
    }

    async fn get_slice(
        &self,
        slice: SliceKind,
        session_id: &SessionId,
        credential: &Credential,
        tail: Option<&str>,
    ) -> FetchResult<String> {
        let url = self.chat_url(session_id, tail)?;
        self.send(Method::GET, Endpoint::Slice(slice), url, credential)
            .await
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

impl ChatApi for HttpChatApi {
    fn fetch_chat<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<ChatSession>> {
        Box::pin(async move {
            let body = self
                .get_slice(SliceKind::Metadata, session_id, credential, None)
                .await?;
            decode_chat(&body)
        })
    }

    fn fetch_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<Vec<Message>>> {
        Box::pin(async move {
            let body = self
                .get_slice(SliceKind::History, session_id, credential, Some("messages"))
                .await?;
            decode_messages(&body)
        })
    }

    fn fetch_participants<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<Vec<Participant>>> {
        Box::pin(async move {
            let body = self
                .get_slice(SliceKind::Roster, session_id, credential, Some("users"))
                .await?;
            decode_participants(&body)
        })
    }

    fn mark_read<'a>(
        &'a self,
        session_id: &'a SessionId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, FetchResult<()>> {
        Box::pin(async move {
            let url = self.chat_url(session_id, Some("read"))?;
            self.send(Method::POST, Endpoint::MarkRead, url, credential)
                .await
                .map(|_| ())
        })
    }
}
