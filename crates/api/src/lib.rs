use std::sync::Arc;

mod http;
mod provider;
mod wire;

pub use http::HttpChatApi;
pub use provider::{
    ApiConfig, BoxFuture, ChatApi, Credential, DEFAULT_API_HOST, DEFAULT_REQUEST_TIMEOUT,
    Endpoint, FetchError, FetchResult,
};
pub use wire::decode_incoming_message;

pub fn create_api(config: ApiConfig) -> FetchResult<Arc<dyn ChatApi>> {
    Ok(Arc::new(HttpChatApi::new(config)?))
}
