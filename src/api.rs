//! Typed facade over the server's WebSocket API.
//!
//! Each method forwards to [`RemoteClient::invoke`] with the literal remote
//! method name, so call sites get typed results without going through the
//! dynamic [`CallProxy`](crate::rpc::CallProxy).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rpc::{RemoteClient, TypedCall};

/// Remote method that runs a prompt and streams the conversation.
pub const HANDLE_PROMPT_REQUEST: &str = "handlePromptRequest";

/// One chat message produced while a prompt runs.
///
/// `content` is either a plain string or a list of content blocks, so it is
/// kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: Value,
    #[serde(rename = "serverId")]
    pub server_id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Methods the server exposes on its RPC endpoint.
pub trait ServerWebsocketApi {
    /// Run `prompt` and stream the resulting messages.
    ///
    /// `previous_conversation_id` continues an earlier conversation.
    fn handle_prompt_request(
        &self,
        prompt: &str,
        model: Option<&str>,
        driver: Option<&str>,
        previous_conversation_id: Option<i64>,
    ) -> TypedCall<PromptMessage>;
}

impl ServerWebsocketApi for RemoteClient {
    fn handle_prompt_request(
        &self,
        prompt: &str,
        model: Option<&str>,
        driver: Option<&str>,
        previous_conversation_id: Option<i64>,
    ) -> TypedCall<PromptMessage> {
        // Positional arguments; absent ones travel as null.
        let args = vec![
            Value::from(prompt),
            model.map_or(Value::Null, Value::from),
            driver.map_or(Value::Null, Value::from),
            previous_conversation_id.map_or(Value::Null, Value::from),
        ];
        self.invoke(HANDLE_PROMPT_REQUEST, Some(args)).typed()
    }
}
