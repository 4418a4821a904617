use serde::{Deserialize, Serialize};

use crate::tools::{ResolvedToolCall, Tool};

use super::base::{BaseRequest, Message};

/// Request for the `/api/chat` endpoint.
///
/// `tools` carry their derived schema on the wire and their executors locally;
/// tool calls in the reply are resolved against them.
#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
}

impl ChatRequest {
    pub fn new<T: Into<String>>(model: T, messages: Vec<Message>) -> Self {
        Self {
            base: BaseRequest::new(model),
            messages,
            tools: Vec::new(),
            think: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    pub message: Message,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
    /// Tool calls from `message.tool_calls` bound to the request's tools.
    #[serde(skip)]
    pub resolved_tool_calls: Vec<ResolvedToolCall>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatStreamChunk {
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
    #[serde(skip)]
    pub resolved_tool_calls: Vec<ResolvedToolCall>,
}
