use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolCall;

/// Represents the role of a message sender in a chat.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Base64 encoded images for multimodal models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Name of the tool whose output this message carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    /// Creates a new message with a specific role and content.
    pub fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            thinking: None,
            images: None,
            tool_calls: None,
            tool_name: None,
        }
    }

    pub fn system<T: Into<String>>(content: T) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user<T: Into<String>>(content: T) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant<T: Into<String>>(content: T) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Creates a message carrying the output of the tool `tool_name`.
    pub fn tool<T, S>(content: T, tool_name: S) -> Self
    where
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }
}

/// Fields shared by every inference request.
#[derive(Serialize, Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BaseRequest {
    pub model: String,
    /// `"json"` or a JSON schema constraining the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<InferenceOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// How long the model stays loaded after the request, e.g. `"5m"` or `"0"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl BaseRequest {
    pub fn new<T: Into<String>>(model: T) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), super::OllamaError> {
        validate_model_name(&self.model)
    }
}

pub(crate) fn validate_model_name(model: &str) -> Result<(), super::OllamaError> {
    if model.trim().is_empty() {
        return Err(super::OllamaError::Validation("model name must not be empty".into()));
    }
    Ok(())
}

/// Runtime parameters forwarded verbatim in the `options` object.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InferenceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_keep: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_batch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_thread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_last_n: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}
