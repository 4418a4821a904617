//! Model-management request and response shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{validate_model_name, Message};
use super::OllamaError;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ModelDetails {
    #[serde(default)]
    pub parent_model: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub families: Option<Vec<String>>,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
}

/// One entry of `/api/tags`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelSummary {
    #[serde(default)]
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub details: ModelDetails,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ListResponse {
    #[serde(default)]
    pub models: Vec<ModelSummary>,
}

/// Request for `/api/show`.
#[derive(Serialize, Debug, Clone)]
pub struct ShowRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl ShowRequest {
    pub fn new<T: Into<String>>(model: T) -> Self {
        Self {
            model: model.into(),
            verbose: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ShowResponse {
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub modelfile: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub details: ModelDetails,
    #[serde(default)]
    pub model_info: HashMap<String, Value>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A model currently loaded in memory (`/api/ps`).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RunningModel {
    #[serde(default)]
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_vram: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub details: ModelDetails,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ProcessResponse {
    #[serde(default)]
    pub models: Vec<RunningModel>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CopyRequest {
    pub source: String,
    pub destination: String,
}

impl CopyRequest {
    pub fn new<S: Into<String>, D: Into<String>>(source: S, destination: D) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OllamaError> {
        if self.source.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(OllamaError::Validation(
                "copy requires both a source and a destination".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct DeleteRequest {
    pub model: String,
}

impl DeleteRequest {
    pub fn new<T: Into<String>>(model: T) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// Outcome of operations whose success is signalled by the status code alone.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub(crate) fn success() -> Self {
        Self {
            status: "success".into(),
        }
    }
}

/// Request for `/api/pull` and `/api/push`.
#[derive(Serialize, Debug, Clone)]
pub struct TransferRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl TransferRequest {
    pub fn new<T: Into<String>>(model: T) -> Self {
        Self {
            model: model.into(),
            insecure: None,
            stream: None,
        }
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }
}

pub type PullRequest = TransferRequest;
pub type PushRequest = TransferRequest;

/// Request for `/api/create`.
#[derive(Serialize, Debug, Clone, Default)]
pub struct CreateRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// File name to blob digest (`sha256:...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapters: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CreateRequest {
    pub fn new<T: Into<String>>(model: T) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn from_model<T: Into<String>>(mut self, from: T) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_system<T: Into<String>>(mut self, system: T) -> Self {
        self.system = Some(system.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OllamaError> {
        validate_model_name(&self.model)?;
        if self.from.is_none() && self.files.is_none() {
            return Err(OllamaError::Validation(
                "create requires either `from` or `files`".into(),
            ));
        }
        Ok(())
    }
}

/// Progress record streamed by pull, push and create.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProgressResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VersionResponse {
    pub version: String,
}
