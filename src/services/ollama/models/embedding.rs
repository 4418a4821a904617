use serde::{Deserialize, Serialize};

use super::base::InferenceOptions;

/// Text to embed: a single string or a batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for EmbedInput {
    fn from(s: &str) -> Self {
        EmbedInput::Single(s.to_owned())
    }
}

impl From<String> for EmbedInput {
    fn from(s: String) -> Self {
        EmbedInput::Single(s)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(v: Vec<String>) -> Self {
        EmbedInput::Batch(v)
    }
}

/// Request for the `/api/embed` endpoint.
#[derive(Serialize, Debug, Clone)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<InferenceOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl EmbedRequest {
    pub fn new<M: Into<String>, I: Into<EmbedInput>>(model: M, input: I) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            truncate: None,
            dimensions: None,
            options: None,
            keep_alive: None,
        }
    }
}

/// Response from the `/api/embed` endpoint, one vector per input.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EmbedResponse {
    #[serde(default)]
    pub model: String,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u32>,
}

/// Request for the legacy `/api/embeddings` endpoint.
#[derive(Serialize, Debug, Clone)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<InferenceOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl EmbeddingsRequest {
    pub fn new<M: Into<String>, P: Into<String>>(model: M, prompt: P) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            options: None,
            keep_alive: None,
        }
    }
}

/// Response from the `/api/embeddings` endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EmbeddingsResponse {
    pub embedding: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn batch_input_serializes_as_array() {
        let req = EmbedRequest::new("all-minilm", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"model": "all-minilm", "input": ["a", "b"]})
        );
    }

    #[test]
    fn response_requires_embeddings() {
        assert!(serde_json::from_value::<EmbedResponse>(json!({"model": "m"})).is_err());
        let ok: EmbedResponse =
            serde_json::from_value(json!({"model": "m", "embeddings": [[0.1, 0.2]]})).unwrap();
        assert_eq!(ok.embeddings, vec![vec![0.1, 0.2]]);
    }
}
