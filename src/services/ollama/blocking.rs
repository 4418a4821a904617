use std::{
    io::{Cursor, Read},
    sync::Arc,
};

use reqwest::blocking::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use crate::tools::ToolRegistry;

use super::{
    client::{decode_status, resolve_tool_calls},
    config::ClientConfig,
    models::{
        base::validate_model_name, ChatRequest, ChatResponse, ChatStreamChunk, CopyRequest, CreateRequest,
        DeleteRequest, EmbedRequest, EmbedResponse, EmbeddingsRequest, EmbeddingsResponse, GenerateRequest,
        GenerateResponse, ListResponse, OllamaError, ProcessResponse, ProgressResponse, PullRequest, PushRequest,
        ShowRequest, ShowResponse, StatusResponse, VersionResponse,
    },
    stream::{ChunkIter, StreamChunk},
    transport::{decode_body, ApiRequest, Dispatch, Operation, Transport},
};

/// Lazily decoded chunks of a streamed response; dropping it closes the connection.
pub type ChunkIterator<T> = Box<dyn Iterator<Item = Result<T, OllamaError>> + Send>;

/// Blocking client for an Ollama service, with the same operations as
/// [`OllamaClient`](super::OllamaClient).
///
/// Like any `reqwest` blocking client it must be created, used and dropped
/// outside of an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingOllamaClient {
    client: Client,
    transport: Arc<Transport>,
}

impl TryFrom<ClientConfig> for BlockingOllamaClient {
    type Error = OllamaError;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        let transport = Transport::new(&config)?;
        // `None` also lifts reqwest's default 30s limit, which long pulls exceed
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OllamaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            transport: Arc::new(transport),
        })
    }
}

impl BlockingOllamaClient {
    pub fn new() -> Result<Self, OllamaError> {
        Self::try_from(ClientConfig::default())
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    #[instrument(name = "ollama.chat", skip_all, fields(model = %request.base.model))]
    pub fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(false);
        let registry: ToolRegistry = request.tools.iter().cloned().collect();

        let mut response: ChatResponse = self.call(Operation::Chat, &request)?;
        response.resolved_tool_calls = resolve_tool_calls(Some(&response.message), &registry)?;
        Ok(response)
    }

    #[instrument(name = "ollama.chat_stream", skip_all, fields(model = %request.base.model))]
    pub fn chat_stream(&self, mut request: ChatRequest) -> Result<ChunkIterator<ChatStreamChunk>, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(true);
        let registry: ToolRegistry = request.tools.iter().cloned().collect();

        let chunks = self.call_stream::<ChatStreamChunk, _>(Operation::Chat, &request)?;
        let mut failed = false;
        let resolved = chunks.map_while(move |item| {
            if failed {
                return None;
            }
            let item = item.and_then(|mut chunk| {
                chunk.resolved_tool_calls = resolve_tool_calls(chunk.message.as_ref(), &registry)?;
                Ok(chunk)
            });
            failed = item.is_err();
            Some(item)
        });
        Ok(Box::new(resolved))
    }

    #[instrument(name = "ollama.generate", skip_all, fields(model = %request.base.model))]
    pub fn generate(&self, mut request: GenerateRequest) -> Result<GenerateResponse, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(false);
        self.call(Operation::Generate, &request)
    }

    #[instrument(name = "ollama.generate_stream", skip_all, fields(model = %request.base.model))]
    pub fn generate_stream(&self, mut request: GenerateRequest) -> Result<ChunkIterator<GenerateResponse>, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(true);
        self.call_stream(Operation::Generate, &request)
    }

    #[instrument(name = "ollama.embed", skip_all, fields(model = %request.model))]
    pub fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Embed, &request)
    }

    #[instrument(name = "ollama.embeddings", skip_all, fields(model = %request.model))]
    pub fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Embeddings, &request)
    }

    #[instrument(name = "ollama.list", skip_all)]
    pub fn list(&self) -> Result<ListResponse, OllamaError> {
        decode_body(&self.send_single(ApiRequest::new(Operation::List))?)
    }

    #[instrument(name = "ollama.show", skip_all, fields(model = %request.model))]
    pub fn show(&self, request: ShowRequest) -> Result<ShowResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Show, &request)
    }

    #[instrument(name = "ollama.ps", skip_all)]
    pub fn ps(&self) -> Result<ProcessResponse, OllamaError> {
        decode_body(&self.send_single(ApiRequest::new(Operation::Ps))?)
    }

    #[instrument(name = "ollama.copy", skip_all, fields(source = %request.source, destination = %request.destination))]
    pub fn copy(&self, request: CopyRequest) -> Result<StatusResponse, OllamaError> {
        request.validate()?;
        decode_status(&self.send_single(ApiRequest::json(Operation::Copy, &request, false)?)?)
    }

    #[instrument(name = "ollama.delete", skip_all, fields(model = %request.model))]
    pub fn delete(&self, request: DeleteRequest) -> Result<StatusResponse, OllamaError> {
        validate_model_name(&request.model)?;
        decode_status(&self.send_single(ApiRequest::json(Operation::Delete, &request, false)?)?)
    }

    #[instrument(name = "ollama.create", skip_all, fields(model = %request.model))]
    pub fn create(&self, mut request: CreateRequest) -> Result<ProgressResponse, OllamaError> {
        request.validate()?;
        request.stream = Some(false);
        self.call(Operation::Create, &request)
    }

    #[instrument(name = "ollama.create_stream", skip_all, fields(model = %request.model))]
    pub fn create_stream(&self, mut request: CreateRequest) -> Result<ChunkIterator<ProgressResponse>, OllamaError> {
        request.validate()?;
        request.stream = Some(true);
        self.call_stream(Operation::Create, &request)
    }

    #[instrument(name = "ollama.pull", skip_all, fields(model = %request.model))]
    pub fn pull(&self, mut request: PullRequest) -> Result<ProgressResponse, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(false);
        self.call(Operation::Pull, &request)
    }

    #[instrument(name = "ollama.pull_stream", skip_all, fields(model = %request.model))]
    pub fn pull_stream(&self, mut request: PullRequest) -> Result<ChunkIterator<ProgressResponse>, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(true);
        self.call_stream(Operation::Pull, &request)
    }

    #[instrument(name = "ollama.push", skip_all, fields(model = %request.model))]
    pub fn push(&self, mut request: PushRequest) -> Result<ProgressResponse, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(false);
        self.call(Operation::Push, &request)
    }

    #[instrument(name = "ollama.push_stream", skip_all, fields(model = %request.model))]
    pub fn push_stream(&self, mut request: PushRequest) -> Result<ChunkIterator<ProgressResponse>, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(true);
        self.call_stream(Operation::Push, &request)
    }

    #[instrument(name = "ollama.version", skip_all)]
    pub fn version(&self) -> Result<VersionResponse, OllamaError> {
        decode_body(&self.send_single(ApiRequest::new(Operation::Version))?)
    }

    fn call<B, R>(&self, operation: Operation, body: &B) -> Result<R, OllamaError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        decode_body(&self.send_single(ApiRequest::json(operation, body, false)?)?)
    }

    fn call_stream<T, B>(&self, operation: Operation, body: &B) -> Result<ChunkIterator<T>, OllamaError>
    where
        T: StreamChunk + Send + 'static,
        B: Serialize,
    {
        let reader: Box<dyn Read + Send> = match self.dispatch(ApiRequest::json(operation, body, true)?)? {
            Dispatch::Stream(response) => Box::new(response),
            Dispatch::Single(body) => Box::new(Cursor::new(body)),
        };
        Ok(Box::new(ChunkIter::new(reader)))
    }

    fn send_single(&self, request: ApiRequest) -> Result<Vec<u8>, OllamaError> {
        match self.dispatch(request)? {
            Dispatch::Single(body) => Ok(body),
            Dispatch::Stream(response) => Ok(response.bytes()?.to_vec()),
        }
    }

    fn dispatch(&self, request: ApiRequest) -> Result<Dispatch<reqwest::blocking::Response>, OllamaError> {
        let prepared = self.transport.prepare_blocking(request)?;
        self.transport.send_blocking(&self.client, prepared)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        services::ollama::{
            config::ClientBuilder,
            models::Message,
            test_server::{stalled_stream, Afterwards},
        },
        signing::KeyStore,
        tools::{Tool, ToolError},
    };

    /// Look up the weather for a city.
    #[derive(Deserialize, JsonSchema)]
    struct WeatherArgs {
        /// City name
        city: String,
    }

    /// Runs `f` off the async runtime, where the blocking client is allowed.
    async fn off_runtime<F, T>(f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    fn client(uri: String, keys: &std::path::Path) -> BlockingOllamaClient {
        ClientConfig::default()
            .host(Some(uri))
            .key_store(Some(Arc::new(KeyStore::new(keys.join("id_ed25519")))))
            .build_blocking()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chat_resolves_tool_calls() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "weather", "arguments": "{\"city\":\"Ljubljana\"}"}}]
                },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let key_dir = keys.path().to_owned();
        let result = off_runtime(move || {
            let weather = Tool::from_fn("weather", |a: WeatherArgs| Ok::<_, ToolError>(format!("sunny in {}", a.city)))?;
            let request = ChatRequest::new("llama3.2", vec![Message::user("weather?")]).with_tools(vec![weather]);
            let response = client(uri, &key_dir).chat(request)?;
            let call = &response.resolved_tool_calls[0];
            Ok::<_, OllamaError>(call.invoke_blocking()?)
        })
        .await
        .unwrap();

        assert_eq!(result, json!("sunny in Ljubljana"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generate_stream_reads_chunks_in_order() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        let body = [
            json!({"model": "m", "response": "1", "done": false}),
            json!({"model": "m", "response": "2", "done": false}),
            json!({"model": "m", "response": "", "done": true, "done_reason": "stop"}),
        ]
        .iter()
        .map(|l| format!("{l}\n"))
        .collect::<String>();
        Mock::given(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let key_dir = keys.path().to_owned();
        let chunks = off_runtime(move || {
            client(uri, &key_dir)
                .generate_stream(GenerateRequest::new("m", "count"))?
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .unwrap();

        let text: Vec<&str> = chunks.iter().map(|c| c.response.as_str()).collect();
        assert_eq!(text, vec!["1", "2", ""]);
        assert_eq!(chunks[2].done_reason.as_deref(), Some("stop"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_is_signed() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(path("/api/push"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let key_dir = keys.path().to_owned();
        let status = off_runtime(move || client(uri, &key_dir).push(PushRequest::new("me/model")))
            .await
            .unwrap();
        assert!(status.is_done());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_errors_carry_the_status() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(path("/api/delete"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let key_dir = keys.path().to_owned();
        let err = off_runtime(move || client(uri, &key_dir).delete(DeleteRequest::new("ghost")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "request rejected (404): model not found");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_an_iterator_closes_the_connection() {
        let keys = tempfile::tempdir().unwrap();
        let (uri, server) = stalled_stream(
            r#"{"model":"m","response":"a","done":false}"#,
            Duration::from_secs(5),
        )
        .await;

        let key_dir = keys.path().to_owned();
        let first = off_runtime(move || {
            let mut chunks = client(uri, &key_dir)
                .generate_stream(GenerateRequest::new("m", "go"))
                .unwrap();
            let first = chunks.next().unwrap().unwrap();
            drop(chunks);
            first
        })
        .await;

        assert_eq!(first.response, "a");
        assert_eq!(server.await.unwrap(), Afterwards::Closed);
    }
}
