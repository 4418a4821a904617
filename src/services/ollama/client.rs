use std::sync::Arc;

use async_stream::try_stream;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument};

use crate::{
    signing::SigningError,
    tools::{ResolvedToolCall, ToolRegistry},
};

use super::{
    config::ClientConfig,
    models::{
        base::validate_model_name, ChatRequest, ChatResponse, ChatStreamChunk, CopyRequest, CreateRequest,
        DeleteRequest, EmbedRequest, EmbedResponse, EmbeddingsRequest, EmbeddingsResponse, GenerateRequest,
        GenerateResponse, ListResponse, Message, OllamaError, ProcessResponse, ProgressResponse, PullRequest,
        PushRequest, ShowRequest, ShowResponse, StatusResponse, VersionResponse,
    },
    stream::{decode_stream, ChunkStream, StreamChunk},
    transport::{decode_body, ApiRequest, Dispatch, Operation, PreparedRequest, Transport},
};

/// Async client for an Ollama service.
///
/// Cheap to clone; clones share the connection pool and the signing key.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    transport: Arc<Transport>,
}

impl TryFrom<ClientConfig> for OllamaClient {
    type Error = OllamaError;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        let transport = Transport::new(&config)?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| OllamaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            transport: Arc::new(transport),
        })
    }
}

impl OllamaClient {
    /// Client for `OLLAMA_HOST`, or the local default.
    pub fn new() -> Result<Self, OllamaError> {
        Self::try_from(ClientConfig::default())
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Sends a chat request and resolves any tool calls against `request.tools`.
    #[instrument(name = "ollama.chat", skip_all, fields(model = %request.base.model))]
    pub async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(false);
        let registry: ToolRegistry = request.tools.iter().cloned().collect();

        let mut response: ChatResponse = self.call(Operation::Chat, &request).await?;
        response.resolved_tool_calls = resolve_tool_calls(Some(&response.message), &registry)?;
        Ok(response)
    }

    /// Streams a chat reply; tool calls are resolved per chunk.
    #[instrument(name = "ollama.chat_stream", skip_all, fields(model = %request.base.model))]
    pub async fn chat_stream(&self, mut request: ChatRequest) -> Result<ChunkStream<ChatStreamChunk>, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(true);
        let registry: ToolRegistry = request.tools.iter().cloned().collect();

        let mut chunks = self.call_stream::<ChatStreamChunk, _>(Operation::Chat, &request).await?;
        let s = try_stream! {
            while let Some(chunk) = chunks.next().await {
                let mut chunk = chunk?;
                chunk.resolved_tool_calls = resolve_tool_calls(chunk.message.as_ref(), &registry)?;
                yield chunk;
            }
        };
        Ok(Box::pin(s))
    }

    #[instrument(name = "ollama.generate", skip_all, fields(model = %request.base.model))]
    pub async fn generate(&self, mut request: GenerateRequest) -> Result<GenerateResponse, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(false);
        self.call(Operation::Generate, &request).await
    }

    #[instrument(name = "ollama.generate_stream", skip_all, fields(model = %request.base.model))]
    pub async fn generate_stream(
        &self,
        mut request: GenerateRequest,
    ) -> Result<ChunkStream<GenerateResponse>, OllamaError> {
        request.base.validate()?;
        request.base.stream = Some(true);
        self.call_stream(Operation::Generate, &request).await
    }

    #[instrument(name = "ollama.embed", skip_all, fields(model = %request.model))]
    pub async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Embed, &request).await
    }

    /// Legacy single-prompt embedding endpoint.
    #[instrument(name = "ollama.embeddings", skip_all, fields(model = %request.model))]
    pub async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Embeddings, &request).await
    }

    /// Models available locally.
    #[instrument(name = "ollama.list", skip_all)]
    pub async fn list(&self) -> Result<ListResponse, OllamaError> {
        let body = self.send_single(ApiRequest::new(Operation::List)).await?;
        decode_body(&body)
    }

    #[instrument(name = "ollama.show", skip_all, fields(model = %request.model))]
    pub async fn show(&self, request: ShowRequest) -> Result<ShowResponse, OllamaError> {
        validate_model_name(&request.model)?;
        self.call(Operation::Show, &request).await
    }

    /// Models currently loaded into memory.
    #[instrument(name = "ollama.ps", skip_all)]
    pub async fn ps(&self) -> Result<ProcessResponse, OllamaError> {
        let body = self.send_single(ApiRequest::new(Operation::Ps)).await?;
        decode_body(&body)
    }

    #[instrument(name = "ollama.copy", skip_all, fields(source = %request.source, destination = %request.destination))]
    pub async fn copy(&self, request: CopyRequest) -> Result<StatusResponse, OllamaError> {
        request.validate()?;
        let body = self.send_single(ApiRequest::json(Operation::Copy, &request, false)?).await?;
        decode_status(&body)
    }

    #[instrument(name = "ollama.delete", skip_all, fields(model = %request.model))]
    pub async fn delete(&self, request: DeleteRequest) -> Result<StatusResponse, OllamaError> {
        validate_model_name(&request.model)?;
        let body = self.send_single(ApiRequest::json(Operation::Delete, &request, false)?).await?;
        decode_status(&body)
    }

    /// Creates a model and waits for the final status.
    #[instrument(name = "ollama.create", skip_all, fields(model = %request.model))]
    pub async fn create(&self, mut request: CreateRequest) -> Result<ProgressResponse, OllamaError> {
        request.validate()?;
        request.stream = Some(false);
        self.call(Operation::Create, &request).await
    }

    #[instrument(name = "ollama.create_stream", skip_all, fields(model = %request.model))]
    pub async fn create_stream(
        &self,
        mut request: CreateRequest,
    ) -> Result<ChunkStream<ProgressResponse>, OllamaError> {
        request.validate()?;
        request.stream = Some(true);
        self.call_stream(Operation::Create, &request).await
    }

    /// Downloads a model from the registry. Always signed.
    #[instrument(name = "ollama.pull", skip_all, fields(model = %request.model))]
    pub async fn pull(&self, mut request: PullRequest) -> Result<ProgressResponse, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(false);
        self.call(Operation::Pull, &request).await
    }

    #[instrument(name = "ollama.pull_stream", skip_all, fields(model = %request.model))]
    pub async fn pull_stream(&self, mut request: PullRequest) -> Result<ChunkStream<ProgressResponse>, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(true);
        self.call_stream(Operation::Pull, &request).await
    }

    /// Uploads a model to the registry. Always signed.
    #[instrument(name = "ollama.push", skip_all, fields(model = %request.model))]
    pub async fn push(&self, mut request: PushRequest) -> Result<ProgressResponse, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(false);
        self.call(Operation::Push, &request).await
    }

    #[instrument(name = "ollama.push_stream", skip_all, fields(model = %request.model))]
    pub async fn push_stream(&self, mut request: PushRequest) -> Result<ChunkStream<ProgressResponse>, OllamaError> {
        validate_model_name(&request.model)?;
        request.stream = Some(true);
        self.call_stream(Operation::Push, &request).await
    }

    #[instrument(name = "ollama.version", skip_all)]
    pub async fn version(&self) -> Result<VersionResponse, OllamaError> {
        let body = self.send_single(ApiRequest::new(Operation::Version)).await?;
        decode_body(&body)
    }

    async fn call<B, R>(&self, operation: Operation, body: &B) -> Result<R, OllamaError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let body = self.send_single(ApiRequest::json(operation, body, false)?).await?;
        decode_body(&body)
    }

    async fn call_stream<T, B>(&self, operation: Operation, body: &B) -> Result<ChunkStream<T>, OllamaError>
    where
        T: StreamChunk + Send + 'static,
        B: Serialize,
    {
        match self.dispatch(ApiRequest::json(operation, body, true)?).await? {
            Dispatch::Stream(response) => Ok(decode_stream(
                response.bytes_stream().map(|chunk| chunk.map_err(OllamaError::from)),
            )),
            Dispatch::Single(body) => Ok(decode_stream(stream::iter([Ok::<_, OllamaError>(body)]))),
        }
    }

    async fn send_single(&self, request: ApiRequest) -> Result<Vec<u8>, OllamaError> {
        match self.dispatch(request).await? {
            Dispatch::Single(body) => Ok(body),
            Dispatch::Stream(response) => Ok(response.bytes().await?.to_vec()),
        }
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<Dispatch<reqwest::Response>, OllamaError> {
        let prepared = self.prepare(request).await?;
        self.transport.send(&self.client, prepared).await
    }

    /// Signing may read or create the key file, so it runs on the blocking pool.
    async fn prepare(&self, request: ApiRequest) -> Result<PreparedRequest, OllamaError> {
        let operation = request.operation;
        if !self.transport.requires_signature(operation) {
            return self.transport.prepare(request, None);
        }

        debug!(path = operation.path(), "signing request");
        let transport = self.transport.clone();
        let signed = tokio::task::spawn_blocking(move || transport.sign(operation))
            .await
            .map_err(|e| SigningError::Task(e.to_string()))??;
        self.transport.prepare(request, Some(signed))
    }
}

/// Binds the tool calls in `message` to the request's tools.
///
/// A call naming an unknown tool, or carrying arguments that do not fit the
/// tool's schema, fails the whole response.
pub(crate) fn resolve_tool_calls(
    message: Option<&Message>,
    registry: &ToolRegistry,
) -> Result<Vec<ResolvedToolCall>, OllamaError> {
    let Some(calls) = message.and_then(|m| m.tool_calls.as_ref()) else {
        return Ok(Vec::new());
    };
    let resolved = calls
        .iter()
        .map(|call| registry.resolve(call))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resolved)
}

/// Copy and delete answer with an empty 200.
pub(crate) fn decode_status(body: &[u8]) -> Result<StatusResponse, OllamaError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StatusResponse::success());
    }
    decode_body(body)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, header_exists, method, path, query_param_is_missing},
        Mock, MockServer, Request, ResponseTemplate,
    };

    use super::*;
    use crate::{
        services::ollama::{
            config::ClientBuilder,
            test_server::{stalled_stream, Afterwards},
        },
        signing::KeyStore,
        tools::{Tool, ToolError},
    };

    /// Add two integers.
    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        x: i64,
        y: i64,
    }

    fn client(server: &MockServer, keys: &tempfile::TempDir) -> OllamaClient {
        ClientConfig::default()
            .host(Some(server.uri()))
            .key_store(Some(Arc::new(KeyStore::new(keys.path().join("id_ed25519")))))
            .build()
            .unwrap()
    }

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    #[tokio::test]
    async fn chat_round_trip_resolves_tool_calls() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "llama3.2",
                "stream": false,
                "tools": [{"type": "function", "function": {"name": "add"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "created_at": "2024-07-22T20:33:28Z",
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "add", "arguments": {"x": 1, "y": 2}}}]
                },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let add = Tool::from_fn("add", |a: AddArgs| Ok::<_, ToolError>(a.x + a.y)).unwrap();
        let request = ChatRequest::new("llama3.2", vec![Message::user("what is 1 + 2?")]).with_tools(vec![add]);
        let response = client(&server, &keys).chat(request).await.unwrap();

        assert_eq!(response.resolved_tool_calls.len(), 1);
        let call = &response.resolved_tool_calls[0];
        assert_eq!(call.name(), "add");
        assert_eq!(call.invoke().await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn chat_with_unknown_tool_call_fails() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "m",
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "launch", "arguments": {}}}]
                },
                "done": true
            })))
            .mount(&server)
            .await;

        let err = client(&server, &keys)
            .chat(ChatRequest::new("m", vec![Message::user("go")]))
            .await
            .unwrap_err();
        assert!(matches!(err, OllamaError::Tool(ToolError::UnknownTool(name)) if name == "launch"));
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(path("/api/show"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model 'nope' not found"})))
            .mount(&server)
            .await;
        Mock::given(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let client = client(&server, &keys);

        match client.show(ShowRequest::new("nope")).await {
            Err(OllamaError::ClientRequest { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'nope' not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let err = client.generate(GenerateRequest::new("m", "hi")).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(matches!(err, OllamaError::Service { .. }));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_network() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let client = client(&server, &keys);

        let err = client.chat(ChatRequest::new("", vec![Message::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OllamaError::Validation(_)));
        let err = client.copy(CopyRequest::new("llama3.2", " ")).await.unwrap_err();
        assert!(matches!(err, OllamaError::Validation(_)));
        let err = client.create(CreateRequest::new("mine")).await.unwrap_err();
        assert!(matches!(err, OllamaError::Validation(_)));
    }

    #[tokio::test]
    async fn copy_and_delete_accept_empty_bodies() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/copy"))
            .and(body_partial_json(json!({"source": "llama3.2", "destination": "llama3-backup"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/delete"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client(&server, &keys);

        let copied = client.copy(CopyRequest::new("llama3.2", "llama3-backup")).await.unwrap();
        assert_eq!(copied, StatusResponse::success());
        let deleted = client.delete(DeleteRequest::new("llama3-backup")).await.unwrap();
        assert_eq!(deleted.status, "success");
    }

    #[tokio::test]
    async fn local_requests_are_not_signed() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/version"))
            .and(query_param_is_missing("ts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.6.2"})))
            .expect(1)
            .mount(&server)
            .await;

        let version = client(&server, &keys).version().await.unwrap();
        assert_eq!(version.version, "0.6.2");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
        assert!(!keys.path().join("id_ed25519").exists());
    }

    #[tokio::test]
    async fn pull_is_signed_and_streams_progress() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        let body = ndjson(&[
            json!({"status": "pulling manifest"}),
            json!({"status": "downloading", "digest": "sha256:abc", "total": 100, "completed": 50}),
            json!({"status": "success"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .and(header_exists("authorization"))
            .and(header("accept", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .expect(1)
            .mount(&server)
            .await;

        let progress: Vec<ProgressResponse> = client(&server, &keys)
            .pull_stream(PullRequest::new("llama3.2"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[1].completed, Some(50));
        assert!(progress[2].is_done());

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let ts = requests[0].url.query_pairs().find(|(k, _)| k == "ts").map(|(_, v)| v.into_owned());
        assert!(ts.unwrap().parse::<u64>().is_ok());
        assert!(keys.path().join("id_ed25519").exists());
    }

    #[tokio::test]
    async fn pull_fails_before_io_without_a_usable_key() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        std::fs::write(keys.path().join("id_ed25519"), "-----BEGIN NONSENSE-----").unwrap();
        Mock::given(path("/api/pull")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let err = client(&server, &keys).pull(PullRequest::new("llama3.2")).await.unwrap_err();
        assert!(matches!(err, OllamaError::SigningUnavailable(_)));
    }

    #[tokio::test]
    async fn sign_requests_signs_local_calls() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        Mock::given(path("/api/tags"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClientConfig::default()
            .host(Some(server.uri()))
            .sign_requests(Some(true))
            .key_store(Some(Arc::new(KeyStore::new(keys.path().join("id_ed25519")))))
            .build()
            .unwrap();
        assert!(client.list().await.unwrap().models.is_empty());
    }

    #[tokio::test]
    async fn generate_stream_surfaces_mid_stream_errors() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        let body = ndjson(&[
            json!({"model": "m", "response": "Once", "done": false}),
            json!({"model": "m", "response": " upon", "done": false}),
            json!({"error": "model runner has unexpectedly stopped"}),
        ]);
        Mock::given(path("/api/generate"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let items: Vec<Result<GenerateResponse, OllamaError>> = client(&server, &keys)
            .generate_stream(GenerateRequest::new("m", "tell me a story"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().response, "Once");
        assert_eq!(items[1].as_ref().unwrap().response, " upon");
        assert!(matches!(&items[2], Err(OllamaError::Service { status: None, .. })));
    }

    #[tokio::test]
    async fn chat_stream_yields_deltas_until_done() {
        let server = MockServer::start().await;
        let keys = tempfile::tempdir().unwrap();
        let body = ndjson(&[
            json!({"model": "m", "message": {"role": "assistant", "content": "Hel"}, "done": false}),
            json!({"model": "m", "message": {"role": "assistant", "content": "lo"}, "done": false}),
            json!({"model": "m", "message": {"role": "assistant", "content": ""}, "done": true, "eval_count": 2}),
        ]);
        Mock::given(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let chunks: Vec<ChatStreamChunk> = client(&server, &keys)
            .chat_stream(ChatRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let text: String = chunks.iter().filter_map(|c| c.message.as_ref()).map(|m| m.content.as_str()).collect();
        assert_eq!(text, "Hello");
        assert!(chunks.last().unwrap().done);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        let keys = tempfile::tempdir().unwrap();
        let client = ClientConfig::default()
            .host(Some("http://127.0.0.1:9"))
            .key_store(Some(Arc::new(KeyStore::new(keys.path().join("id_ed25519")))))
            .build()
            .unwrap();
        assert!(matches!(client.ps().await, Err(OllamaError::Connection(_))));
    }

    const FIRST_RECORD: &str = r#"{"model":"m","response":"a","done":false}"#;

    #[tokio::test]
    async fn dropping_a_stream_closes_the_connection() {
        let keys = tempfile::tempdir().unwrap();
        let (uri, server) = stalled_stream(FIRST_RECORD, Duration::from_secs(5)).await;
        let client = ClientConfig::default()
            .host(Some(uri))
            .key_store(Some(Arc::new(KeyStore::new(keys.path().join("id_ed25519")))))
            .build()
            .unwrap();

        let mut chunks = client.generate_stream(GenerateRequest::new("m", "go")).await.unwrap();
        assert_eq!(chunks.next().await.unwrap().unwrap().response, "a");
        drop(chunks);

        assert_eq!(server.await.unwrap(), Afterwards::Closed);
    }

    #[tokio::test]
    async fn timeout_while_streaming_ends_the_stream() {
        let keys = tempfile::tempdir().unwrap();
        let (uri, _server) = stalled_stream(FIRST_RECORD, Duration::from_secs(5)).await;
        let client = ClientConfig::default()
            .host(Some(uri))
            .timeout(Some(Duration::from_millis(500)))
            .key_store(Some(Arc::new(KeyStore::new(keys.path().join("id_ed25519")))))
            .build()
            .unwrap();

        let items: Vec<Result<GenerateResponse, OllamaError>> = client
            .generate_stream(GenerateRequest::new("m", "go"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().response, "a");
        match &items[1] {
            Err(OllamaError::Connection(message)) => assert!(message.starts_with("request timed out"), "{message}"),
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
