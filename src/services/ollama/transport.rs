//! Request preparation and dispatch shared by both clients.
//!
//! Everything that can fail locally (serialization, header validation, signing)
//! happens in [`Transport::prepare`], before a connection is opened.

use std::{collections::HashMap, sync::Arc};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    Method, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, instrument, trace, warn};

use crate::signing::{
    env_truthy, host_requires_signing, KeyStore, RequestSigner, SignedRequest, SigningError,
    OLLAMA_AUTH_ENV,
};

use super::{config::ClientConfig, models::OllamaError};

const NDJSON: &str = "application/x-ndjson";
const JSON: &str = "application/json";

/// One remote capability: fixes the method and path of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Chat,
    Generate,
    Embed,
    Embeddings,
    List,
    Show,
    Ps,
    Copy,
    Delete,
    Create,
    Pull,
    Push,
    Version,
}

impl Operation {
    pub fn method(self) -> Method {
        match self {
            Operation::List | Operation::Ps | Operation::Version => Method::GET,
            Operation::Delete => Method::DELETE,
            _ => Method::POST,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Operation::Chat => "/api/chat",
            Operation::Generate => "/api/generate",
            Operation::Embed => "/api/embed",
            Operation::Embeddings => "/api/embeddings",
            Operation::List => "/api/tags",
            Operation::Show => "/api/show",
            Operation::Ps => "/api/ps",
            Operation::Copy => "/api/copy",
            Operation::Delete => "/api/delete",
            Operation::Create => "/api/create",
            Operation::Pull => "/api/pull",
            Operation::Push => "/api/push",
            Operation::Version => "/api/version",
        }
    }

    /// Talks to a model registry through the service and therefore must be signed.
    pub fn is_registry(self) -> bool {
        matches!(self, Operation::Pull | Operation::Push)
    }
}

/// A request as built by a client method: immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub operation: Operation,
    pub body: Option<Vec<u8>>,
    pub stream: bool,
}

impl ApiRequest {
    /// Bodiless request.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            body: None,
            stream: false,
        }
    }

    pub fn json<T: Serialize>(operation: Operation, body: &T, stream: bool) -> Result<Self, OllamaError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| OllamaError::Validation(format!("request body does not serialize: {e}")))?;
        Ok(Self {
            operation,
            body: Some(body),
            stream,
        })
    }
}

/// A request with its URL, headers and signature resolved, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub operation: Operation,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub stream: bool,
}

/// What a successful dispatch hands back: the stream flag alone picks the variant.
#[derive(Debug)]
pub enum Dispatch<R> {
    Single(Vec<u8>),
    Stream(R),
}

/// Host, headers and signing policy; the HTTP client itself belongs to the caller.
#[derive(Debug)]
pub struct Transport {
    base_url: String,
    headers: HeaderMap,
    sign_all: bool,
    signer: Option<RequestSigner>,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, OllamaError> {
        let base_url = config.resolve_host()?;
        let parsed = Url::parse(&base_url).map_err(|e| OllamaError::Config(e.to_string()))?;

        let sign_all = config.sign_requests.unwrap_or(false)
            || host_requires_signing(&parsed)
            || env_truthy(OLLAMA_AUTH_ENV);

        // a missing home directory only matters once a request needs signing
        let signer = match &config.key_store {
            Some(store) => Some(RequestSigner::new(store.clone())),
            None => KeyStore::default_location().ok().map(|s| RequestSigner::new(Arc::new(s))),
        };

        debug!(%base_url, sign_all, "transport configured");
        Ok(Self {
            base_url,
            headers: default_headers(config.extra_headers.as_ref())?,
            sign_all,
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requires_signature(&self, operation: Operation) -> bool {
        self.sign_all || operation.is_registry()
    }

    /// Signs `operation` with a fresh timestamp. May read or create the key file.
    pub fn sign(&self, operation: Operation) -> Result<SignedRequest, OllamaError> {
        let signer = self.signer.as_ref().ok_or(SigningError::NoHomeDirectory)?;
        let signed = signer.sign_now(operation.method().as_str(), operation.path())?;
        Ok(signed)
    }

    /// Resolves URL and headers; `signed` must be present when the operation requires it.
    pub fn prepare(&self, request: ApiRequest, signed: Option<SignedRequest>) -> Result<PreparedRequest, OllamaError> {
        let operation = request.operation;
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(if request.stream { NDJSON } else { JSON }));
        if request.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }

        let path_and_query = match signed {
            Some(signed) => {
                let value = HeaderValue::from_str(&signed.authorization)
                    .map_err(|e| OllamaError::Config(format!("invalid authorization header: {e}")))?;
                headers.insert(AUTHORIZATION, value);
                signed.path_and_query
            }
            None if self.requires_signature(operation) => {
                return Err(SigningError::Missing(operation.path().to_owned()).into());
            }
            None => operation.path().to_owned(),
        };

        Ok(PreparedRequest {
            operation,
            method: operation.method(),
            url: format!("{}{}", self.base_url, path_and_query),
            headers,
            body: request.body,
            stream: request.stream,
        })
    }

    /// Signs when required, then prepares. Key loading blocks.
    pub fn prepare_blocking(&self, request: ApiRequest) -> Result<PreparedRequest, OllamaError> {
        let signed = if self.requires_signature(request.operation) {
            Some(self.sign(request.operation)?)
        } else {
            None
        };
        self.prepare(request, signed)
    }

    #[instrument(name = "ollama.send", skip_all, fields(method = %prepared.method, path = prepared.operation.path()))]
    pub async fn send(
        &self,
        client: &reqwest::Client,
        prepared: PreparedRequest,
    ) -> Result<Dispatch<reqwest::Response>, OllamaError> {
        let mut builder = client
            .request(prepared.method, &prepared.url)
            .headers(prepared.headers);
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(%status, "received response");

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("failed to read error body: {e}"));
            error!(%status, body = %body, "request failed");
            return Err(OllamaError::from_status(status.as_u16(), &body));
        }

        check_framing(prepared.stream, response.headers());
        if prepared.stream {
            return Ok(Dispatch::Stream(response));
        }
        let body = response.bytes().await?;
        trace!(len = body.len(), "read response body");
        Ok(Dispatch::Single(body.to_vec()))
    }

    #[instrument(name = "ollama.send_blocking", skip_all, fields(method = %prepared.method, path = prepared.operation.path()))]
    pub fn send_blocking(
        &self,
        client: &reqwest::blocking::Client,
        prepared: PreparedRequest,
    ) -> Result<Dispatch<reqwest::blocking::Response>, OllamaError> {
        let mut builder = client
            .request(prepared.method, &prepared.url)
            .headers(prepared.headers);
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status();
        debug!(%status, "received response");

        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|e| format!("failed to read error body: {e}"));
            error!(%status, body = %body, "request failed");
            return Err(OllamaError::from_status(status.as_u16(), &body));
        }

        check_framing(prepared.stream, response.headers());
        if prepared.stream {
            return Ok(Dispatch::Stream(response));
        }
        let body = response.bytes()?;
        trace!(len = body.len(), "read response body");
        Ok(Dispatch::Single(body.to_vec()))
    }
}

/// Decodes a buffered response body; a shape mismatch is a `Validation` error.
pub fn decode_body<R: DeserializeOwned>(body: &[u8]) -> Result<R, OllamaError> {
    serde_json::from_slice(body).map_err(|e| {
        let raw = String::from_utf8_lossy(body);
        error!(%e, raw = %raw, "deserialization error");
        OllamaError::Validation(format!("error decoding response body: {e}. Raw JSON was: '{raw}'"))
    })
}

fn default_headers(extra: Option<&HashMap<String, String>>) -> Result<HeaderMap, OllamaError> {
    let mut headers = HeaderMap::new();
    let agent = format!(
        "ollama-kit/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS
    );
    let agent = HeaderValue::from_str(&agent).map_err(|e| OllamaError::Config(e.to_string()))?;
    headers.insert(USER_AGENT, agent);

    for (name, value) in extra.into_iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| OllamaError::Config(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| OllamaError::Config(format!("invalid value for header `{name}`: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn check_framing(stream: bool, headers: &HeaderMap) {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let ndjson = content_type.starts_with(NDJSON);
    if stream != ndjson {
        warn!(stream, %content_type, "response framing does not match the stream flag");
    }
}
