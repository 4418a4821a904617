use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::Url;

use crate::signing::KeyStore;

use super::{blocking::BlockingOllamaClient, client::OllamaClient, models::OllamaError};

/// Environment variable naming the service host.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

const DEFAULT_PORT: u16 = 11434;

/// Settings shared by [`OllamaClient`] and [`BlockingOllamaClient`].
///
/// Unset fields fall back to the environment (`OLLAMA_HOST`, `OLLAMA_AUTH`) and
/// then to the defaults: local host, no timeout, signing only where required.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub host: Option<String>,
    /// Applied to each call as a whole, streamed bodies included.
    pub timeout: Option<Duration>,
    pub extra_headers: Option<HashMap<String, String>>,
    /// Sign every request, not only registry-directed ones.
    pub sign_requests: Option<bool>,
    /// Where the signing key lives; `~/.ollama/id_ed25519` when unset.
    pub key_store: Option<Arc<KeyStore>>,
}

pub trait ClientBuilder {
    fn host(self, host: Option<impl Into<String>>) -> Self;
    fn timeout(self, timeout: Option<Duration>) -> Self;
    fn extra_headers(self, extra_headers: Option<HashMap<String, String>>) -> Self;
    fn sign_requests(self, sign_requests: Option<bool>) -> Self;
    fn key_store(self, key_store: Option<Arc<KeyStore>>) -> Self;
    fn build(self) -> Result<OllamaClient, OllamaError>;
    fn build_blocking(self) -> Result<BlockingOllamaClient, OllamaError>;
}

impl ClientBuilder for ClientConfig {
    fn host(mut self, host: Option<impl Into<String>>) -> Self {
        self.host = host.map(|h| h.into());
        self
    }

    fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn extra_headers(mut self, extra_headers: Option<HashMap<String, String>>) -> Self {
        self.extra_headers = extra_headers;
        self
    }

    fn sign_requests(mut self, sign_requests: Option<bool>) -> Self {
        self.sign_requests = sign_requests;
        self
    }

    fn key_store(mut self, key_store: Option<Arc<KeyStore>>) -> Self {
        self.key_store = key_store;
        self
    }

    fn build(self) -> Result<OllamaClient, OllamaError> {
        OllamaClient::try_from(self)
    }

    /// Must not be called from inside an async runtime; see [`BlockingOllamaClient`].
    fn build_blocking(self) -> Result<BlockingOllamaClient, OllamaError> {
        BlockingOllamaClient::try_from(self)
    }
}

impl ClientConfig {
    /// The configured host, else `OLLAMA_HOST`, else [`DEFAULT_HOST`], normalized.
    pub fn resolve_host(&self) -> Result<String, OllamaError> {
        match &self.host {
            Some(host) => parse_host(host),
            None => parse_host(&std::env::var(OLLAMA_HOST_ENV).unwrap_or_default()),
        }
    }
}

/// Normalizes a host string into `scheme://host:port[/path]`.
///
/// Accepts `host`, `host:port` and `scheme://host[:port][/path]`. A missing scheme
/// means `http`; a missing port is 11434 without a scheme, otherwise the scheme's
/// default. An empty string yields [`DEFAULT_HOST`].
pub fn parse_host(raw: &str) -> Result<String, OllamaError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(DEFAULT_HOST.to_owned());
    }

    let (scheme, rest, explicit_scheme) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest, true),
        None => ("http".to_owned(), raw, false),
    };
    if scheme != "http" && scheme != "https" {
        return Err(OllamaError::Config(format!("unsupported scheme `{scheme}` in host `{raw}`")));
    }

    let url = Url::parse(&format!("{scheme}://{rest}"))
        .map_err(|e| OllamaError::Config(format!("invalid host `{raw}`: {e}")))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| OllamaError::Config(format!("invalid host `{raw}`: no host name")))?;

    let port = match url.port() {
        Some(port) => port,
        None if !explicit_scheme && !has_explicit_port(rest) => DEFAULT_PORT,
        None => url.port_or_known_default().unwrap_or(DEFAULT_PORT),
    };
    let path = url.path().trim_end_matches('/');

    Ok(format!("{scheme}://{host}:{port}{path}"))
}

/// `Url` drops a port equal to the scheme default, so `host:80` must be detected by hand.
fn has_explicit_port(rest: &str) -> bool {
    let authority = rest.split('/').next().unwrap_or_default();
    let after_host = match authority.rfind(']') {
        Some(end) => &authority[end + 1..],
        None => authority,
    };
    after_host.contains(':')
}
