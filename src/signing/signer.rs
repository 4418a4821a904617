use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Url;
use tracing::trace;

use super::{KeyStore, SigningError, SigningKeypair};

/// Environment variable that forces signing of every request when truthy.
pub const OLLAMA_AUTH_ENV: &str = "OLLAMA_AUTH";

/// Host whose API requires every request to be signed.
pub const SIGNED_HOST: &str = "ollama.com";

/// `1`, `true`, `yes` and `on`, in any case.
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub fn env_truthy(name: &str) -> bool {
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

pub fn host_requires_signing(base_url: &Url) -> bool {
    base_url
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(SIGNED_HOST))
}

/// A path carrying its freshness token plus the matching `authorization` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub path_and_query: String,
    pub authorization: String,
}

/// Signs outgoing requests with the key held by a [`KeyStore`].
///
/// The freshness token is the current unix time in seconds, sent as the `ts`
/// query parameter and covered by the signature, so a captured header is only
/// valid for that path and second.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    keys: Arc<KeyStore>,
}

impl RequestSigner {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Signs `method` + `path` at `timestamp`, loading or creating the key on first use.
    pub fn sign(&self, method: &str, path: &str, timestamp: u64) -> Result<SignedRequest, SigningError> {
        let keypair = self.keys.ensure_keypair()?;
        Ok(sign_with(&keypair, method, path, timestamp))
    }

    pub fn sign_now(&self, method: &str, path: &str) -> Result<SignedRequest, SigningError> {
        self.sign(method, path, unix_now())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Builds `<METHOD>,<path>?<query with ts>` and signs it.
///
/// Any `ts` already in the query is replaced. The token is
/// `base64(public key blob):base64(signature blob)`.
pub fn sign_with(keypair: &SigningKeypair, method: &str, path: &str, timestamp: u64) -> SignedRequest {
    let (path_only, query) = path.split_once('?').unwrap_or((path, ""));

    let mut pairs: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty() && *p != "ts" && !p.starts_with("ts="))
        .collect();
    let ts = format!("ts={timestamp}");
    pairs.push(&ts);

    let path_and_query = format!("{path_only}?{}", pairs.join("&"));
    let challenge = format!("{},{path_and_query}", method.to_ascii_uppercase());
    trace!(%challenge, "signing challenge");

    let authorization = format!(
        "{}:{}",
        STANDARD.encode(keypair.public_key_blob()),
        STANDARD.encode(keypair.signature_blob(challenge.as_bytes()))
    );

    SignedRequest {
        path_and_query,
        authorization,
    }
}
