//! Public-key request signing for registry-directed calls.

use std::{io, path::PathBuf};

use thiserror::Error;

mod keypair;
mod signer;

pub use keypair::{default_key_path, KeyStore, SigningKeypair};
pub use signer::{
    env_truthy, host_requires_signing, is_truthy, sign_with, RequestSigner, SignedRequest,
    OLLAMA_AUTH_ENV, SIGNED_HOST,
};
#[cfg(test)]
pub(crate) use signer::unix_now;

/// Why a request that needed a signature could not get one.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("no home directory to hold the signing key")]
    NoHomeDirectory,
    #[error("key file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("signing key is encrypted")]
    EncryptedKey,
    #[error("unsupported key algorithm `{0}`, only ssh-ed25519 is supported")]
    UnsupportedAlgorithm(String),
    #[error("key store lock poisoned")]
    Poisoned,
    #[error("key loading task failed: {0}")]
    Task(String),
    #[error("{0} must be signed")]
    Missing(String),
}
