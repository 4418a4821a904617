use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process,
    sync::{Arc, RwLock},
};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use ssh_key::{private::Ed25519Keypair, LineEnding, PrivateKey};
use tracing::{debug, info, instrument, warn};

use super::SigningError;

const KEY_ALGORITHM: &str = "ssh-ed25519";

/// `~/.ollama/id_ed25519`, the key the Ollama server and CLI share.
pub fn default_key_path() -> Result<PathBuf, SigningError> {
    dirs::home_dir()
        .map(|home| home.join(".ollama").join("id_ed25519"))
        .ok_or(SigningError::NoHomeDirectory)
}

/// An ed25519 keypair in the form the registry expects.
pub struct SigningKeypair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public_key", &self.authorized_key())
            .finish_non_exhaustive()
    }
}

impl SigningKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Parses an unencrypted OpenSSH ed25519 private key.
    pub fn from_openssh(pem: impl AsRef<[u8]>) -> Result<Self, SigningError> {
        let key = PrivateKey::from_openssh(pem).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        if key.is_encrypted() {
            return Err(SigningError::EncryptedKey);
        }
        let keypair = key
            .key_data()
            .ed25519()
            .ok_or_else(|| SigningError::UnsupportedAlgorithm(key.algorithm().to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&keypair.private.to_bytes()),
        })
    }

    pub fn to_openssh(&self) -> Result<String, SigningError> {
        let keypair = Ed25519Keypair::from_seed(&self.signing_key.to_bytes());
        let pem = PrivateKey::from(keypair)
            .to_openssh(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// SSH wire encoding of the public key: `string "ssh-ed25519" || string key`.
    pub fn public_key_blob(&self) -> Vec<u8> {
        let mut blob = pack_ssh_string(KEY_ALGORITHM.as_bytes());
        blob.extend(pack_ssh_string(self.verifying_key().as_bytes()));
        blob
    }

    /// `ssh-ed25519 <base64 blob>`, as written to `id_ed25519.pub`.
    pub fn authorized_key(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        format!("{KEY_ALGORITHM} {}", STANDARD.encode(self.public_key_blob()))
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// SSH wire encoding of a signature: `string "ssh-ed25519" || string sig`.
    pub fn signature_blob(&self, message: &[u8]) -> Vec<u8> {
        let mut blob = pack_ssh_string(KEY_ALGORITHM.as_bytes());
        blob.extend(pack_ssh_string(&self.sign(message).to_bytes()));
        blob
    }
}

/// 4-byte big-endian length followed by the bytes.
pub(crate) fn pack_ssh_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Owns the persisted keypair at one path and hands out a single shared copy.
///
/// The first caller loads the key, or generates and persists it when the file is
/// missing; concurrent first callers wait for that and then share the result.
/// Later calls only take the read lock.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    keypair: RwLock<Option<Arc<SigningKeypair>>>,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keypair: RwLock::new(None),
        }
    }

    /// Store at [`default_key_path`].
    pub fn default_location() -> Result<Self, SigningError> {
        Ok(Self::new(default_key_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn public_key_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".pub");
        self.path.with_file_name(name)
    }

    #[instrument(name = "keystore.ensure", skip_all, fields(path = %self.path.display()))]
    pub fn ensure_keypair(&self) -> Result<Arc<SigningKeypair>, SigningError> {
        if let Some(keypair) = self.keypair.read().map_err(|_| SigningError::Poisoned)?.as_ref() {
            return Ok(keypair.clone());
        }

        let mut slot = self.keypair.write().map_err(|_| SigningError::Poisoned)?;
        if let Some(keypair) = slot.as_ref() {
            return Ok(keypair.clone());
        }

        let keypair = Arc::new(self.load_or_create()?);
        *slot = Some(keypair.clone());
        Ok(keypair)
    }

    fn load_or_create(&self) -> Result<SigningKeypair, SigningError> {
        match fs::read(&self.path) {
            Ok(pem) => {
                debug!("loaded signing key");
                return SigningKeypair::from_openssh(pem);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }

        let keypair = SigningKeypair::generate();
        if self.persist(&keypair)? {
            info!(public_key = %keypair.authorized_key(), "generated new signing key");
            Ok(keypair)
        } else {
            // another process won the race; use its key
            let pem = fs::read(&self.path).map_err(|e| self.io_error(e))?;
            SigningKeypair::from_openssh(pem)
        }
    }

    /// Writes the key to a private temporary sibling and links it into place.
    ///
    /// Returns `false` when a key file appeared in the meantime; the link never
    /// replaces an existing file.
    fn persist(&self, keypair: &SigningKeypair) -> Result<bool, SigningError> {
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir).map_err(|e| self.io_error(e))?;
        }

        let pem = keypair.to_openssh()?;
        let tmp = self
            .path
            .with_extension(format!("tmp-{}-{:016x}", process::id(), OsRng.next_u64()));
        write_private_file(&tmp, pem.as_bytes()).map_err(|e| self.io_error(e))?;

        let linked = fs::hard_link(&tmp, &self.path);
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(tmp = %tmp.display(), error = %e, "failed to remove temporary key file");
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(self.io_error(e)),
        }

        let public = format!("{}\n", keypair.authorized_key());
        fs::write(self.public_key_path(), public).map_err(|e| self.io_error(e))?;
        Ok(true)
    }

    fn io_error(&self, source: io::Error) -> SigningError {
        SigningError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
