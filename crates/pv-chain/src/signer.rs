// signer.rs — Ed25519 record signing.
//
// One keypair per machine, shared by every session. The private key is stored
// as base64-encoded PKCS#8 in a local file and generated on first use. Records
// carry a detached signature over their `record_hash`; the public key travels
// in proof bundles so third parties can check signatures offline.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

use crate::error::ChainError;

/// Signature algorithm identifier published in proof bundles.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// A machine-local Ed25519 signing key.
pub struct RecordSigner {
    keypair: Ed25519KeyPair,
    public_key: String,
}

impl std::fmt::Debug for RecordSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl RecordSigner {
    /// Generate a fresh in-memory keypair.
    pub fn generate() -> Result<Self, ChainError> {
        let pkcs8 = generate_pkcs8(Path::new("<memory>"))?;
        Self::from_pkcs8(&pkcs8, Path::new("<memory>"))
    }

    /// Load the key at `path`, creating it (mode 0600 on unix) if absent.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if path.exists() {
            let encoded = fs::read_to_string(path).map_err(|e| key_error(path, e))?;
            let pkcs8 = STANDARD
                .decode(encoded.trim())
                .map_err(|e| key_error(path, e))?;
            return Self::from_pkcs8(&pkcs8, path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| key_error(path, e))?;
        }
        let pkcs8 = generate_pkcs8(path)?;
        fs::write(path, STANDARD.encode(&pkcs8)).map_err(|e| key_error(path, e))?;
        restrict_permissions(path)?;
        tracing::info!(path = %path.display(), "generated new record signing key");
        Self::from_pkcs8(&pkcs8, path)
    }

    fn from_pkcs8(pkcs8: &[u8], path: &Path) -> Result<Self, ChainError> {
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|e| key_error(path, e))?;
        let public_key = STANDARD.encode(keypair.public_key().as_ref());
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// Sign a record hash, returning a base64 signature.
    pub fn sign(&self, record_hash: &str) -> String {
        STANDARD.encode(self.keypair.sign(record_hash.as_bytes()).as_ref())
    }

    /// Base64-encoded raw public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

/// Check a base64 signature over `record_hash` against a base64 public key.
///
/// Malformed encodings are treated as invalid signatures, not errors.
pub fn verify_signature(public_key: &str, record_hash: &str, signature: &str) -> bool {
    let (Ok(key), Ok(sig)) = (STANDARD.decode(public_key), STANDARD.decode(signature)) else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, key)
        .verify(record_hash.as_bytes(), &sig)
        .is_ok()
}

fn generate_pkcs8(path: &Path) -> Result<Vec<u8>, ChainError> {
    let rng = SystemRandom::new();
    Ed25519KeyPair::generate_pkcs8(&rng)
        .map(|doc| doc.as_ref().to_vec())
        .map_err(|e| key_error(path, e))
}

fn key_error(path: &Path, reason: impl std::fmt::Display) -> ChainError {
    ChainError::SigningKey {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ChainError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| key_error(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ChainError> {
    Ok(())
}
