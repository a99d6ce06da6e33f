//! Ed25519 signing key set.
//!
//! The first key signs new tokens. Every key verifies and is published in the JWKS,
//! so tokens signed before a rotation keep validating until they expire.

use crate::crypto::sha256_b64url;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read signing key {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid signing key {path}: {message}")]
    InvalidKey { path: PathBuf, message: String },
    #[error("no signing keys configured and ephemeral keys are not allowed")]
    NoKeys,
    #[error("failed to generate ephemeral key: {0}")]
    Random(#[from] getrandom::Error),
    #[error("token has no known key id")]
    UnknownKey,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Public key in JWK form (RFC 8037 OKP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

struct KeyEntry {
    kid: String,
    x: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyEntry {
    fn from_signing_key(key: &SigningKey, origin: &Path) -> Result<Self, KeyError> {
        let invalid = |message: String| KeyError::InvalidKey {
            path: origin.to_path_buf(),
            message,
        };
        let der = key.to_pkcs8_der().map_err(|e| invalid(e.to_string()))?;
        let x = URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes());
        Ok(Self {
            kid: thumbprint(&x),
            encoding: EncodingKey::from_ed_der(der.as_bytes()),
            decoding: DecodingKey::from_ed_components(&x)?,
            x,
        })
    }
}

/// RFC 7638 thumbprint of an Ed25519 public key.
fn thumbprint(x: &str) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = format!(r#"{{"crv":"Ed25519","kty":"OKP","x":"{x}"}}"#);
    sha256_b64url(canonical.as_bytes())
}

/// Cheaply cloneable set of signing keys.
#[derive(Clone)]
pub struct KeySet {
    keys: Arc<Vec<KeyEntry>>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("kids", &self.kids())
            .finish()
    }
}

impl KeySet {
    /// Build a key set from signing keys. The first key is the active one.
    pub fn from_keys(keys: &[SigningKey]) -> Result<Self, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::NoKeys);
        }
        let entries = keys
            .iter()
            .map(|k| KeyEntry::from_signing_key(k, Path::new("<memory>")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            keys: Arc::new(entries),
        })
    }

    /// Load PKCS#8 PEM Ed25519 keys from disk, in order.
    pub fn from_pem_files(paths: &[PathBuf]) -> Result<Self, KeyError> {
        if paths.is_empty() {
            return Err(KeyError::NoKeys);
        }
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let pem = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
                path: path.clone(),
                source,
            })?;
            let key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| KeyError::InvalidKey {
                path: path.clone(),
                message: e.to_string(),
            })?;
            entries.push(KeyEntry::from_signing_key(&key, path)?);
        }
        tracing::info!(count = entries.len(), active = %entries[0].kid, "loaded signing keys");
        Ok(Self {
            keys: Arc::new(entries),
        })
    }

    /// Single random key that only lives as long as the process.
    pub fn ephemeral() -> Result<Self, KeyError> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed)?;
        let set = Self::from_keys(&[SigningKey::from_bytes(&seed)])?;
        tracing::warn!(
            kid = %set.active_kid(),
            "using an ephemeral signing key; issued tokens will not survive a restart"
        );
        Ok(set)
    }

    /// Key set as configured: key files if any, otherwise an ephemeral key when allowed.
    pub fn load(key_files: &[PathBuf], allow_ephemeral: bool) -> Result<Self, KeyError> {
        match (key_files.is_empty(), allow_ephemeral) {
            (false, _) => Self::from_pem_files(key_files),
            (true, true) => Self::ephemeral(),
            (true, false) => Err(KeyError::NoKeys),
        }
    }

    pub fn active_kid(&self) -> &str {
        &self.keys[0].kid
    }

    pub fn kids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }

    /// Sign claims with the active key.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let active = &self.keys[0];
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(active.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &active.encoding)?)
    }

    /// Verify a token against the key named in its header.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<TokenData<T>, KeyError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.ok_or(KeyError::UnknownKey)?;
        let entry = self
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .ok_or(KeyError::UnknownKey)?;
        Ok(jsonwebtoken::decode(token, &entry.decoding, validation)?)
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self
                .keys
                .iter()
                .map(|k| Jwk {
                    kty: "OKP".into(),
                    crv: "Ed25519".into(),
                    x: k.x.clone(),
                    kid: k.kid.clone(),
                    use_: "sig".into(),
                    alg: "EdDSA".into(),
                })
                .collect(),
        }
    }
}
