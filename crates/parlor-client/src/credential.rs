//! Process-wide credential state.
//!
//! Written only by the login/logout flow, read by the transport router on
//! every request and by the subscription manager at connect time. Stores are
//! injected as `Arc<dyn CredentialStore>` so tests can substitute a fake.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use jsonwebtoken::{DecodingKey, Validation, decode};
use parking_lot::RwLock;
use tracing::{debug, info};

use parlor_types::api::Claims;

use crate::error::CredentialError;

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Best-effort, unverified read of the token's claims. `None` for opaque
    /// (non-JWT) tokens.
    pub fn claims(&self) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(&self.token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// True only for JWTs whose `exp` is at or before `now` (unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.claims()
            .and_then(|claims| claims.exp)
            .is_some_and(|exp| exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.is_expired_at(now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Accessor for the current credential. Two states only: absent or present.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;

    /// Replace the credential. The in-process value always changes; an error
    /// means only that persisting it failed.
    fn set(&self, credential: Credential) -> Result<(), CredentialError>;

    /// Drop the credential. Same error semantics as `set`.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// In-memory store; nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    fn set(&self, credential: Credential) -> Result<(), CredentialError> {
        *self.current.write() = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.current.write() = None;
        Ok(())
    }
}

/// Store backed by a single file holding the raw token, so a login survives
/// restarts. The file is the only client state kept across sessions.
pub struct FileCredentialStore {
    path: PathBuf,
    current: RwLock<Option<Credential>>,
}

impl FileCredentialStore {
    /// Open the store, loading a previously persisted token if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| Credential::new(token))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(source) => return Err(CredentialError::Persist { path, source }),
        };

        if current.is_some() {
            info!("Loaded stored credential from {}", path.display());
        }

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, token: &str) -> Result<(), CredentialError> {
        let to_err = |source| CredentialError::Persist {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&self.path, token).map_err(to_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(to_err)?;
        }

        debug!("Credential written to {}", self.path.display());
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    fn set(&self, credential: Credential) -> Result<(), CredentialError> {
        let token = credential.token().to_string();
        *self.current.write() = Some(credential);
        self.persist(&token)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.current.write() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Persist {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
