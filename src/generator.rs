//! Identity creation and the operations a front end drives.
//!
//! [`KeyGenerator`] owns one key store together with its registry and
//! connection config. All operations go through a single lock, so the
//! multi-step creation protocol never interleaves with another writer.
//!
//! Creating an identity walks through [`Stage`]s in order. A failure stops the
//! walk and leaves whatever the earlier stages wrote:
//!
//! | failing stage        | on disk afterwards                    | error                               |
//! |----------------------|---------------------------------------|-------------------------------------|
//! | `Validating`         | nothing new                           | `Validation`, `DuplicateAlias`      |
//! | `GeneratingKey`      | nothing new (maybe a partial key)     | `KeyAlreadyExists`, `KeyGeneration*`|
//! | `PersistingConfig`   | key pair                              | `ConfigWrite`                       |
//! | `PersistingRegistry` | key pair, config block                | `RegistryWrite`                     |

use crate::config::Settings;
use crate::error::{Field, Result, SshIdError, ValidationErrors};
use crate::keygen::{public_key_comment, KeyGenRequest, KeyPairGenerator, SshKeygen};
use crate::storage::keystore::{public_key_path, validate_alias, KeyStore};
use crate::storage::record::KeyRecord;
use crate::storage::registry::Registry;
use crate::storage::ssh_config::{ConnectionConfig, DEFAULT_USER};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Steps of [`KeyGenerator::create_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    GeneratingKey,
    PersistingConfig,
    PersistingRegistry,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::GeneratingKey => "generating key",
            Stage::PersistingConfig => "persisting config",
            Stage::PersistingRegistry => "persisting registry",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage, alias: &str) {
    tracing::debug!(alias = %alias, stage = %stage, "create identity");
}

/// The three persisted resources guarded together.
#[derive(Debug)]
struct StoreFiles {
    keystore: KeyStore,
    registry: Registry,
    ssh_config: ConnectionConfig,
}

/// Trimmed, checked input of one identity creation.
#[derive(Debug)]
struct IdentityRequest {
    email: String,
    alias: String,
    host: String,
}

fn validate_request(email: &str, alias: &str, host: &str) -> Result<IdentityRequest> {
    let request = IdentityRequest {
        email: email.trim().to_string(),
        alias: alias.trim().to_string(),
        host: host.trim().to_string(),
    };
    let mut errors = ValidationErrors::default();

    if request.email.is_empty() {
        errors.push(Field::Email, "must not be empty");
    } else if request.email.chars().any(char::is_control) {
        errors.push(Field::Email, "must not contain control characters");
    }

    if request.alias.is_empty() {
        errors.push(Field::Alias, "must not be empty");
    } else if let Err(SshIdError::InvalidAlias { reason, .. }) = validate_alias(&request.alias) {
        errors.push(Field::Alias, reason);
    }

    if request.host.is_empty() {
        errors.push(Field::Host, "must not be empty");
    } else if request
        .host
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        errors.push(Field::Host, "must be a single token without whitespace");
    }

    if errors.is_empty() {
        Ok(request)
    } else {
        Err(SshIdError::Validation(errors))
    }
}

/// Creates identities and serves the read and export operations of one store.
///
/// Clones share the same lock and store.
#[derive(Clone)]
pub struct KeyGenerator {
    files: Arc<Mutex<StoreFiles>>,
    keygen: Arc<dyn KeyPairGenerator>,
    keygen_timeout: Duration,
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator")
            .field("keygen_timeout", &self.keygen_timeout)
            .finish_non_exhaustive()
    }
}

impl KeyGenerator {
    /// Generator for the store in `settings`, running the configured `ssh-keygen`.
    pub fn new(settings: &Settings) -> Self {
        Self::with_generator(settings, SshKeygen::new(settings.keygen_program.clone()))
    }

    /// Generator for the store in `settings` with a custom key-pair generator.
    pub fn with_generator(settings: &Settings, keygen: impl KeyPairGenerator + 'static) -> Self {
        let dir = settings.store_dir.as_path();
        Self::from_parts(
            KeyStore::new(dir),
            Registry::in_dir(dir),
            ConnectionConfig::in_dir(dir),
            Arc::new(keygen),
            settings.keygen_timeout,
        )
    }

    /// Generator over explicitly placed resources.
    pub fn from_parts(
        keystore: KeyStore,
        registry: Registry,
        ssh_config: ConnectionConfig,
        keygen: Arc<dyn KeyPairGenerator>,
        keygen_timeout: Duration,
    ) -> Self {
        Self {
            files: Arc::new(Mutex::new(StoreFiles {
                keystore,
                registry,
                ssh_config,
            })),
            keygen,
            keygen_timeout,
        }
    }

    /// Generate a key pair for `alias` and register it.
    ///
    /// Inputs are trimmed. On success the key pair, the connection config block
    /// and the registry record all exist. See the module docs for what each
    /// failure leaves behind.
    pub async fn create_identity(&self, email: &str, alias: &str, host: &str) -> Result<KeyRecord> {
        let files = self.files.lock().await;

        enter(Stage::Validating, alias.trim());
        let request = validate_request(email, alias, host)?;
        let key_file_path = files.keystore.path_for(&request.alias)?;
        if files.registry.find_by_alias(&request.alias)?.is_some() {
            return Err(SshIdError::DuplicateAlias(request.alias));
        }

        enter(Stage::GeneratingKey, &request.alias);
        let public_path = public_key_path(&key_file_path);
        for path in [&key_file_path, &public_path] {
            if path.exists() {
                return Err(SshIdError::KeyAlreadyExists { path: path.clone() });
            }
        }
        files.keystore.ensure_exists()?;
        self.generate_key_pair(&key_file_path, &request.email).await?;

        enter(Stage::PersistingConfig, &request.alias);
        files
            .ssh_config
            .upsert(&request.alias, &request.host, DEFAULT_USER, &key_file_path)?;

        enter(Stage::PersistingRegistry, &request.alias);
        let record = KeyRecord::new(
            request.alias.clone(),
            request.email,
            request.host,
            key_file_path,
        );
        files.registry.append(record.clone())?;

        enter(Stage::Done, &record.alias);
        tracing::info!(
            alias = %record.alias,
            host = %record.host,
            key = %record.key_file_path.display(),
            "created identity"
        );
        Ok(record)
    }

    async fn generate_key_pair(&self, key_file_path: &Path, email: &str) -> Result<()> {
        let request = KeyGenRequest {
            key_file_path: key_file_path.to_path_buf(),
            comment: email.to_string(),
        };

        match tokio::time::timeout(self.keygen_timeout, self.keygen.generate(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(key = %key_file_path.display(), timeout = ?self.keygen_timeout, "key generation timed out");
                return Err(SshIdError::KeyGenerationTimeout {
                    path: key_file_path.to_path_buf(),
                    timeout: self.keygen_timeout,
                });
            }
        }

        let public_path = public_key_path(key_file_path);
        for path in [key_file_path, public_path.as_path()] {
            if !path.is_file() {
                return Err(SshIdError::KeyGenerationFailed {
                    path: key_file_path.to_path_buf(),
                    reason: format!("generator finished but {} is missing", path.display()),
                });
            }
        }

        Ok(())
    }

    /// Rewrite the connection config block for an alias whose key pair exists.
    ///
    /// This retries only the config step after a [`SshIdError::ConfigWrite`].
    pub async fn retry_config(&self, alias: &str, host: &str) -> Result<()> {
        let files = self.files.lock().await;
        let alias = alias.trim();
        let host = host.trim();

        let key_file_path = files.keystore.path_for(alias)?;
        if !key_file_path.is_file() {
            return Err(SshIdError::NotFound(format!(
                "no key pair for alias '{}' at {}",
                alias,
                key_file_path.display()
            )));
        }
        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
            let mut errors = ValidationErrors::default();
            errors.push(Field::Host, "must be a single non-empty token");
            return Err(SshIdError::Validation(errors));
        }

        files
            .ssh_config
            .upsert(alias, host, DEFAULT_USER, &key_file_path)
    }

    /// Rebuild the missing registry record of an alias that has a key pair and
    /// a config block.
    ///
    /// This is the recovery path after a [`SshIdError::RegistryWrite`]. The
    /// email comes from the public key comment and the creation time from the
    /// public key's modification time.
    pub async fn repair_registry(&self, alias: &str) -> Result<KeyRecord> {
        let files = self.files.lock().await;
        let alias = alias.trim();
        let default_key_path = files.keystore.path_for(alias)?;

        if files.registry.find_by_alias(alias)?.is_some() {
            return Err(SshIdError::DuplicateAlias(alias.to_string()));
        }

        let entry = files.ssh_config.find(alias)?.ok_or_else(|| {
            SshIdError::NotFound(format!("no connection config block for alias '{}'", alias))
        })?;
        if entry.hostname.is_empty() {
            return Err(SshIdError::NotFound(format!(
                "connection config block for '{}' has no HostName",
                alias
            )));
        }

        let key_file_path = if entry.identity_file.as_os_str().is_empty() {
            default_key_path
        } else {
            entry.identity_file
        };
        if !key_file_path.is_file() {
            return Err(SshIdError::NotFound(format!(
                "private key {} is missing",
                key_file_path.display()
            )));
        }

        let public_path = public_key_path(&key_file_path);
        let public_key = fs::read_to_string(&public_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                SshIdError::NotFound(format!("public key {} is missing", public_path.display()))
            }
            _ => SshIdError::Storage(e),
        })?;
        let email = match public_key_comment(&public_key) {
            Some(comment) => comment.to_string(),
            None => {
                tracing::warn!(alias = %alias, "public key has no comment; registering without email");
                String::new()
            }
        };
        let created_at = fs::metadata(&public_path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let record = KeyRecord::new(alias, email, entry.hostname, key_file_path)
            .with_created_at(created_at);
        files.registry.append(record.clone())?;

        tracing::info!(alias = %alias, "repaired registry record");
        Ok(record)
    }

    /// The connection config document, or `None` if there is none yet.
    pub async fn show_config(&self) -> Result<Option<String>> {
        let files = self.files.lock().await;
        files.ssh_config.read()
    }

    /// The registry document, or `None` if there is none yet.
    pub async fn show_registry(&self) -> Result<Option<String>> {
        let files = self.files.lock().await;
        files.registry.read_raw()
    }

    /// Every registered identity, oldest first.
    pub async fn list_identities(&self) -> Result<Vec<KeyRecord>> {
        let files = self.files.lock().await;
        files.registry.load()
    }

    /// Copy the whole store to `destination_dir/keys`, replacing an earlier copy.
    pub async fn export_store(&self, destination_dir: &Path) -> Result<PathBuf> {
        let files = self.files.lock().await;
        files.keystore.export(destination_dir)
    }
}
