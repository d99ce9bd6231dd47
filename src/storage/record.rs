//! Key record metadata.
//!
//! This module provides the structure stored in the registry for every
//! generated identity, and its on-disk field layout.

use crate::storage::keystore::public_key_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Metadata for one generated key pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRecord {
    /// The alias naming this identity, stored as its key file name.
    #[serde(rename = "key_name", with = "key_name")]
    pub alias: String,

    /// The comment embedded in the key.
    pub email: String,

    /// Remote host name or address.
    #[serde(rename = "hostname")]
    pub host: String,

    /// Private key path inside the key store.
    #[serde(rename = "path")]
    pub key_file_path: PathBuf,

    /// When the key was created.
    #[serde(rename = "timestamp", with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        alias: impl Into<String>,
        email: impl Into<String>,
        host: impl Into<String>,
        key_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            alias: alias.into(),
            email: email.into(),
            host: host.into(),
            key_file_path: key_file_path.into(),
            created_at: Utc::now(),
        }
    }

    /// Replace the creation time, for records rebuilt from existing files.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Path of the public half of the key pair.
    pub fn public_key_path(&self) -> PathBuf {
        public_key_path(&self.key_file_path)
    }

    pub fn private_key_path(&self) -> &Path {
        &self.key_file_path
    }
}

/// `key_name` holds `id_ed25519.<alias>`; older documents may hold a bare alias.
mod key_name {
    use crate::storage::keystore::{key_file_name, KEY_FILE_PREFIX};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(alias: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key_file_name(alias))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(match name.strip_prefix(KEY_FILE_PREFIX) {
            Some(alias) => alias.to_string(),
            None => name,
        })
    }
}

/// RFC 3339 on write. Naive ISO-8601 timestamps from older documents read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, NAIVE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }
}
