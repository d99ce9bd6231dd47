//! Durable registry of generated identities.
//!
//! The registry is a JSON array of [`KeyRecord`] kept in insertion order.
//! Every mutation loads the whole document, changes it in memory and replaces
//! the file atomically.

use crate::error::{Result, SshIdError};
use crate::storage::atomic::write_atomic_with;
use crate::storage::record::KeyRecord;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Registry file name inside the key store directory.
pub const REGISTRY_FILENAME: &str = "keys.json";

/// Handle to the registry document.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// Registry stored in `directory`.
    pub fn in_dir(directory: &Path) -> Self {
        Self::at(directory.join(REGISTRY_FILENAME))
    }

    /// Registry stored at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record.
    ///
    /// A missing document is an empty registry. A document that exists but
    /// does not parse is reported as [`SshIdError::CorruptRegistry`].
    pub fn load(&self) -> Result<Vec<KeyRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SshIdError::Storage(e)),
        };

        serde_json::from_str(&contents).map_err(|source| SshIdError::CorruptRegistry {
            path: self.path.clone(),
            source,
        })
    }

    /// Add `record` at the end of the registry.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sshid::storage::record::KeyRecord;
    /// use sshid::storage::registry::Registry;
    /// use std::path::Path;
    ///
    /// # fn example() -> sshid::error::Result<()> {
    /// let registry = Registry::in_dir(Path::new("keys"));
    /// registry.append(KeyRecord::new("origin", "a@x.com", "git.example.com", "keys/id_ed25519.origin"))?;
    /// assert!(registry.find_by_alias("origin")?.is_some());
    /// # Ok(())
    /// # }
    /// ```
    pub fn append(&self, record: KeyRecord) -> Result<()> {
        let mut records = self.load()?;

        if records.iter().any(|r| r.alias == record.alias) {
            return Err(SshIdError::DuplicateAlias(record.alias));
        }

        let alias = record.alias.clone();
        records.push(record);

        self.save(&records).map_err(|source| SshIdError::RegistryWrite {
            alias: alias.clone(),
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(alias = %alias, registry = %self.path.display(), records = records.len(), "registry updated");
        Ok(())
    }

    /// Look up the record for `alias`.
    pub fn find_by_alias(&self, alias: &str) -> Result<Option<KeyRecord>> {
        Ok(self.load()?.into_iter().find(|r| r.alias == alias))
    }

    /// The document exactly as stored, or `None` if there is none yet.
    pub fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SshIdError::Storage(e)),
        }
    }

    fn save(&self, records: &[KeyRecord]) -> io::Result<()> {
        write_atomic_with(&self.path, |file| {
            let mut buffer = Vec::new();
            let formatter = PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            records.serialize(&mut serializer).map_err(io::Error::from)?;
            file.write_all(&buffer)
        })
    }
}
