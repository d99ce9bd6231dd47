//! Key store directory management.
//!
//! This module owns the directory that holds `id_ed25519.<alias>` key pairs
//! and knows how to copy the whole store somewhere else.

use crate::error::{ExportStep, Result, SshIdError};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name prefix of every private key in the store.
pub const KEY_FILE_PREFIX: &str = "id_ed25519.";

/// Suffix appended to a private key path to name its public half.
pub const PUBLIC_KEY_SUFFIX: &str = ".pub";

/// Name of the directory created under an export destination.
pub const EXPORT_DIR_NAME: &str = "keys";

/// Characters that OpenSSH treats specially in a `Host` pattern or as a comment.
const CONFIG_META_CHARS: &[char] = &['*', '?', '!', '#', ','];

/// The on-disk directory holding key-pair files.
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    /// Create a handle for the store rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory if it is missing.
    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(SshIdError::Storage)
    }

    /// Compute the private key path for `alias`.
    ///
    /// Pure: the filesystem is not consulted.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sshid::storage::keystore::KeyStore;
    /// use std::path::Path;
    ///
    /// let store = KeyStore::new("keys");
    /// let path = store.path_for("origin").unwrap();
    /// assert_eq!(path, Path::new("keys/id_ed25519.origin"));
    /// assert!(store.path_for("my origin").is_err());
    /// ```
    pub fn path_for(&self, alias: &str) -> Result<PathBuf> {
        validate_alias(alias)?;
        Ok(self.root.join(key_file_name(alias)))
    }

    /// Compute the public key path for `alias`.
    pub fn public_path_for(&self, alias: &str) -> Result<PathBuf> {
        Ok(public_key_path(&self.path_for(alias)?))
    }

    /// Whether either half of the key pair for `alias` is on disk.
    pub fn key_pair_exists(&self, alias: &str) -> Result<bool> {
        let private = self.path_for(alias)?;
        Ok(private.exists() || public_key_path(&private).exists())
    }

    /// Copy the entire store into `destination_dir/keys`.
    ///
    /// A `keys` directory already present at the destination is removed first,
    /// so files deleted from the store since an earlier export do not linger.
    /// Returns the path of the new copy.
    pub fn export(&self, destination_dir: &Path) -> Result<PathBuf> {
        let target = destination_dir.join(EXPORT_DIR_NAME);
        let fail = |step: ExportStep, path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| SshIdError::DestinationUnwritable { path, step, source }
        };

        self.ensure_exists()?;
        let store_root = fs::canonicalize(&self.root)?;

        fs::create_dir_all(destination_dir).map_err(fail(ExportStep::Prepare, destination_dir))?;
        let destination_root =
            fs::canonicalize(destination_dir).map_err(fail(ExportStep::Prepare, destination_dir))?;
        // The target must not overlap the store, or removing it would delete live keys.
        let resolved_target = match fs::canonicalize(&target) {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => destination_root.join(EXPORT_DIR_NAME),
            Err(e) => return Err(fail(ExportStep::Prepare, &target)(e)),
        };
        let overlap = if destination_root.starts_with(&store_root) {
            Some("destination lies inside the key store")
        } else if store_root.starts_with(&resolved_target) {
            Some("export target is or contains the key store")
        } else if resolved_target.starts_with(&store_root) {
            Some("export target lies inside the key store")
        } else {
            None
        };
        if let Some(reason) = overlap {
            return Err(SshIdError::DestinationUnwritable {
                path: target,
                step: ExportStep::Prepare,
                source: io::Error::new(io::ErrorKind::InvalidInput, reason),
            });
        }

        match fs::symlink_metadata(&target) {
            Ok(meta) => {
                let removed = if meta.is_dir() {
                    fs::remove_dir_all(&target)
                } else {
                    fs::remove_file(&target)
                };
                removed.map_err(fail(ExportStep::RemoveExisting, &target))?;
                tracing::info!(target = %target.display(), "removed previous export");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(fail(ExportStep::RemoveExisting, &target)(e)),
        }

        fs::create_dir(&target).map_err(fail(ExportStep::CreateTarget, &target))?;

        let copied = copy_tree(&self.root, &target)?;
        tracing::info!(
            store = %self.root.display(),
            target = %target.display(),
            files = copied,
            "exported key store"
        );

        Ok(target)
    }
}

/// Key file name for `alias`, without validation.
pub fn key_file_name(alias: &str) -> String {
    format!("{}{}", KEY_FILE_PREFIX, alias)
}

/// The public key path belonging to a private key path.
pub fn public_key_path(private: &Path) -> PathBuf {
    let mut name = OsString::from(private.as_os_str());
    name.push(PUBLIC_KEY_SUFFIX);
    PathBuf::from(name)
}

/// Check that `alias` is usable both as a file name and as a single config token.
pub fn validate_alias(alias: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(SshIdError::InvalidAlias {
            alias: alias.to_string(),
            reason: reason.to_string(),
        })
    };

    if alias.is_empty() {
        return invalid("must not be empty");
    }
    if alias == "." || alias == ".." {
        return invalid("must not be a relative path component");
    }
    if alias.chars().any(char::is_whitespace) {
        return invalid("must not contain whitespace");
    }
    if alias.chars().any(char::is_control) {
        return invalid("must not contain control characters");
    }
    if alias.contains('/') || alias.contains('\\') {
        return invalid("must not contain path separators");
    }
    if alias.contains(CONFIG_META_CHARS) {
        return invalid("must not contain ssh pattern characters (* ? ! # ,)");
    }

    Ok(())
}

/// Recursively copy the contents of `from` into the existing directory `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<usize> {
    let copy_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| SshIdError::DestinationUnwritable {
            path,
            step: ExportStep::Copy,
            source,
        }
    };

    let mut copied = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());

        if file_type.is_dir() {
            fs::create_dir(&dest).map_err(copy_err(&dest))?;
            copied += copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest).map_err(copy_err(&dest))?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let store = KeyStore::new("/srv/keys");

        let path = store.path_for("origin").unwrap();

        assert_eq!(path, PathBuf::from("/srv/keys/id_ed25519.origin"));
        assert_eq!(path, store.path_for("origin").unwrap());
        assert_eq!(
            store.public_path_for("origin").unwrap(),
            PathBuf::from("/srv/keys/id_ed25519.origin.pub")
        );
    }

    #[test]
    fn test_path_for_does_not_touch_filesystem() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("not-created");
        let store = KeyStore::new(&root);

        store.path_for("origin").unwrap();

        assert!(!root.exists());
    }

    #[test]
    fn test_path_for_rejects_unsafe_aliases() {
        let store = KeyStore::new("keys");

        for alias in [
            "", "my origin", "tab\there", "new\nline", "../escape", "a/b", "a\\b", "..", "*",
            "git?", "#x", "a,b", "!neg",
        ] {
            match store.path_for(alias) {
                Err(SshIdError::InvalidAlias { alias: reported, .. }) => {
                    assert_eq!(reported, alias)
                }
                other => panic!("Expected InvalidAlias for {:?}, got {:?}", alias, other),
            }
        }
    }

    #[test]
    fn test_path_for_accepts_typical_aliases() {
        let store = KeyStore::new("keys");

        for alias in ["origin", "github-work", "gitlab.company", "host_2", "ÅŁ"] {
            assert!(store.path_for(alias).is_ok(), "alias {:?} rejected", alias);
        }
    }

    #[test]
    fn test_key_pair_exists_checks_either_half() {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyStore::new(temp_dir.path());

        assert!(!store.key_pair_exists("origin").unwrap());

        fs::write(store.public_path_for("origin").unwrap(), "pub").unwrap();
        assert!(store.key_pair_exists("origin").unwrap());
    }

    #[test]
    fn test_export_copies_store() {
        let store_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let store = KeyStore::new(store_dir.path());
        fs::write(store.path_for("a").unwrap(), "secret").unwrap();
        fs::write(store.public_path_for("a").unwrap(), "public").unwrap();
        fs::write(store_dir.path().join("config"), "Host a\n").unwrap();

        let target = store.export(dest_dir.path()).unwrap();

        assert_eq!(target, dest_dir.path().join("keys"));
        assert_eq!(
            listing(&target),
            vec!["config", "id_ed25519.a", "id_ed25519.a.pub"]
        );
        assert_eq!(
            fs::read_to_string(target.join("id_ed25519.a")).unwrap(),
            "secret"
        );
    }

    #[test]
    fn test_export_replaces_previous_export() {
        let store_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let store = KeyStore::new(store_dir.path());
        fs::write(store.path_for("old").unwrap(), "old").unwrap();
        fs::write(store.path_for("kept").unwrap(), "kept").unwrap();

        store.export(dest_dir.path()).unwrap();
        fs::remove_file(store.path_for("old").unwrap()).unwrap();
        let target = store.export(dest_dir.path()).unwrap();

        assert_eq!(listing(&target), vec!["id_ed25519.kept"]);
    }

    #[test]
    fn test_export_copies_nested_directories() {
        let store_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        fs::create_dir(store_dir.path().join("archive")).unwrap();
        fs::write(store_dir.path().join("archive").join("note"), "n").unwrap();
        let store = KeyStore::new(store_dir.path());

        let target = store.export(dest_dir.path()).unwrap();

        assert!(target.join("archive").join("note").is_file());
    }

    #[test]
    fn test_export_into_store_is_rejected() {
        let store_dir = TempDir::new().unwrap();
        let store = KeyStore::new(store_dir.path());
        fs::write(store.path_for("a").unwrap(), "secret").unwrap();

        let result = store.export(store_dir.path());

        match result {
            Err(SshIdError::DestinationUnwritable { step, .. }) => {
                assert_eq!(step, ExportStep::Prepare)
            }
            other => panic!("Expected DestinationUnwritable, got {:?}", other),
        }
        assert!(!store_dir.path().join("keys").exists());
    }

    #[test]
    fn test_export_into_store_parent_keeps_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyStore::new(temp_dir.path().join("keys"));
        store.ensure_exists().unwrap();
        fs::write(store.path_for("origin").unwrap(), "secret").unwrap();
        fs::write(store.public_path_for("origin").unwrap(), "public").unwrap();

        let result = store.export(temp_dir.path());

        match result {
            Err(SshIdError::DestinationUnwritable { step, .. }) => {
                assert_eq!(step, ExportStep::Prepare)
            }
            other => panic!("Expected DestinationUnwritable, got {:?}", other),
        }
        assert_eq!(
            listing(store.root()),
            vec!["id_ed25519.origin", "id_ed25519.origin.pub"]
        );
        assert_eq!(
            fs::read_to_string(store.path_for("origin").unwrap()).unwrap(),
            "secret"
        );
    }

    #[test]
    fn test_export_into_ancestor_of_store_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyStore::new(temp_dir.path().join("keys").join("work"));
        store.ensure_exists().unwrap();
        fs::write(store.path_for("origin").unwrap(), "secret").unwrap();

        let result = store.export(temp_dir.path());

        assert!(matches!(
            result,
            Err(SshIdError::DestinationUnwritable {
                step: ExportStep::Prepare,
                ..
            })
        ));
        assert!(store.path_for("origin").unwrap().is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_export_target_symlinked_to_store_is_rejected() {
        let store_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let store = KeyStore::new(store_dir.path());
        fs::write(store.path_for("origin").unwrap(), "secret").unwrap();
        std::os::unix::fs::symlink(store_dir.path(), dest_dir.path().join("keys")).unwrap();

        let result = store.export(dest_dir.path());

        assert!(matches!(
            result,
            Err(SshIdError::DestinationUnwritable {
                step: ExportStep::Prepare,
                ..
            })
        ));
        assert!(store.path_for("origin").unwrap().is_file());
    }

    #[test]
    fn test_export_replaces_plain_file_at_target() {
        let store_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        fs::write(dest_dir.path().join("keys"), "not a directory").unwrap();
        let store = KeyStore::new(store_dir.path());

        let target = store.export(dest_dir.path()).unwrap();

        assert!(target.is_dir());
    }
}
