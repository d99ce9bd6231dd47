//! Runtime settings.
//!
//! The library takes a [`Settings`] value; the CLI fills it from flags and
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default key store directory, relative to the working directory.
pub const DEFAULT_STORE_DIR: &str = "keys";

/// Default key generator program, looked up on `PATH`.
pub const DEFAULT_KEYGEN_PROGRAM: &str = "ssh-keygen";

/// How long the key generator may run before it is killed.
pub const DEFAULT_KEYGEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the store lives and how keys are generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding key pairs, the registry and the connection config.
    pub store_dir: PathBuf,
    /// Program invoked to generate key pairs.
    pub keygen_program: PathBuf,
    /// Upper bound on one key generation.
    pub keygen_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            keygen_program: PathBuf::from(DEFAULT_KEYGEN_PROGRAM),
            keygen_timeout: DEFAULT_KEYGEN_TIMEOUT,
        }
    }
}

impl Settings {
    /// Default settings for the store at `store_dir`.
    pub fn for_store(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_keygen_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.keygen_program = program.into();
        self
    }

    pub fn with_keygen_timeout(mut self, timeout: Duration) -> Self {
        self.keygen_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.store_dir, PathBuf::from("keys"));
        assert_eq!(settings.keygen_program, PathBuf::from("ssh-keygen"));
        assert_eq!(settings.keygen_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_overrides() {
        let settings = Settings::for_store("/srv/keys")
            .with_keygen_program("/usr/local/bin/ssh-keygen")
            .with_keygen_timeout(Duration::from_millis(250));

        assert_eq!(settings.store_dir, PathBuf::from("/srv/keys"));
        assert_eq!(
            settings.keygen_program,
            PathBuf::from("/usr/local/bin/ssh-keygen")
        );
        assert_eq!(settings.keygen_timeout, Duration::from_millis(250));
    }
}
