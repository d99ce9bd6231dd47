//! External key-pair generation.
//!
//! Key material is never produced in-process. A [`KeyPairGenerator`] is asked
//! to write a key pair at a given path; the default one runs `ssh-keygen`.

use crate::error::{Result, SshIdError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Parameters for one key-pair generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenRequest {
    /// Where the private key is written. The public key lands at `<path>.pub`.
    pub key_file_path: PathBuf,
    /// Comment embedded in the public key.
    pub comment: String,
}

/// Something that can create an unencrypted ed25519 key pair on disk.
///
/// Implementations must not overwrite an existing key. Dropping the returned
/// future must abandon the work (for a child process: kill it).
#[async_trait]
pub trait KeyPairGenerator: Send + Sync {
    async fn generate(&self, request: &KeyGenRequest) -> Result<()>;
}

/// Runs `ssh-keygen -t ed25519 -C <comment> -f <path> -N ""`.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: PathBuf,
}

impl SshKeygen {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new("ssh-keygen")
    }
}

#[async_trait]
impl KeyPairGenerator for SshKeygen {
    async fn generate(&self, request: &KeyGenRequest) -> Result<()> {
        let path = &request.key_file_path;
        let failed = |reason: String| SshIdError::KeyGenerationFailed {
            path: path.clone(),
            reason,
        };

        tracing::debug!(program = %self.program.display(), key = %path.display(), "running key generator");

        // stdin is closed so an overwrite prompt fails instead of blocking.
        let output = Command::new(&self.program)
            .arg("-q")
            .args(["-t", "ed25519", "-C"])
            .arg(&request.comment)
            .arg("-f")
            .arg(path)
            .args(["-N", ""])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("cannot run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{} ({})", output.status, stderr.trim())));
        }

        Ok(())
    }
}

/// The comment field of an OpenSSH public key line (`<type> <base64> <comment>`).
pub fn public_key_comment(public_key: &str) -> Option<&str> {
    let line = public_key.lines().next()?.trim();
    let mut parts = line.splitn(3, char::is_whitespace);
    let _key_type = parts.next()?;
    let _blob = parts.next()?;
    let comment = parts.next()?.trim();
    (!comment.is_empty()).then_some(comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_public_key_comment() {
        assert_eq!(
            public_key_comment("ssh-ed25519 AAAAC3Nza a@x.com\n"),
            Some("a@x.com")
        );
        assert_eq!(
            public_key_comment("ssh-ed25519 AAAAC3Nza Jane Doe <jane@x.com>"),
            Some("Jane Doe <jane@x.com>")
        );
        assert_eq!(public_key_comment("ssh-ed25519 AAAAC3Nza"), None);
        assert_eq!(public_key_comment(""), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_generation_failure() {
        let temp_dir = TempDir::new().unwrap();
        let keygen = SshKeygen::new(temp_dir.path().join("no-such-keygen"));
        let request = KeyGenRequest {
            key_file_path: temp_dir.path().join("id_ed25519.a"),
            comment: "a@x.com".to_string(),
        };

        match keygen.generate(&request).await {
            Err(SshIdError::KeyGenerationFailed { path, reason }) => {
                assert_eq!(path, request.key_file_path);
                assert!(reason.contains("cannot run"));
            }
            other => panic!("Expected KeyGenerationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ssh_keygen_creates_pair_when_available() {
        let temp_dir = TempDir::new().unwrap();
        let keygen = SshKeygen::default();
        let request = KeyGenRequest {
            key_file_path: temp_dir.path().join("id_ed25519.origin"),
            comment: "a@x.com".to_string(),
        };

        match keygen.generate(&request).await {
            Ok(()) => {
                let public =
                    std::fs::read_to_string(temp_dir.path().join("id_ed25519.origin.pub")).unwrap();
                assert!(public.starts_with("ssh-ed25519 "));
                assert_eq!(public_key_comment(&public), Some("a@x.com"));
                assert!(request.key_file_path.exists());
            }
            // No ssh-keygen on this machine.
            Err(SshIdError::KeyGenerationFailed { reason, .. }) if reason.contains("cannot run") => {}
            Err(e) => panic!("ssh-keygen failed: {}", e),
        }
    }
}
