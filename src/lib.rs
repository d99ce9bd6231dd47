//! sshid: SSH identity registry
//!
//! This library creates ed25519 key pairs for remote authentication and keeps
//! two documents in step with them:
//!
//! - a JSON registry of every generated identity (`keys.json`)
//! - an OpenSSH client config with one `Host` block per alias (`config`)
//!
//! Key pairs, registry and config all live in one key store directory.
//!
//! # Architecture
//!
//! - [`storage::keystore`]: key-pair paths and store export
//! - [`storage::registry`]: the registry document
//! - [`storage::ssh_config`]: the connection config document
//! - [`keygen`]: the external key generator (`ssh-keygen`)
//! - [`generator`]: [`KeyGenerator`], which ties the above together
//!
//! # Example
//!
//! ```rust,no_run
//! use sshid::config::Settings;
//! use sshid::KeyGenerator;
//!
//! # async fn example() -> sshid::Result<()> {
//! let generator = KeyGenerator::new(&Settings::for_store("keys"));
//! let record = generator
//!     .create_identity("me@example.com", "work", "github.com")
//!     .await?;
//! println!("created {}", record.key_file_path.display());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod keygen;
pub mod logging;
pub mod storage;

// Re-export commonly used types
pub use error::{Result, SshIdError};
pub use generator::KeyGenerator;
pub use storage::record::KeyRecord;
