//! On-disk state of a key store.
//!
//! This module provides the key-pair directory, the identity registry and the
//! connection config, plus the atomic writer they share.

pub mod atomic;
pub mod keystore;
pub mod record;
pub mod registry;
pub mod ssh_config;
