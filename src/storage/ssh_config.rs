//! OpenSSH client config kept in sync with the registry.
//!
//! The document is a sequence of `Host` blocks. A block starts at a `Host` (or
//! `Match`) line and runs to the next block start or to the first unindented
//! line after a blank line. Indented options after a blank line still belong
//! to the block, as OpenSSH reads them. Lines outside any block are kept
//! verbatim.

use crate::error::{Result, SshIdError};
use crate::storage::atomic::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Config file name inside the key store directory.
pub const CONFIG_FILENAME: &str = "config";

/// Login user written into every generated block.
pub const DEFAULT_USER: &str = "git";

const INDENT: &str = "    ";

/// Connection parameters of one `Host` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub alias: String,
    pub hostname: String,
    pub user: String,
    pub identity_file: PathBuf,
}

impl HostEntry {
    /// The block text, including its blank terminator line.
    pub fn render(&self) -> String {
        let identity = self.identity_file.to_string_lossy();
        let identity = if identity.chars().any(char::is_whitespace) {
            format!("\"{}\"", identity)
        } else {
            identity.into_owned()
        };

        format!(
            "Host {alias}\n{i}HostName {host}\n{i}User {user}\n{i}IdentityFile {identity}\n\n",
            alias = self.alias,
            host = self.hostname,
            user = self.user,
            identity = identity,
            i = INDENT,
        )
    }
}

/// A slice of the document: either a block or text between blocks.
#[derive(Debug)]
struct Segment<'a> {
    /// The single alias named on the `Host` line. `None` for text outside
    /// blocks, `Match` blocks and multi-pattern `Host` lines.
    alias: Option<&'a str>,
    text: String,
}

fn keyword_and_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = line.split_at(split);
    let value = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    Some((keyword, value.trim_end()))
}

fn block_start(line: &str) -> Option<Option<&str>> {
    let (keyword, value) = match keyword_and_value(line) {
        Some(pair) => pair,
        None => {
            // A bare `Host` with nothing after it still opens a block.
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case("host") || trimmed.eq_ignore_ascii_case("match") {
                return Some(None);
            }
            return None;
        }
    };

    if keyword.eq_ignore_ascii_case("host") {
        let mut patterns = value.split_whitespace();
        match (patterns.next(), patterns.next()) {
            (Some(alias), None) => Some(Some(alias)),
            _ => Some(None),
        }
    } else if keyword.eq_ignore_ascii_case("match") {
        Some(None)
    } else {
        None
    }
}

fn parse(document: &str) -> Vec<Segment<'_>> {
    let mut segments: Vec<Segment<'_>> = Vec::new();
    let mut in_block = false;
    let mut seen_blank = false;

    for line in document.split_inclusive('\n') {
        let is_blank = line.trim().is_empty();

        if let Some(alias) = block_start(line) {
            segments.push(Segment {
                alias,
                text: line.to_string(),
            });
            in_block = true;
            seen_blank = false;
            continue;
        }

        if in_block && seen_blank && !is_blank {
            if line.starts_with(char::is_whitespace) {
                seen_blank = false;
            } else {
                in_block = false;
                segments.push(Segment {
                    alias: None,
                    text: String::new(),
                });
            }
        }
        if in_block && is_blank {
            seen_blank = true;
        }

        match segments.last_mut() {
            Some(segment) => segment.text.push_str(line),
            None => segments.push(Segment {
                alias: None,
                text: line.to_string(),
            }),
        }
    }

    segments
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Handle to the connection config document.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    path: PathBuf,
}

impl ConnectionConfig {
    /// Config stored in `directory`.
    pub fn in_dir(directory: &Path) -> Self {
        Self::at(directory.join(CONFIG_FILENAME))
    }

    /// Config stored at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The document exactly as stored, or `None` if there is none yet.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SshIdError::Storage(e)),
        }
    }

    /// Insert or replace the block for `alias`.
    ///
    /// An existing block is replaced where it stands and any later blocks for
    /// the same alias are dropped. A new block goes at the end, separated from
    /// the previous content by a blank line. Calling this twice with the same
    /// arguments leaves the same document as calling it once.
    pub fn upsert(
        &self,
        alias: &str,
        hostname: &str,
        user: &str,
        identity_file: &Path,
    ) -> Result<()> {
        let entry = HostEntry {
            alias: alias.to_string(),
            hostname: hostname.to_string(),
            user: user.to_string(),
            identity_file: identity_file.to_path_buf(),
        };
        let write_err = |source: io::Error| SshIdError::ConfigWrite {
            alias: alias.to_string(),
            host: hostname.to_string(),
            identity_file: identity_file.to_path_buf(),
            source,
        };

        let current = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(write_err(e)),
        };

        let rendered = entry.render();
        let mut updated = String::with_capacity(current.len() + rendered.len());
        let mut replaced = false;
        let mut dropped = 0;

        for segment in parse(&current) {
            if segment.alias == Some(alias) {
                if replaced {
                    dropped += 1;
                } else {
                    updated.push_str(&rendered);
                    replaced = true;
                }
            } else {
                updated.push_str(&segment.text);
            }
        }

        if !replaced {
            if !updated.is_empty() {
                if !updated.ends_with('\n') {
                    updated.push('\n');
                }
                if !updated.ends_with("\n\n") {
                    updated.push('\n');
                }
            }
            updated.push_str(&rendered);
        }

        if dropped > 0 {
            tracing::warn!(alias = %alias, dropped, "removed duplicate host blocks");
        }

        write_atomic(&self.path, updated.as_bytes()).map_err(write_err)?;

        tracing::info!(
            alias = %alias,
            config = %self.path.display(),
            replaced,
            "connection config updated"
        );
        Ok(())
    }

    /// The parsed block for `alias`, if the document has one.
    pub fn find(&self, alias: &str) -> Result<Option<HostEntry>> {
        let document = match self.read()? {
            Some(document) => document,
            None => return Ok(None),
        };

        let Some(segment) = parse(&document).into_iter().find(|s| s.alias == Some(alias)) else {
            return Ok(None);
        };

        let mut entry = HostEntry {
            alias: alias.to_string(),
            hostname: String::new(),
            user: String::new(),
            identity_file: PathBuf::new(),
        };
        for line in segment.text.lines().skip(1) {
            let Some((keyword, value)) = keyword_and_value(line) else {
                continue;
            };
            // First occurrence wins, as in OpenSSH.
            let value = unquote(value);
            if keyword.eq_ignore_ascii_case("hostname") && entry.hostname.is_empty() {
                entry.hostname = value.to_string();
            } else if keyword.eq_ignore_ascii_case("user") && entry.user.is_empty() {
                entry.user = value.to_string();
            } else if keyword.eq_ignore_ascii_case("identityfile")
                && entry.identity_file.as_os_str().is_empty()
            {
                entry.identity_file = PathBuf::from(value);
            }
        }

        Ok(Some(entry))
    }
}
