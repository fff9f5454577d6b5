//! The Anthropic API key used for every provider call.
//!
//! The key is either absent or carries the provider's `sk-ant-` prefix; a
//! persisted record that fails that check is ignored at startup. Writes go
//! through the atomic config writer, and the in-memory value only changes
//! once the record is on disk.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub(crate) const KEY_PREFIX: &str = "sk-ant-";

const CREDENTIAL_FILE: &str = "credential.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialRecord {
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CredentialError {
    Empty,
    InvalidPrefix,
    Persist(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Empty => write!(f, "API key is empty"),
            CredentialError::InvalidPrefix => {
                write!(f, "Invalid API key format (expected a key starting with {KEY_PREFIX})")
            }
            CredentialError::Persist(e) => write!(f, "Failed to save API key: {e}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Trim and check a candidate key.
pub(crate) fn validate_key(raw: &str) -> Result<String, CredentialError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(CredentialError::Empty);
    }
    if !key.starts_with(KEY_PREFIX) || key.len() == KEY_PREFIX.len() {
        return Err(CredentialError::InvalidPrefix);
    }
    Ok(key.to_string())
}

/// Log-safe rendering of a key: prefix plus the last four characters.
pub(crate) fn mask_key(key: &str) -> String {
    let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if key.starts_with(KEY_PREFIX) {
        format!("{KEY_PREFIX}…{tail}")
    } else {
        format!("…{tail}")
    }
}

pub(crate) struct CredentialStore {
    dir: PathBuf,
    key: RwLock<Option<String>>,
}

impl CredentialStore {
    /// Read the persisted record from `dir`. A missing, corrupt or
    /// wrongly-prefixed record leaves the store empty.
    pub(crate) fn load(dir: &Path) -> Self {
        let record: CredentialRecord = crate::config::load_json_in(dir, CREDENTIAL_FILE);
        let key = record.api_key.and_then(|raw| match validate_key(&raw) {
            Ok(key) => {
                tracing::info!("Loaded API key {}", mask_key(&key));
                Some(key)
            }
            Err(e) => {
                tracing::warn!("Ignoring persisted API key: {e}");
                None
            }
        });
        Self {
            dir: dir.to_path_buf(),
            key: RwLock::new(key),
        }
    }

    /// Store seeded with `key` without reading `dir`.
    #[cfg(test)]
    pub(crate) fn in_memory(dir: &Path, key: Option<&str>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            key: RwLock::new(key.map(str::to_string)),
        }
    }

    pub(crate) fn has_key(&self) -> bool {
        self.key.read().is_some()
    }

    pub(crate) fn api_key(&self) -> Option<String> {
        self.key.read().clone()
    }

    /// Validate, persist, then publish a new key. On any error the current
    /// key is left as it was.
    pub(crate) fn set(&self, raw: &str) -> Result<(), CredentialError> {
        let key = validate_key(raw)?;
        let record = CredentialRecord {
            api_key: Some(key.clone()),
        };
        crate::config::save_json_in(&self.dir, CREDENTIAL_FILE, &record)
            .map_err(CredentialError::Persist)?;
        tracing::info!("API key updated ({})", mask_key(&key));
        *self.key.write() = Some(key);
        Ok(())
    }
}
