use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Cookie `SameSite` policy recorded alongside a credential entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

/// Attributes the browser would attach to a persisted cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialAttributes {
    pub expires_at: Option<DateTime<Utc>>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CredentialAttributes {
    fn default() -> Self {
        Self {
            expires_at: None,
            secure: false,
            same_site: SameSite::Lax,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CredentialEntry {
    value: String,
    #[serde(flatten)]
    attributes: CredentialAttributes,
}

/// File-backed stand-in for the browser's cookie jar and local storage.
///
/// Credentials are one JSON file per entry under `credentials/`; preferences
/// live in a single `preferences.json` map. Reads are tolerant: expired or
/// unreadable entries are dropped the way a browser drops stale cookies.
#[derive(Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(root.join("credentials")).ok();
        Self { root }
    }

    /// Throwaway store under the system temp directory, for tests and
    /// ephemeral sessions.
    pub fn in_memory() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("burrow-{}", Uuid::new_v4()));
        Self::new(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn credential_path(&self, name: &str) -> PathBuf {
        self.root.join("credentials").join(format!("{name}.json"))
    }

    fn preferences_path(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    pub fn set_credential(
        &self,
        name: &str,
        value: &str,
        attributes: CredentialAttributes,
    ) -> Result<()> {
        let entry = CredentialEntry {
            value: value.to_string(),
            attributes,
        };
        let path = self.credential_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(path, serde_json::to_vec_pretty(&entry)?)?;
        Ok(())
    }

    /// Current value of a credential, or `None` if absent, expired, or
    /// unreadable. Expired and unreadable entries are removed.
    pub fn credential(&self, name: &str) -> Option<String> {
        let path = self.credential_path(name);
        let contents = fs::read_to_string(&path).ok()?;
        let entry: CredentialEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, name, "discarding unreadable credential entry");
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if let Some(expires_at) = entry.attributes.expires_at {
            if expires_at <= Utc::now() {
                let _ = fs::remove_file(&path);
                return None;
            }
        }
        Some(entry.value)
    }

    pub fn remove_credential(&self, name: &str) {
        let _ = fs::remove_file(self.credential_path(name));
    }

    fn load_preferences(&self) -> std::collections::BTreeMap<String, String> {
        fs::read_to_string(self.preferences_path())
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        let mut preferences = self.load_preferences();
        preferences.insert(key.to_string(), value.to_string());
        fs::write(
            self.preferences_path(),
            serde_json::to_vec_pretty(&preferences)?,
        )?;
        Ok(())
    }

    pub fn preference(&self, key: &str) -> Option<String> {
        self.load_preferences().remove(key)
    }
}
