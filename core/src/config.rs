use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use url::Url;

const API_BASE_ENV: &str = "BURROW_API_BASE_URL";

/// Resolved client configuration: where the backend lives.
///
/// The realtime endpoint is not configured separately; it derives from the
/// API base URL by substituting the `/api` suffix with `/ws`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("backend not configured: set BURROW_API_BASE_URL or create burrow.yaml.")]
    Missing,
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "Backend not configured: set BURROW_API_BASE_URL or create burrow.yaml.".to_string()
            }
            Self::Invalid(detail) => {
                format!("Backend not configured: {detail}. Update burrow.yaml.")
            }
        }
    }
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        Self { api_base_url }
    }

    /// Resolve configuration from the environment, falling back to the
    /// on-disk `burrow.yaml`.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(API_BASE_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(Self::new(trimmed));
            }
        }
        let path = locate_config_file().ok_or(ConfigError::Missing)?;
        let contents = fs::read_to_string(&path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: BurrowConfig = serde_yaml::from_str(&contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid burrow.yaml: {err}")))?;
        let app = config
            .app
            .ok_or_else(|| ConfigError::Invalid("missing `app` section".to_string()))?;
        resolve_app_section(app)
    }

    /// Websocket endpoint for the realtime chat session.
    pub fn ws_url(&self) -> String {
        let base = match self.api_base_url.strip_suffix("/api") {
            Some(stripped) => format!("{stripped}/ws"),
            None => format!("{}/ws", self.api_base_url),
        };
        match Url::parse(&base) {
            Ok(mut url) => {
                let scheme = match url.scheme() {
                    "https" => "wss",
                    "http" => "ws",
                    other => other,
                }
                .to_string();
                let _ = url.set_scheme(&scheme);
                url.to_string()
            }
            Err(_) => base,
        }
    }

    /// Whether credentials should be stored with the `secure` attribute,
    /// mirroring `secure: location.protocol === 'https:'`.
    pub fn secure_transport(&self) -> bool {
        self.api_base_url.starts_with("https:")
    }
}

fn resolve_app_section(app: AppSection) -> Result<ClientConfig, ConfigError> {
    let api_base_url = app.api_base_url.unwrap_or_default();
    let api_base_url = api_base_url.trim();
    if api_base_url.is_empty() {
        return Err(ConfigError::Invalid(
            "missing `api_base_url` in burrow.yaml".to_string(),
        ));
    }
    Ok(ClientConfig::new(api_base_url))
}

fn locate_config_file() -> Option<PathBuf> {
    burrow_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn burrow_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("burrow");
        paths.push(config_dir.join("burrow.yaml"));
        paths.push(config_dir.join("burrow.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".burrow").join("burrow.yaml"));
        paths.push(home_dir.join(".burrow").join("burrow.yml"));
    } else {
        paths.push(PathBuf::from("burrow.yaml"));
        paths.push(PathBuf::from("burrow.yml"));
    }
    paths
}

/// Directory holding persisted client state (credentials, preferences).
pub fn profile_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.data_dir().join("burrow")
    } else {
        PathBuf::from(".burrow")
    }
}

#[derive(Debug, Deserialize)]
struct BurrowConfig {
    app: Option<AppSection>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    #[serde(default)]
    api_base_url: Option<String>,
}
