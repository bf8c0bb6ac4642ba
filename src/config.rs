use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// On-disk configuration, all optional; CLI flags take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub handle: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("tidechat").join("config.toml")
    }

    /// Missing file is not an error; everything can come from flags.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("invalid config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("could not read config at {}", path.display()))
            }
        }
    }
}

/// Fully resolved settings the app starts from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub api_key: String,
    /// Empty means unauthenticated; the service will reject writes.
    pub token: String,
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let config: Config = toml::from_str(
            r#"
            url = "https://rows.example.com"
            api_key = "anon"
            token = "jwt"
            user_id = "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f"
            name = "Alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("https://rows.example.com"));
        assert!(config.user_id.is_some());
        assert!(config.handle.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/tidechat/config.toml")).unwrap();
        assert!(config.url.is_none());
        assert!(config.token.is_none());
    }
}
