use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration for the Platelog sync service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the sync service
    pub server_url: Option<String>,
    /// API key used as the Bearer token
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        if let Ok(server_url) = std::env::var("PLATELOG_SERVER_URL") {
            config.server_url = Some(server_url);
        }
        if let Ok(api_key) = std::env::var("PLATELOG_API_KEY") {
            config.api_key = Some(api_key);
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/platelog/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("platelog")
            .join("config.yaml")
    }

    /// Whether enough is configured to reach the sync service.
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_key.is_some()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server_url.is_none());
        assert!(config.api_key.is_none());
        assert!(!config.is_configured());
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.api_key.is_none() || std::env::var("PLATELOG_API_KEY").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: http://localhost:8080").unwrap();
        writeln!(file, "api_key: secret").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.server_url,
            Some("http://localhost:8080".to_string())
        );
        assert!(config.is_configured());
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: http://fromfile").unwrap();

        std::env::set_var("PLATELOG_SERVER_URL", "http://fromenv");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url, Some("http://fromenv".to_string()));

        std::env::remove_var("PLATELOG_SERVER_URL");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
