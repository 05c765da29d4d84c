use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ArchiveError, ValidationError};

/// Fixed set of submission categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    News,
    Culture,
    Health,
    Personal,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::News,
        Category::Culture,
        Category::Health,
        Category::Personal,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::News => "News",
            Category::Culture => "Culture",
            Category::Health => "Health",
            Category::Personal => "Personal",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_api_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "[::]".to_string()
}

fn default_max_upload_mb() -> usize {
    200
}

fn default_session_idle_secs() -> u64 {
    1800
}

/// Archive server configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding the content directories and the submission log (default: .)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// API server port (default: 3000)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Address to bind, IPv6 wildcard listens on IPv4 too (default: [::])
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Request body limit for uploads and capture pushes, in MiB (default: 200)
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Sessions untouched for this many seconds are dropped with their capture (default: 1800)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_port: default_api_port(),
            bind_address: default_bind_address(),
            max_upload_mb: default_max_upload_mb(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl ArchiveConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ArchiveError::io(path, e))?;
        let config: ArchiveConfig = toml::from_str(&content).map_err(|e| {
            ArchiveError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.api_port == 0 {
            return Err(ArchiveError::Config("api_port must be non-zero".to_string()));
        }
        if self.max_upload_mb == 0 {
            return Err(ArchiveError::Config(
                "max_upload_mb must be at least 1".to_string(),
            ));
        }
        if self.session_idle_secs == 0 {
            return Err(ArchiveError::Config(
                "session_idle_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ArchiveConfig = toml::from_str("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.bind_address, "[::]");
        assert_eq!(config.max_upload_bytes(), 200 * 1024 * 1024);
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config: ArchiveConfig = toml::from_str(
            r#"
            data_dir = "/srv/archive"
            api_port = 8080
            max_upload_mb = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/archive"));
        assert_eq!(config.api_port, 8080);
        assert!(config.validate().is_err());

        let config: ArchiveConfig = toml::from_str("session_idle_secs = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Health".parse::<Category>().unwrap(), Category::Health);
        assert_eq!(
            "health".parse::<Category>(),
            Err(ValidationError::UnknownCategory("health".to_string()))
        );
        let json = serde_json::to_string(&Category::Culture).unwrap();
        assert_eq!(json, "\"Culture\"");
    }
}
