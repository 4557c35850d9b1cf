//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::RouterConfig;
use crate::config::validation::{fix_config, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse, fix up and validate configuration text.
pub fn parse_config(content: &str) -> Result<RouterConfig, ConfigError> {
    let mut config: RouterConfig = toml::from_str(content)?;
    fix_config(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<RouterConfig, ConfigError> {
    match load_config(path) {
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = ?path, "Config file not found, using defaults");
            parse_config("")
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_fix_up() {
        let config = parse_config(
            r#"
            [balance]
            keep_visit_time = 0
            index = 5

            [[servers]]
            host = "10.0.0.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.balance.keep_visit_time, 180);
        assert_eq!(config.balance.index, 0);
        assert!(!config.servers[0].id.is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_config("servers = 3"), Err(ConfigError::Parse(_))));

        let err = parse_config("[[servers]]\nhost = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref v) if v.len() == 1));
        assert!(err.to_string().contains("blank host"));
    }

    #[test]
    fn test_missing_file_defaults() {
        let path = std::env::temp_dir().join(format!("relay-router-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
        let config = load_or_default(&path).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.listener.local_port, 1080);
    }
}
