use super::{types::Config, ConfigError};
use crate::registry::EngineKind;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Runner has at least one worker and one attempt
/// - Every remote registry entry has connection details
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.runner.workers == 0 {
        return Err(ConfigError::ValidationError(
            "runner.workers must be at least 1".to_string(),
        ));
    }
    if config.runner.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "runner.max_attempts must be at least 1".to_string(),
        ));
    }

    for entry in &config.engines {
        if entry.pairs.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "engine '{}' declares no format pairs",
                entry.id
            )));
        }
        if entry.kind == EngineKind::Remote
            && !config
                .remote_engines
                .iter()
                .any(|r| r.id == entry.id.as_str())
        {
            return Err(ConfigError::ValidationError(format!(
                "remote engine '{}' has no [[remote_engines]] entry",
                entry.id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{EngineCapabilities, EngineEntry, EngineId, FormatPair, MediaFormat};

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::from([0, 0, 0, 0]),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.runner.workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_remote_engine_without_connection_fails() {
        let mut config = Config::default();
        config.engines.push(EngineEntry {
            id: EngineId::from("cloudconvert"),
            kind: EngineKind::Remote,
            priority: 0,
            pairs: vec![FormatPair {
                input: MediaFormat::Mov,
                output: MediaFormat::Mp4,
            }],
            capabilities: EngineCapabilities::default(),
        });
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
