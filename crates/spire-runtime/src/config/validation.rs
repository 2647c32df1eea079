//! Checks run on the merged configuration before it is handed out.

use std::net::IpAddr;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AppConfig, LogFormat, LogOutput, LoggingConfig, ServerConfig, SpireConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &SpireConfig) -> ConfigResult<()> {
    validate_app_config(&config.app)?;
    validate_server_config(&config.server)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_app_config(app: &AppConfig) -> ConfigResult<()> {
    if app.name.trim().is_empty() {
        return Err(ConfigError::Missing { key: "app.name" });
    }
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.is_empty() {
        return Err(ConfigError::Missing { key: "server.host" });
    }

    // Hostnames are resolved at bind time; only reject text that is neither.
    if server.host.parse::<IpAddr>().is_err()
        && !server
            .host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(ConfigError::invalid(
            "server.host",
            format!("{} is neither an IP address nor a hostname", server.host),
        ));
    }

    if server.body_limit == 0 {
        return Err(ConfigError::invalid("server.body_limit", "must be greater than 0"));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::Missing {
            key: "logging.file_path",
        });
    }

    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::invalid(
            "logging.format",
            "\"json\" requires the `json-log` feature",
        ));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                format!("logging.filters.{module}"),
                "not a module path",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&SpireConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_host() {
        let mut config = SpireConfig::default();
        config.server.host = "not a host".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid { key, .. }) if key == "server.host"
        ));
    }

    #[test]
    fn file_output_needs_a_path() {
        let mut config = SpireConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing {
                key: "logging.file_path"
            })
        ));
    }

    #[test]
    fn rejects_zero_body_limit() {
        let mut config = SpireConfig::default();
        config.server.body_limit = 0;
        assert!(validate_config(&config).is_err());
    }
}
