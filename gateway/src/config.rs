use collector::config::{Config as GatewayConfig, ValidationError};
use directory::config::StoreConfig;
use serde::Deserialize;
use std::fs::File;

fn default_statsd_port() -> u16 {
    8125
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
    /// Prepended to every metric name.
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ValidationError::InvalidPort.into());
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector::config::HandlerKind;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            listener:
                host: 0.0.0.0
                port: 3000
            admin_listener:
                host: 127.0.0.1
                port: 3001
            store:
                type: sqlite
                url: sqlite://usage.db
                run_migrations: true
            upstream:
                timeout_secs: 20
            collection:
                default_tenant: acme
                metrics: [interactions, api_calls]
            routes:
                - path: /collect
                  handler: collect_usage
            metrics:
                statsd_host: 127.0.0.1
                prefix: gateway
            logging:
                filter: debug
                sentry_dsn: https://key@sentry.example/1
        "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).unwrap();

        assert_eq!(config.gateway.listener.port, 3000);
        assert_eq!(config.gateway.upstream.timeout_secs, Some(20));
        assert_eq!(config.gateway.routes.len(), 1);
        assert_eq!(config.gateway.routes[0].handler, HandlerKind::CollectUsage);
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                url: "sqlite://usage.db".into(),
                max_connections: 5,
                run_migrations: true,
            }
        );
        let metrics = config.metrics.unwrap();
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix.as_deref(), Some("gateway"));
        assert_eq!(config.logging.filter, "debug");
        assert!(config.logging.sentry_dsn.is_some());
    }

    #[test]
    fn minimal_config() {
        let yaml = r#"
            listener: {host: 0.0.0.0, port: 3000}
            admin_listener: {host: 127.0.0.1, port: 3001}
            store:
                type: memory
        "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).unwrap();

        assert_eq!(config.store, StoreConfig::Memory { tenants: vec![] });
        assert_eq!(config.metrics, None);
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.gateway.routes.len(), 3);
    }

    #[test]
    fn invalid_configs() {
        let missing_store = write_tmp_file(
            r#"
            listener: {host: 0.0.0.0, port: 3000}
            admin_listener: {host: 127.0.0.1, port: 3001}
        "#,
        );
        assert!(matches!(
            Config::from_file(missing_store.path()),
            Err(ConfigError::ParseError(_))
        ));

        let bad_metrics = write_tmp_file(
            r#"
            listener: {host: 0.0.0.0, port: 3000}
            admin_listener: {host: 127.0.0.1, port: 3001}
            store: {type: memory}
            collection:
                metrics: [interactions, pageviews]
        "#,
        );
        let err = Config::from_file(bad_metrics.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("pageviews"));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/gateway.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
