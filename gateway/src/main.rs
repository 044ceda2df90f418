mod config;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use collector::collect::{CollectError, UsageCollector, parse_collection_request};
use collector::errors::GatewayError;
use collector::params::Params;
use collector::upstream::{ClientSetupError, HttpUsageClient};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use directory::config::StoreConfig;
use directory::errors::StoreError;
use directory::sqlite::SqliteStore;
use metrics_exporter_statsd::StatsdBuilder;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about = "Usage collection and event ingestion gateway")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the HTTP endpoints and the admin listener
    Serve,
    /// Run one collection and print the report as JSON
    Collect(CollectArgs),
    /// Apply pending database migrations
    Migrate,
}

#[derive(Args, Default)]
struct CollectArgs {
    /// Tenant slugs to collect for. All tenants when omitted.
    #[arg(long = "tenant", value_delimiter = ',')]
    tenants: Vec<String>,
    /// Vendor project ids to collect for. All projects when omitted.
    #[arg(long = "project", value_delimiter = ',')]
    projects: Vec<String>,
    /// Metrics to collect. The configured default when omitted.
    #[arg(long = "metric", value_delimiter = ',')]
    metrics: Vec<String>,
    #[arg(long)]
    start_time: Option<String>,
    #[arg(long)]
    end_time: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    cursor: Option<String>,
    #[arg(long)]
    environment_id: Option<String>,
}

impl CollectArgs {
    fn into_params(self) -> Params {
        let mut params = Params::default();
        let list = |values: Vec<String>| JsonValue::from(values);

        params.insert("tenants", list(self.tenants));
        params.insert("projectIDs", list(self.projects));
        params.insert("metrics", list(self.metrics));
        let optional = [
            ("startTime", self.start_time),
            ("endTime", self.end_time),
            ("cursor", self.cursor),
            ("environmentID", self.environment_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.insert(key, value);
            }
        }
        if let Some(limit) = self.limit {
            params.insert("limit", limit);
        }
        params
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    ClientSetup(#[from] ClientSetupError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error("migrations require a sqlite store")]
    MigrateUnsupported,
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway exited with an error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_file(&cli.config)?;

    let _sentry = init_logging(&config.logging);
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            CliCommand::Serve => serve(config).await,
            CliCommand::Collect(args) => collect_once(config, args).await,
            CliCommand::Migrate => migrate(&config.store).await,
        }
    })
}

/// Installs the fmt subscriber, plus the sentry layer when a DSN is set. The
/// returned guard flushes sentry on drop.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(metrics.prefix.as_deref())
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    ::metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(collector::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(directory::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(())
}

async fn serve(config: Config) -> Result<(), CliError> {
    let stores = directory::connect(&config.store).await?;
    tracing::info!(
        host = %config.gateway.listener.host,
        port = config.gateway.listener.port,
        "Starting gateway"
    );
    collector::run(config.gateway, stores).await?;
    Ok(())
}

async fn collect_once(config: Config, args: CollectArgs) -> Result<(), CliError> {
    let collection_config = &config.gateway.collection;
    let request = parse_collection_request(&args.into_params(), collection_config, &Local::now())
        .map_err(|e| CliError::InvalidRequest(e.to_string()))?;

    let stores = directory::connect(&config.store).await?;
    let client = Arc::new(HttpUsageClient::new(&config.gateway.upstream)?);
    let collector = UsageCollector::new(stores.directory, client, stores.usage, collection_config);

    let report = collector.collect(request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn migrate(store: &StoreConfig) -> Result<(), CliError> {
    let StoreConfig::Sqlite {
        url,
        max_connections,
        ..
    } = store
    else {
        return Err(CliError::MigrateUnsupported);
    };

    let store = SqliteStore::connect(url, *max_connections).await?;
    store.migrate().await?;
    tracing::info!("Migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector::config::CollectionConfig;
    use collector::metric::Metric;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "gateway",
            "--config",
            "/etc/gateway.yaml",
            "collect",
            "--tenant",
            "acme,zeta",
            "--metric",
            "interactions",
            "--limit",
            "20",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/gateway.yaml"));
        let CliCommand::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.tenants, vec!["acme", "zeta"]);
        assert_eq!(args.limit, Some(20));

        assert!(matches!(
            Cli::try_parse_from(["gateway", "serve"]).unwrap().command,
            CliCommand::Serve
        ));
        assert!(Cli::try_parse_from(["gateway", "backfill"]).is_err());
    }

    #[test]
    fn test_collect_args_to_request() {
        let args = CollectArgs {
            tenants: vec!["acme".into()],
            metrics: vec!["API_CALLS".into()],
            start_time: Some("2025-03-01".into()),
            end_time: Some("2025-03-02".into()),
            limit: Some(5),
            ..Default::default()
        };
        let request =
            parse_collection_request(&args.into_params(), &CollectionConfig::default(), &Local::now())
                .unwrap();

        assert_eq!(request.tenants, vec!["acme"]);
        assert!(request.projects.is_empty());
        assert_eq!(request.metrics, vec![Metric::ApiCalls]);
        assert_eq!(request.window.start_time(), "2025-03-01T00:00:00.000Z");
        assert_eq!(request.limit, 5);
        assert_eq!(request.cursor, None);
    }

    #[test]
    fn test_collect_args_defaults() {
        let request = parse_collection_request(
            &CollectArgs::default().into_params(),
            &CollectionConfig::default(),
            &Local::now(),
        )
        .unwrap();
        assert_eq!(request.metrics, Metric::ALL.to_vec());
        assert!(request.tenants.is_empty());
    }
}
