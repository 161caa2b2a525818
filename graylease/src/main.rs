mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use gray_rules::GrayReleaseEngine;
use gray_rules::admin_client::AdminServiceClient;
use gray_rules::metrics_defs::{ALL_METRICS, MetricType};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "graylease", about = "Gray release rule resolution engine")]
enum CliCommand {
    /// Keep the rule indices in sync until interrupted
    Run(RunArgs),
    /// Resolve the gray release for a single client and exit
    Lookup(LookupArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long = "config")]
    config_file_path: PathBuf,
}

#[derive(Args)]
struct LookupArgs {
    #[arg(long = "config")]
    config_file_path: PathBuf,
    #[arg(long)]
    client_app_id: String,
    #[arg(long)]
    client_ip: String,
    #[arg(long, default_value = "")]
    client_label: String,
    #[arg(long)]
    app_id: String,
    #[arg(long)]
    cluster: String,
    #[arg(long)]
    namespace: String,
}

#[derive(Serialize)]
struct LookupOutput {
    ready: bool,
    release_id: Option<i64>,
    has_gray_rule: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not encode output: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match cli_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("graylease: {err}");
            ExitCode::FAILURE
        }
    }
}

fn cli_main(cli: CliCommand) -> Result<(), CliError> {
    let config_path = match &cli {
        CliCommand::Run(args) => &args.config_file_path,
        CliCommand::Lookup(args) => &args.config_file_path,
    };
    let config = Config::from_file(config_path)?;

    let _sentry = init_logging(config.logging.as_ref());
    if let Some(metrics_config) = &config.metrics {
        init_metrics(metrics_config)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli {
        CliCommand::Run(_) => rt.block_on(run(config)),
        CliCommand::Lookup(args) => rt.block_on(lookup(config, args)),
    }
}

async fn run(config: Config) -> Result<(), CliError> {
    let engine = GrayReleaseEngine::from_config(&config.engine).await;
    tracing::info!(ready = engine.is_ready(), "gray release engine started");

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down gray release engine");
    engine.shutdown().await;
    Ok(())
}

async fn lookup(config: Config, args: LookupArgs) -> Result<(), CliError> {
    // One scan is all a lookup needs, notifications are not followed.
    let source = Arc::new(AdminServiceClient::new(config.engine.admin_service.url.clone()));
    let engine = GrayReleaseEngine::start(config.engine.scan_interval(), source, None).await;

    let output = LookupOutput {
        ready: engine.is_ready(),
        release_id: engine.lookup_release(
            &args.client_app_id,
            &args.client_ip,
            &args.client_label,
            &args.app_id,
            &args.cluster,
            &args.namespace,
        ),
        has_gray_rule: engine.has_gray_rule(
            &args.client_app_id,
            &args.client_ip,
            &args.client_label,
            &args.namespace,
        ),
    };
    engine.shutdown().await;

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let sentry_guard = config.and_then(|c| c.sentry_dsn.as_deref()).map(|dsn| {
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
        .with(
            sentry_guard
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    sentry_guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        config.statsd_host.clone(),
        config.statsd_port,
    )
    .build(Some("graylease"))
    .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
    Ok(())
}
