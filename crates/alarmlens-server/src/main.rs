use alarmlens_analysis::AlarmEnricher;
use alarmlens_cloud::{AwsCredentials, CloudWatchClient};
use alarmlens_notify::formatter::{MessageFormatter, TextFormatter};
use alarmlens_notify::plugin::{ChannelContext, ChannelRegistry};
use alarmlens_server::app;
use alarmlens_server::config::ServerConfig;
use alarmlens_server::handler::EventHandler;
use alarmlens_server::logging;
use alarmlens_server::state::AppState;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  alarmlens-server [config.toml]                          Start the HTTP server");
    eprintln!("  alarmlens-server enrich <config.toml> <alarm-name>      Enrich one alarm and print the result");
    eprintln!("  alarmlens-server handle <config.toml> <event.json>      Process one alarm event end to end");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("enrich") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("enrich requires <config.toml> and <alarm-name> arguments")
            })?;
            let alarm_name = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("enrich requires <alarm-name> argument")
            })?;
            run_enrich(config_path, alarm_name).await
        }
        Some("handle") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("handle requires <config.toml> and <event.json> arguments")
            })?;
            let event_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("handle requires <event.json> argument")
            })?;
            run_handle(config_path, event_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args.get(1).map(|s| s.as_str());
            run_server(config_path).await
        }
    }
}

fn build_enricher(config: &ServerConfig, credentials: AwsCredentials) -> Result<AlarmEnricher> {
    let client = CloudWatchClient::new(credentials, &config.aws.region, config.aws.endpoint.as_deref())
        .context("Failed to create CloudWatch client")?;
    let span = tracing::info_span!("alarmlens", region = %config.aws.region);
    Ok(AlarmEnricher::from_client(Arc::new(client)).with_span(span))
}

fn build_handler(config: &ServerConfig) -> Result<EventHandler> {
    let credentials = AwsCredentials::from_env().context("Failed to load AWS credentials")?;
    let enricher = build_enricher(config, credentials.clone())?;

    let registry = ChannelRegistry::default();
    let (channel_type, channel_config) = config.channel_config();
    let ctx = ChannelContext {
        region: config.aws.region.clone(),
        credentials,
    };
    let channel = registry
        .create_channel(channel_type, &ctx, &channel_config)
        .with_context(|| format!("Failed to create {channel_type} channel"))?;

    Ok(EventHandler::new(
        Arc::new(enricher),
        Arc::from(channel),
        config.enrich_timeout(),
    ))
}

/// Cancel `token` on Ctrl-C.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            token.cancel();
        }
    });
}

async fn run_server(config_path: Option<&str>) -> Result<()> {
    let config = ServerConfig::resolve(config_path)?;
    logging::init_tracing(config.log_format)?;

    tracing::info!(
        region = %config.aws.region,
        http_port = config.http_port,
        target = config.dispatch.target.channel_type(),
        "alarmlens-server starting"
    );

    let handler = Arc::new(build_handler(&config)?);
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let state = AppState::new(handler, shutdown.clone());
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind {http_addr}"))?;

    tracing::info!(addr = %http_addr, "HTTP server listening");

    axum::serve(listener, app::build_http_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("alarmlens-server stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn run_enrich(config_path: &str, alarm_name: &str) -> Result<()> {
    let mut config = ServerConfig::load(config_path)?;
    config.apply_env_with(|key| std::env::var(key).ok())?;
    logging::init_tracing(config.log_format)?;
    if config.aws.region.trim().is_empty() {
        anyhow::bail!("AWS region is required (aws.region or AWS_REGION)");
    }

    let credentials = AwsCredentials::from_env().context("Failed to load AWS credentials")?;
    let enricher = build_enricher(&config, credentials)?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let result = tokio::time::timeout(
        config.enrich_timeout(),
        enricher.enrich_at(alarm_name, chrono::Utc::now(), &shutdown),
    )
    .await
    .map_err(|_| anyhow::anyhow!("enrichment timed out after {:?}", config.enrich_timeout()))??;

    println!("{}", TextFormatter.format(&result)?);
    Ok(())
}

async fn run_handle(config_path: &str, event_path: &str) -> Result<()> {
    let config = ServerConfig::resolve(Some(config_path))?;
    logging::init_tracing(config.log_format)?;

    let payload = std::fs::read(event_path)
        .with_context(|| format!("Failed to read event file '{event_path}'"))?;

    let handler = build_handler(&config)?;
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let result = handler.handle_json(&payload, &shutdown).await?;
    tracing::info!(
        alarm = %result.alarm.name,
        violations = result.violating_metrics.len(),
        "handle completed"
    );
    Ok(())
}
