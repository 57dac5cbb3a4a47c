use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventsheet::config::{self, Config};
use eventsheet::store::memory::MemoryStore;
use eventsheet::store::sheets::{SharedStore, SheetsClient};
use eventsheet::store::token::{TokenCache, TokenProvider};
use eventsheet::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured.
    let telemetry_layer = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(_) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().tonic())
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    "eventsheet",
                )])))
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        Err(_) => None,
    };

    let json_logs = std::env::var("EVENTSHEET_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "eventsheet=debug,tower_http=debug".into()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => run_server(cfg, port, in_memory).await,
        Some(cli::Commands::Health) => run_health(cfg).await,
        None => run_server(cfg, None, false).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn build_store(cfg: &Config, in_memory: bool) -> anyhow::Result<SharedStore> {
    if in_memory {
        if cfg.environment.is_production() {
            anyhow::bail!("--in-memory is not allowed in production");
        }
        tracing::warn!("using in-memory row store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::with_default_sheets()));
    }

    if !cfg.sheets_configured() {
        tracing::warn!("spreadsheet credentials incomplete; store calls will fail with NOT_CONFIGURED");
    }
    let tokens = TokenProvider::new(Arc::new(TokenCache::new()))?;
    Ok(Arc::new(SheetsClient::from_config(cfg, tokens)?))
}

async fn run_server(cfg: Config, port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    let store = build_store(&cfg, in_memory)?;
    tracing::info!(
        environment = cfg.environment.as_str(),
        brands = ?cfg.brands,
        "starting eventsheet"
    );

    let state = Arc::new(AppState::new(cfg, store));
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("eventsheet listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}

async fn run_health(cfg: Config) -> anyhow::Result<()> {
    let store = build_store(&cfg, false)?;
    let status = store.health_check().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.connected {
        anyhow::bail!("spreadsheet is not reachable");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
