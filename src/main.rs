use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use contextd::channel::{Consumer, LocalChannel};
use contextd::config::Config;
use contextd::router::EnvelopeRouter;
use contextd::service::{ContextService, HistoryService};
use contextd::store::{ContextStore, PgStore};
use contextd::telemetry;

/// The business domain this instance serves.
const DOMAIN: &str = "context";

#[derive(Parser)]
#[command(name = "contextd", about = "Versioned context-document service")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    json_logs: bool,

    /// Skip running database migrations at startup.
    #[arg(long, env = "SKIP_MIGRATIONS", default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    telemetry::init(cli.json_logs);

    let store = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("connecting to database")?,
    );
    if !cli.skip_migrations {
        store.run_migrations().await.context("running migrations")?;
    }

    let history = HistoryService::new(store.clone());
    let service = ContextService::new(store.clone(), history.clone());

    let cancel = CancellationToken::new();

    // The channel consumer runs against the in-process queue backend; a real
    // broker adapter implements the same reader/writer traits out of tree.
    // The producer/response endpoints stay alive for the process lifetime so
    // the consumer doesn't see a closed channel.
    let mut channel_endpoints = None;
    let consumer_handle = if config.channel.enabled {
        let (request_tx, request_rx) = LocalChannel::new(config.channel.queue_capacity);
        let (response_tx, response_rx) = LocalChannel::new(config.channel.queue_capacity);

        let consumer = Consumer::new(
            Arc::new(request_rx),
            Arc::new(response_tx),
            EnvelopeRouter::new(DOMAIN, service.clone()),
            store.clone(),
            config.channel.fetch_backoff,
        );

        tracing::info!(
            request_topic = %config.channel.request_topic,
            response_topic = %config.channel.response_topic,
            consumer_group = %config.channel.consumer_group,
            "starting channel consumer"
        );
        channel_endpoints = Some((request_tx, response_rx));
        Some(tokio::spawn(consumer.run(cancel.clone())))
    } else {
        None
    };

    let app = contextd::http::router(service, history);
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "server listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("serving HTTP")?;

    cancel.cancel();
    if let Some(handle) = consumer_handle {
        // Give the consumer a moment to release its reader.
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    drop(channel_endpoints);
    store.close().await;
    tracing::info!("server exited");

    Ok(())
}
