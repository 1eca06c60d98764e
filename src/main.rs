use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use repair_sms::billing::CostCalculator;
use repair_sms::config::AppConfig;
use repair_sms::notify::Notifier;
use repair_sms::pipeline::InboundProcessor;
use repair_sms::sms::{SignatureValidator, SmsSender, TwilioClient};
use repair_sms::store::{LibSqlBackend, ShopStore};
use repair_sms::webhook::{AppState, app_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.server.log_dir.as_deref());

    eprintln!("📱 Repair SMS v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Shop: {}", config.shop.name);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = &config.server.db_path;
    let store: Arc<dyn ShopStore> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Provider ─────────────────────────────────────────────────────────
    if config.webhook.webhook_url.is_none() || config.webhook.auth_token.is_none() {
        eprintln!("   Warning: SMS_WEBHOOK_URL or TWILIO_AUTH_TOKEN not set, webhooks will be rejected");
    }
    let validator = SignatureValidator::new(
        config.webhook.auth_token.clone(),
        config.webhook.webhook_url.clone(),
    );

    let sender: Option<Arc<dyn SmsSender>> = config
        .twilio
        .clone()
        .map(|twilio| Arc::new(TwilioClient::new(twilio)) as Arc<dyn SmsSender>);
    match &sender {
        Some(s) => eprintln!("   Outbound SMS: from {}", s.from_number()),
        None => eprintln!("   Outbound SMS: disabled"),
    }
    let notifier = sender.map(|sender| {
        Arc::new(Notifier::new(
            Arc::clone(&store),
            sender,
            CostCalculator::new(config.shop.cost_rules),
            config.shop.name.clone(),
        ))
    });

    // ── HTTP server ─────────────────────────────────────────────────────
    let state = AppState {
        processor: Arc::new(InboundProcessor::new(
            Arc::clone(&store),
            config.shop.name.clone(),
        )),
        validator: Arc::new(validator),
        notifier,
    };
    let app = app_router(state, config.server.notify_api);
    if config.server.notify_api {
        eprintln!("   Notify API: enabled");
    }

    let addr = config.server.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    eprintln!("   Webhook: http://{addr}/sms/webhook\n");
    tracing::info!(%addr, "SMS webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("SMS webhook server stopped");
    Ok(())
}

/// Console logging, plus a daily-rolling file when a log directory is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "repair-sms.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
