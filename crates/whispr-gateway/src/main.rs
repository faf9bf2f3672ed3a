use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use whispr_core::{config::WhisprConfig, config::REMINDER_QUEUE, Notifier};
use whispr_extract::{Extractor, FallbackExtractor, GeminiExtractor};
use whispr_queue::{DelayQueue, EngineConfig, QueueEngine};
use whispr_reminders::{
    Reconciler, ReminderScheduler, ReminderStore, ReminderWorker, SchedulerSettings, UserStore,
};
use whispr_whatsapp::{LogSender, TwilioSender};

mod app;
mod http;
mod pipeline;

#[derive(Debug, Parser)]
#[command(name = "whispr-gateway", version, about = "WhatsApp deadline reminder service")]
struct Cli {
    /// Path to whispr.toml (default: ~/.whispr/whispr.toml).
    #[arg(long, env = "WHISPR_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "whispr_gateway=info,whispr_reminders=info,whispr_queue=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = WhisprConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        WhisprConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let conn = Arc::new(Mutex::new(db));

    // stores run their migrations on construction
    let queue = DelayQueue::new(conn.clone())?;
    let reminders = Arc::new(ReminderStore::new(conn.clone())?);
    let users = Arc::new(UserStore::new(conn)?);
    info!("database migrations complete");

    let notifier: Arc<dyn Notifier> = match config.twilio {
        Some(ref twilio) => {
            info!(from = %twilio.from_number, "WhatsApp delivery via Twilio");
            Arc::new(TwilioSender::new(twilio)?)
        }
        None => {
            warn!("No [twilio] section configured; outbound messages are only logged");
            Arc::new(LogSender)
        }
    };
    let extractor: Arc<dyn Extractor> = match config.gemini {
        Some(ref gemini) => {
            info!(model = %gemini.model, "extraction via Gemini");
            Arc::new(GeminiExtractor::new(gemini))
        }
        None => {
            warn!("No [gemini] section configured; using fallback extraction");
            Arc::new(FallbackExtractor)
        }
    };

    let scheduler = Arc::new(ReminderScheduler::new(
        queue.clone(),
        reminders.clone(),
        SchedulerSettings::from(&config.scheduler),
    ));
    let worker = ReminderWorker::new(
        reminders.clone(),
        users.clone(),
        notifier.clone(),
        Duration::from_secs(config.worker.send_timeout_secs),
    );
    let engine = QueueEngine::new(
        queue.clone(),
        REMINDER_QUEUE,
        Arc::new(worker),
        EngineConfig {
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            concurrency: config.queue.concurrency,
        },
    );
    let reconciler = Reconciler::new(
        reminders.clone(),
        users.clone(),
        scheduler.clone(),
        queue.clone(),
        Duration::from_secs(config.scheduler.reconcile_interval_secs),
    )
    .with_retention(
        config
            .queue
            .retain_finished_hours
            .and_then(|h| i64::try_from(h).ok())
            .map(chrono::Duration::hours),
    );

    let pipeline = Arc::new(pipeline::Pipeline::new(
        users,
        reminders,
        scheduler,
        extractor,
        notifier,
    ));
    let state = Arc::new(app::AppState::new(pipeline, queue));
    let router = app::build_router(state);

    // background loops stop when shutdown_tx broadcasts true
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx.clone()));
    let reconciler_task = tokio::spawn(reconciler.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    info!("Whispr gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(engine_task, reconciler_task);
    info!("Whispr gateway stopped");
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
