use std::sync::Arc;

use feed_curator::config::AppConfig;
use feed_curator::error::Result;
use feed_curator::pipeline::processor::SelectionPipeline;
use feed_curator::platform::TwitterClient;
use feed_curator::store::{HistoryStore, LibSqlBackend};
use feed_curator::triggers::{TriggerState, scheduler, trigger_routes};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TWITTER_USER_TOKEN=...");
        std::process::exit(1);
    });

    // Initialize tracing: stderr plus a daily-rolling file
    std::fs::create_dir_all(&config.server.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.server.log_dir, "feed-curator.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("📰 Feed Curator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Lookback: {}h", config.curator.lookback_hours);
    eprintln!("   Min shares: {}", config.curator.min_shares);
    eprintln!(
        "   Watchlist: {} keywords, {} exclusions",
        config.curator.search_keywords.len(),
        config.curator.exclusion_keywords.len()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = &config.server.db_path;
    let history: Arc<dyn HistoryStore> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path.display(), e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Platform + pipeline ──────────────────────────────────────────────
    let platform = Arc::new(TwitterClient::new(&config.platform)?);
    eprintln!("   API: {}", config.platform.api_base);

    let pipeline = Arc::new(SelectionPipeline::new(
        config.curator.clone(),
        platform,
        Arc::clone(&history),
    ));

    // ── Schedules ────────────────────────────────────────────────────────
    let schedule_handles = scheduler::spawn_schedulers(Arc::clone(&pipeline), &config.schedule)?;
    if config.schedule.is_empty() {
        eprintln!("   Schedules: none (HTTP triggers only)");
    } else {
        eprintln!("   Schedules: {} active", schedule_handles.len());
    }

    // ── Trigger server ───────────────────────────────────────────────────
    let app = trigger_routes(TriggerState { pipeline, history });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    eprintln!("   Triggers: http://0.0.0.0:{}/{{timeline,trend,search}}\n", config.server.port);
    tracing::info!(port = config.server.port, "Trigger server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
