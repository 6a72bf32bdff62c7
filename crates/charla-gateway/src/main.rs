use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use charla_agent::{AgentDeps, Outbound};
use charla_core::config::CharlaConfig;
use charla_core::tracker::TaskTracker;
use charla_llm::ollama::OllamaProvider;
use charla_llm::LlmProvider;
use charla_scheduler::{Schedule, SchedulerEngine};
use charla_store::Store;

mod app;
mod http;
mod rate;
mod send;

#[derive(Parser)]
#[command(name = "charla", about = "Single-user WhatsApp assistant")]
struct Args {
    /// Path to charla.toml (default: ~/.charla/charla.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charla=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = CharlaConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        CharlaConfig::default()
    });

    // Persistence init is the one hard-fail: no store, no assistant.
    let store = Arc::new(Store::open(&config.db_path()).context("opening the store")?);
    match store.cleanup_traces_older_than(config.trace.retention_days) {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "expired traces cleaned up"),
        Err(e) => warn!(error = %e, "trace cleanup failed"),
    }

    let provider: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(
        config.llm.base_url.clone(),
        config.llm.embed_model.clone(),
    ));
    let outbound: Arc<dyn Outbound> = Arc::new(send::WhatsAppClient::new(&config.whatsapp));

    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel(64);
    let (engine, scheduler) = SchedulerEngine::new(fired_tx);
    let tracker = TaskTracker::new();

    let shutdown_timeout = Duration::from_secs(config.gateway.shutdown_timeout_secs);
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let deps = AgentDeps::new(
        config,
        Arc::clone(&store),
        provider,
        Arc::clone(&outbound),
        scheduler.clone(),
        tracker.clone(),
    )
    .map_err(|e| anyhow::anyhow!("dependency wiring failed: {e}"))?;

    // Re-register durable crons verbatim; next runs are computed from now, so
    // firings missed while the process was down are not retried.
    for cron in store.list_active_crons().unwrap_or_default() {
        let schedule = Schedule::Cron {
            expression: cron.expression.clone(),
            timezone: cron.timezone.clone(),
        };
        if let Err(e) = scheduler.register(&cron.id, &cron.principal, &cron.message, schedule) {
            warn!(cron = %cron.id, error = %e, "cron re-registration failed");
        }
    }

    let state = Arc::new(app::AppState::new(Arc::clone(&deps)));

    // Scheduler engine + fired-job delivery (same egress path and rate limit
    // as user replies).
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx));
    {
        let outbound = Arc::clone(&outbound);
        let deps = Arc::clone(&deps);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(job) = fired_rx.recv().await {
                if !state.limiter.accepted(&job.principal) {
                    warn!(job = %job.id, "reminder rate limited, dropped");
                    continue;
                }
                info!(job = %job.id, "reminder fired");
                if let Err(e) = outbound
                    .send_message(&job.principal, &format!("⏰ {}", job.message))
                    .await
                {
                    warn!(error = %e, "reminder delivery failed");
                }
                // One-shots vanish from the engine on their own; durable rows
                // for exhausted jobs go inactive.
                if deps.scheduler.list().iter().all(|j| j.id != job.id) {
                    let _ = deps.store.deactivate_cron(&job.id);
                }
            }
        });
    }

    // Startup maintenance: embedding backfill and mirror convergence.
    {
        let deps = Arc::clone(&deps);
        tracker.spawn("startup_backfill", async move {
            deps.indexer.backfill().await;
            if deps.config.memory.memory_file_watch_enabled {
                deps.mirror.sync_from_file();
            }
            deps.mirror.flush();
        });
    }

    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("charla gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Drain: stop the scheduler, then wait for in-flight work up to the deadline.
    let _ = shutdown_tx.send(true);
    let cut = tracker.shutdown(shutdown_timeout).await;
    if cut > 0 {
        warn!(cut, "background tasks cancelled at shutdown deadline");
    }
    info!("goodbye");
    Ok(())
}
