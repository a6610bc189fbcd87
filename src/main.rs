use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;

use inbox_engine::api::status_routes;
use inbox_engine::config::{InboxConfig, ServiceConfig};
use inbox_engine::inbox::Inbox;
use inbox_engine::intelligence::{ApproxTokenCounter, RemoteIntelligence};
use inbox_engine::pipeline::PipelineDeps;
use inbox_engine::store::{FileStore, LocalFileStore};
use inbox_engine::watcher::spawn_inbox_watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = ServiceConfig::from_env().context("invalid service configuration")?;
    let _log_guard = init_tracing(&service);

    let config = InboxConfig::from_env().context("invalid inbox configuration")?;

    eprintln!("📥 Inbox Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Vault: {}", service.vault_path.display());
    eprintln!("   Inbox: {}", config.folders.inbox);
    eprintln!("   Server: {}", service.server_url);
    eprintln!(
        "   Concurrency: {} ({} media), timeout {}s",
        config.concurrency,
        config.media_concurrency,
        config.task_timeout.as_secs()
    );
    eprintln!("   Status API: http://0.0.0.0:{}/api/inbox/analytics", service.http_port);
    eprintln!("   Status WS: ws://0.0.0.0:{}/ws\n", service.http_port);

    // ── Collaborators ───────────────────────────────────────────────────
    let store: Arc<dyn FileStore> = Arc::new(
        LocalFileStore::new(&service.vault_path).context("cannot open vault")?,
    );
    store
        .ensure_folder(&config.folders.inbox)
        .await
        .context("cannot create inbox folder")?;

    let deps = PipelineDeps {
        store: Arc::clone(&store),
        intelligence: Arc::new(
            RemoteIntelligence::new(
                service.server_url.clone(),
                service.api_key.clone(),
                service.request_timeout,
            )
            .context("cannot build HTTP client")?,
        ),
        tokens: Arc::new(ApproxTokenCounter),
    };

    // ── Inbox ───────────────────────────────────────────────────────────
    let inbox_folder = config.folders.inbox.clone();
    let inbox = Inbox::initialize(config, deps).context("invalid inbox configuration")?;

    let (watcher, watcher_shutdown) = spawn_inbox_watcher(
        inbox.clone(),
        Arc::clone(&store),
        inbox_folder,
        service.watch_interval,
    );

    // ── Status server ───────────────────────────────────────────────────
    let app = status_routes(inbox.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", service.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", service.http_port))?;
    tracing::info!(port = service.http_port, "Status server started");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Status server stopped");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutting down");

    watcher_shutdown.store(true, Ordering::Relaxed);
    watcher.abort();
    server.abort();
    inbox.teardown().await;
    Ok(())
}

/// Log to a daily rolling file when a log dir is configured, stdout otherwise.
fn init_tracing(service: &ServiceConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &service.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
