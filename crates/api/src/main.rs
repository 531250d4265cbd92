use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shorts_core::generation::GenerationAdapter;
use shorts_core::prompts::{PromptRegistry, PromptStrategy, TemplateStrategy};
use shorts_db::SqliteStore;
use shorts_pipeline::events::log_events;
use shorts_pipeline::{BatchOrchestrator, EventBus, PipelineConfig, ProjectService};
use shorts_providers::config::{GenerationProvider, PromptProvider};
use shorts_providers::{ArtifactStore, LlmPromptStrategy, MinimaxAdapter, PlaceholderAdapter, ProviderConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use shorts_api::config::ServerConfig;
use shorts_api::router::build_app_router;
use shorts_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let pipeline_config = PipelineConfig::from_env().expect("Invalid batch configuration");
    let provider_config = ProviderConfig::from_env().expect("Invalid provider configuration");

    // --- Tracing ---
    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shorts_api=debug,shorts_pipeline=debug,shorts_providers=info,tower_http=debug".into()
            }),
        )
        .with(fmt_layer)
        .init();

    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        concurrency = pipeline_config.concurrency,
        max_retries = pipeline_config.retry.max_retries,
        adapter_timeout_secs = pipeline_config.adapter_timeout.as_secs(),
        "Loaded batch configuration",
    );

    // --- Database ---
    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        std::fs::create_dir_all(&dir).expect("Failed to create database directory");
    }
    let pool = shorts_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to open database");
    tracing::info!("Database connection pool created");

    shorts_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    shorts_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(SqliteStore::new(pool.clone()));

    // --- Artifacts ---
    let artifacts = Arc::new(ArtifactStore::new(&config.artifact_dir));
    tracing::info!(dir = %config.artifact_dir.display(), "Artifact store ready");

    // --- Providers ---
    let adapter: Arc<dyn GenerationAdapter> = match (&provider_config.generation, &provider_config.minimax) {
        (GenerationProvider::Minimax, Some(minimax)) => {
            tracing::info!(image_model = %minimax.image_model, video_model = %minimax.video_model, "Using Minimax generation");
            if minimax.poll_budget() >= pipeline_config.adapter_timeout {
                tracing::warn!(
                    poll_budget_secs = minimax.poll_budget().as_secs(),
                    adapter_timeout_secs = pipeline_config.adapter_timeout.as_secs(),
                    "Minimax poll budget exceeds the adapter timeout, slow tasks will be cut off by the timeout",
                );
            }
            Arc::new(MinimaxAdapter::new(minimax.clone(), Arc::clone(&artifacts)))
        }
        _ => {
            tracing::warn!("Using placeholder generation, no artifacts will be produced");
            Arc::new(PlaceholderAdapter::new())
        }
    };

    let mut prompts = PromptRegistry::new();
    for template in TemplateStrategy::all() {
        let template: Arc<dyn PromptStrategy> = Arc::new(template);
        match (&provider_config.prompts, &provider_config.openai) {
            (PromptProvider::OpenAi, Some(openai)) => {
                prompts.register(Arc::new(LlmPromptStrategy::new(openai.clone(), template)));
            }
            _ => prompts.register(template),
        }
    }
    tracing::info!(content_types = ?prompts.content_types(), "Prompt strategies registered");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let event_log_handle = tokio::spawn(log_events(event_bus.subscribe()));

    // --- Service ---
    let orchestrator = BatchOrchestrator::new(store.clone(), adapter, &pipeline_config)
        .with_events(Arc::clone(&event_bus));
    let service = ProjectService::new(
        store.clone(),
        store,
        Arc::new(prompts),
        Arc::new(orchestrator),
        artifacts,
        pipeline_config.concurrency,
    );

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        service: Arc::new(service),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Dropping the bus closes the channel and stops the logger.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), event_log_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Directory holding a file-backed SQLite database, if any.
fn sqlite_parent_dir(url: &str) -> Option<std::path::PathBuf> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
