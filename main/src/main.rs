use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::{
        content::ContentStore, db::SurrealDbClient, store::StorageManager,
        types::system_settings::SystemSettings,
    },
    utils::{
        config::{get_config, EmbeddingProviderKind},
        settings_cache::SettingsCache,
    },
};
use connector_runtime::{ConnectorRegistry, SyncCoordinator};
use embedding_pipeline::{
    providers::{OpenAiBatchBridge, RemoteBatchProvider},
    run_accumulation_loop, run_monitor_loop, BatchOrchestrator, BatchTuning,
    EmbeddingJobProvider,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config; a missing required value (notably http_port) fails here,
    // before any loop starts.
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    // Reflect the configured embedding/chunking values onto the settings row
    let settings = SystemSettings::sync_from_config(&db, &config).await?;
    info!(
        model = %settings.embedding_model,
        dimensions = settings.embedding_dimensions,
        "System settings synced"
    );

    // Create global storage manager and the dual-backend content store
    let storage = StorageManager::new(&config).await?;
    let content = ContentStore::new(db.clone(), storage.clone(), config.content_backend.clone());

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let provider: Arc<dyn EmbeddingJobProvider> = match config.embedding_provider {
        EmbeddingProviderKind::Openai => Arc::new(OpenAiBatchBridge::new(
            openai_client,
            storage.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )),
        EmbeddingProviderKind::RemoteBatch => {
            let base_url = config
                .batch_api_url
                .as_deref()
                .ok_or("batch_api_url is required for the remote_batch provider")?;
            Arc::new(RemoteBatchProvider::new(
                base_url,
                config.batch_api_key.as_deref().unwrap_or_default(),
                &config.embedding_model,
            )?)
        }
    };
    info!(
        provider = provider.provider_id(),
        model = provider.model_name(),
        "Embedding provider initialized"
    );

    // Connectors are separate deliverables registered at startup; an empty
    // registry still serves sync status and the embedding pipeline.
    let registry = ConnectorRegistry::new();
    if registry.is_empty() {
        warn!("no source connectors registered; sync requests will be rejected");
    }

    let coordinator = Arc::new(SyncCoordinator::new(db.clone(), content.clone(), registry));

    let orchestrator = Arc::new(BatchOrchestrator::new(
        db.clone(),
        storage,
        content,
        provider,
        Arc::new(SettingsCache::new()),
        BatchTuning::from_config(&config),
    ));

    if config.enable_embedding_batch_inference {
        info!("Starting embedding batch orchestrator loops");
        tokio::spawn(run_accumulation_loop(orchestrator.clone()));
        tokio::spawn(run_monitor_loop(orchestrator));
    } else {
        warn!("Embedding batch inference is disabled");
    }

    let api_state = ApiState::new(db, config.clone(), coordinator);
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received; stopping");
        }
    }

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
