use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use planner_llm::api::create_router;
use planner_llm::config::Settings;
use planner_llm::llm::{LlamaGenerator, TextGenerator};
use planner_llm::recommendations::{RecommendationJob, RecommendationStore};
use planner_llm::scheduler::Scheduler;
use planner_llm::shutdown::shutdown_signal;
use planner_llm::telemetry::init_tracing;
use planner_llm::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading configuration")?;
    init_tracing(&settings.log_level);

    let model_settings = settings.model.clone();
    tracing::info!(
        model = %model_settings.name,
        revision = %model_settings.revision,
        "loading model"
    );
    let generator = tokio::task::spawn_blocking(move || LlamaGenerator::load(&model_settings))
        .await
        .context("model loading task panicked")?
        .context("loading model")?;
    let generator: Arc<dyn TextGenerator> = Arc::new(generator);

    let store = RecommendationStore::default();

    let scheduler = if settings.scheduler.enabled {
        let job = RecommendationJob::new(
            Some(Arc::clone(&generator)),
            settings.scheduler.tasks_file.clone(),
            store.clone(),
            settings.model.max_length_limit,
        );
        let mut scheduler = Scheduler::new();
        scheduler.every_day_at(settings.scheduler.run_at, Arc::new(job));
        Some(tokio::spawn(
            scheduler.run_until(settings.scheduler.poll_interval, std::future::pending()),
        ))
    } else {
        None
    };

    let state = Arc::new(AppState::new(
        generator,
        store,
        settings.model.max_length,
        settings.model.max_length_limit,
    ));
    let app = create_router(state);

    let address = settings.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    if let Some(handle) = scheduler {
        handle.abort();
    }

    Ok(())
}
