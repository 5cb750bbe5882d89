//! Runs the daily recommendations job on its own, without the HTTP server.

use std::sync::Arc;

use anyhow::Context;

use planner_llm::config::Settings;
use planner_llm::llm::{LlamaGenerator, TextGenerator};
use planner_llm::recommendations::{RecommendationJob, RecommendationStore};
use planner_llm::scheduler::Scheduler;
use planner_llm::shutdown::shutdown_signal;
use planner_llm::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading configuration")?;
    init_tracing(&settings.log_level);

    // The model is only needed when there are tasks to read.
    let generator: Option<Arc<dyn TextGenerator>> = match &settings.scheduler.tasks_file {
        Some(_) => {
            let model_settings = settings.model.clone();
            let generator =
                tokio::task::spawn_blocking(move || LlamaGenerator::load(&model_settings))
                    .await
                    .context("model loading task panicked")?
                    .context("loading model")?;
            Some(Arc::new(generator))
        }
        None => None,
    };

    let job = RecommendationJob::new(
        generator,
        settings.scheduler.tasks_file.clone(),
        RecommendationStore::default(),
        settings.model.max_length_limit,
    );

    let mut scheduler = Scheduler::new();
    scheduler.every_day_at(settings.scheduler.run_at, Arc::new(job));

    scheduler
        .run_until(settings.scheduler.poll_interval, shutdown_signal())
        .await;

    Ok(())
}
