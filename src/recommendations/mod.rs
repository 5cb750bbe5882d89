pub mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::RwLock;

use crate::llm::{GenerationOptions, TextGenerator};
use crate::scheduler::Job;

pub const JOB_NAME: &str = "update_recommendations";

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub generated_at: DateTime<Local>,
    pub task_count: usize,
    pub text: String,
}

/// Latest recommendation, kept in memory only.
#[derive(Clone, Default)]
pub struct RecommendationStore {
    latest: Arc<RwLock<Option<Recommendation>>>,
}

impl RecommendationStore {
    pub async fn latest(&self) -> Option<Recommendation> {
        self.latest.read().await.clone()
    }

    pub async fn publish(&self, recommendation: Recommendation) {
        *self.latest.write().await = Some(recommendation);
    }
}

/// Daily job that turns the calendar's tasks into a recommendation.
/// Without a generator or a tasks file it only logs.
pub struct RecommendationJob {
    generator: Option<Arc<dyn TextGenerator>>,
    tasks_file: Option<PathBuf>,
    store: RecommendationStore,
    max_length: usize,
}

impl RecommendationJob {
    /// `max_length` counts the task-list prompt, so it has to leave room for it.
    pub fn new(
        generator: Option<Arc<dyn TextGenerator>>,
        tasks_file: Option<PathBuf>,
        store: RecommendationStore,
        max_length: usize,
    ) -> Self {
        Self {
            generator,
            tasks_file,
            store,
            max_length,
        }
    }
}

#[async_trait]
impl Job for RecommendationJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Updating recommendations...");

        let (Some(generator), Some(path)) = (&self.generator, &self.tasks_file) else {
            tracing::debug!("no tasks file or generator configured, nothing to do");
            return Ok(());
        };

        let mut tasks = tasks::load_tasks(path).await?;
        if tasks.is_empty() {
            tracing::info!(path = %path.display(), "no tasks, skipping recommendation");
            return Ok(());
        }
        tasks::sort_by_urgency(&mut tasks);
        let prompt = tasks::build_prompt(&tasks);

        let generator = Arc::clone(generator);
        let options = GenerationOptions {
            max_length: self.max_length,
            ..generator.default_options()
        };
        let text = tokio::task::spawn_blocking(move || {
            generator.generate_continuation(&prompt, &options)
        })
        .await
        .context("recommendation task panicked")??;

        let text = text.trim();
        if text.is_empty() {
            tracing::warn!(task_count = tasks.len(), "model produced no recommendation");
            return Ok(());
        }

        tracing::info!(task_count = tasks.len(), "recommendation updated");
        self.store
            .publish(Recommendation {
                generated_at: Local::now(),
                task_count: tasks.len(),
                text: text.to_string(),
            })
            .await;
        Ok(())
    }
}
