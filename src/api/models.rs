use serde::{Deserialize, Serialize};

use crate::recommendations::Recommendation;

/// Body of `POST /generate`. A missing `prompt` is the empty prompt.
#[derive(Debug, Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub generated_at: String,
    pub task_count: usize,
    pub recommendation: String,
}

impl From<Recommendation> for RecommendationResponse {
    fn from(r: Recommendation) -> Self {
        Self {
            generated_at: r.generated_at.to_rfc3339(),
            task_count: r.task_count,
            recommendation: r.text,
        }
    }
}
