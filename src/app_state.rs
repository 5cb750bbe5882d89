use std::sync::Arc;

use crate::llm::TextGenerator;
use crate::recommendations::RecommendationStore;

pub struct AppState {
    pub generator: Arc<dyn TextGenerator>,
    pub recommendations: RecommendationStore,
    /// Used when a request does not set `max_length`.
    pub default_max_length: usize,
    pub max_length_limit: usize,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        recommendations: RecommendationStore,
        default_max_length: usize,
        max_length_limit: usize,
    ) -> Self {
        Self {
            generator,
            recommendations,
            default_max_length,
            max_length_limit,
        }
    }
}
