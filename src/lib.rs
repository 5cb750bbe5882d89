pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod llm;
pub mod recommendations;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

pub use app_state::AppState;
