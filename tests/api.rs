//! Router tests against a fake generator, driven without a socket.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Local;
use http_body_util::BodyExt;
use tower::ServiceExt;

use planner_llm::api::create_router;
use planner_llm::llm::{GenerationOptions, LlmError, TextGenerator};
use planner_llm::recommendations::{Recommendation, RecommendationStore};
use planner_llm::AppState;

/// Echoes the prompt and remembers the options it was called with.
#[derive(Default)]
struct EchoGenerator {
    calls: Mutex<Vec<(String, GenerationOptions)>>,
    defaults: GenerationOptions,
    error: Option<fn() -> LlmError>,
}

impl TextGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo-model"
    }

    fn default_options(&self) -> GenerationOptions {
        self.defaults
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let continuation = self.generate_continuation(prompt, options)?;
        Ok(format!("{prompt}{continuation}"))
    }

    fn generate_continuation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), *options));
        match self.error {
            Some(error) => Err(error()),
            None => Ok(" and then some".to_string()),
        }
    }
}

fn app(generator: Arc<EchoGenerator>, store: RecommendationStore) -> axum::Router {
    create_router(Arc::new(AppState::new(generator, store, 50, 256)))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn generate_returns_response_field() {
    let generator = Arc::new(EchoGenerator::default());
    let response = app(generator.clone(), RecommendationStore::default())
        .oneshot(post_json("/generate", r#"{"prompt": "Tell me a joke."}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["response"], "Tell me a joke. and then some");

    let calls = generator.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.max_length, 50);
    assert_eq!(calls[0].1.temperature, None);
    assert_eq!(calls[0].1.top_p, None);
    assert_eq!(calls[0].1.seed, 42);
}

#[tokio::test]
async fn checkpoint_defaults_apply_unless_overridden() {
    let generator = Arc::new(EchoGenerator {
        defaults: GenerationOptions {
            temperature: Some(0.6),
            top_p: Some(0.9),
            ..Default::default()
        },
        ..Default::default()
    });
    let router = app(generator.clone(), RecommendationStore::default());

    router
        .clone()
        .oneshot(post_json("/generate", r#"{"prompt": "hi"}"#))
        .await
        .unwrap();
    router
        .oneshot(post_json(
            "/generate",
            r#"{"prompt": "hi", "temperature": 0, "top_p": 0.5}"#,
        ))
        .await
        .unwrap();

    let calls = generator.calls.lock().unwrap();
    assert_eq!(calls[0].1.temperature, Some(0.6));
    assert_eq!(calls[0].1.top_p, Some(0.9));
    assert_eq!(calls[0].1.max_length, 50);
    assert_eq!(calls[1].1.temperature, Some(0.0));
    assert_eq!(calls[1].1.top_p, Some(0.5));
}

#[tokio::test]
async fn overlong_prompt_is_unprocessable() {
    let generator = Arc::new(EchoGenerator {
        error: Some(|| LlmError::PromptTooLong {
            tokens: 5000,
            limit: 4096,
        }),
        ..Default::default()
    });
    let response = app(generator, RecommendationStore::default())
        .oneshot(post_json("/generate", r#"{"prompt": "hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Prompt too long");
}

#[tokio::test]
async fn missing_prompt_is_empty_string() {
    let generator = Arc::new(EchoGenerator::default());
    let response = app(generator.clone(), RecommendationStore::default())
        .oneshot(post_json("/generate", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(generator.calls.lock().unwrap()[0].0, "");
}

#[tokio::test]
async fn sampling_options_are_forwarded_and_clamped() {
    let generator = Arc::new(EchoGenerator::default());
    let router = app(generator.clone(), RecommendationStore::default());

    router
        .clone()
        .oneshot(post_json(
            "/generate",
            r#"{"prompt": "hi", "max_length": 100000, "temperature": 0.7, "seed": 9}"#,
        ))
        .await
        .unwrap();
    router
        .oneshot(post_json("/generate", r#"{"prompt": "hi", "max_length": 0}"#))
        .await
        .unwrap();

    let calls = generator.calls.lock().unwrap();
    assert_eq!(calls[0].1.max_length, 256);
    assert_eq!(calls[0].1.temperature, Some(0.7));
    assert_eq!(calls[0].1.seed, 9);
    assert_eq!(calls[1].1.max_length, 1);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let generator = Arc::new(EchoGenerator::default());
    let response = app(generator.clone(), RecommendationStore::default())
        .oneshot(post_json("/generate", r#"{"prompt": "#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid request body");
    assert!(generator.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn wrong_content_type_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .body(Body::from(r#"{"prompt": "hi"}"#))
        .unwrap();

    let response = app(Arc::new(EchoGenerator::default()), RecommendationStore::default())
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn generation_failure_is_a_server_error() {
    let generator = Arc::new(EchoGenerator {
        error: Some(|| LlmError::Tokenizer("vocabulary exploded".to_string())),
        ..Default::default()
    });
    let response = app(generator, RecommendationStore::default())
        .oneshot(post_json("/generate", r#"{"prompt": "hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Generation failed");
    assert!(body["details"].as_str().unwrap().contains("vocabulary exploded"));
}

#[tokio::test]
async fn health_reports_model_name() {
    let response = app(Arc::new(EchoGenerator::default()), RecommendationStore::default())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "echo-model");
}

#[tokio::test]
async fn recommendations_404_until_published() {
    let store = RecommendationStore::default();
    let router = app(Arc::new(EchoGenerator::default()), store.clone());

    let response = router
        .clone()
        .oneshot(Request::get("/recommendations").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    store
        .publish(Recommendation {
            generated_at: Local::now(),
            task_count: 3,
            text: "Finish the report first.".to_string(),
        })
        .await;

    let response = router
        .oneshot(Request::get("/recommendations").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["task_count"], 3);
    assert_eq!(body["recommendation"], "Finish the report first.");
}
