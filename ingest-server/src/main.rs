//! FlowSense Ingest Server
//!
//! HTTP / WebSocket front for the flow classification pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    FLOWSENSE INGEST                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  POST /api/v1/flows ──► FlowPipeline (flowsense-core)        │
//! │                          infer → tier → stats → broadcast    │
//! │                                              │               │
//! │  GET /api/v1/stats  ◄── StatsAggregator      ▼               │
//! │  GET /ws/flows      ◄────────────── BroadcastRouter          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A 202 from `/api/v1/flows` means the flow was accepted for processing.
//! Classification, counting and publishing happen afterwards.

mod config;
mod error;
mod extract;
mod handlers;
mod models;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use flowsense_core::logic::model::load_onnx_replicas;
use flowsense_core::FlowPipeline;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging (core-service logs through `log`, bridged here)
    let json_logs = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "flowsense_server=debug,flowsense_core=info,tower_http=debug".into()))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let config = config::Config::from_env();

    tracing::info!("FlowSense ingest server starting ({})", config.environment);
    tracing::info!("Model: {}", config.pipeline.model.model_path);

    // Model loading retries with a fixed backoff; exhausting it is fatal
    let model_config = config.pipeline.model.clone();
    let replicas = tokio::task::spawn_blocking(move || load_onnx_replicas(&model_config))
        .await
        .context("model loader task failed")?
        .context("failed to load flow classification model")?;

    let pipeline = FlowPipeline::from_config(replicas, &config.pipeline)
        .context("failed to start classification pipeline")?;

    let state = AppState {
        pipeline,
        config: Arc::new(config),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = create_router(state);

    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: FlowPipeline,
    pub config: Arc<config::Config>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Ingestion
        .route("/api/v1/flows", post(handlers::flows::ingest))
        .route("/api/v1/dns", post(handlers::dns::observe))

        // Monitoring
        .route("/api/v1/stats", get(handlers::stats::get))
        .route("/api/v1/engine", get(handlers::engine::status))

        // QoS controller helpers
        .route("/api/v1/meters/decode/:external", get(handlers::meters::decode))
        .route("/api/v1/meters/encode/:internal", get(handlers::meters::encode));

    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/ws/flows", get(handlers::ws::flows))
        .merge(api_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use flowsense_core::logic::features::LABEL_COUNT;
    use flowsense_core::logic::model::ModelConfig;
    use flowsense_core::{FlowModel, FlowRequest, FlowSample, FlowContext, InferenceError, PipelineConfig, TrafficLabel};
    use ndarray::Array3;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct StubModel;

    impl FlowModel for StubModel {
        fn run(&mut self, _input: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
            let mut out = vec![0.01; LABEL_COUNT];
            out[TrafficLabel::Streaming.index()] = 0.9;
            Ok(out)
        }
    }

    fn state() -> AppState {
        let pipeline_config = PipelineConfig {
            model: ModelConfig {
                packets: 2,
                bytes: 3,
                workers: 1,
                timeout_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = FlowPipeline::from_config(vec![Box::new(StubModel)], &pipeline_config).unwrap();

        AppState {
            pipeline,
            config: Arc::new(config::Config {
                port: 0,
                environment: "test".to_string(),
                pipeline: pipeline_config,
            }),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(create_router(state()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
    }

    #[tokio::test]
    async fn test_ingest_accepted() {
        let request = post_json(
            "/api/v1/flows",
            json!({ "flow_id": "f-1", "sample": [[1, 2, 3], [4, 5, 6]] }),
        );
        let (status, body) = send(create_router(state()), request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);
        assert_eq!(body["flow_id"], "f-1");
    }

    #[tokio::test]
    async fn test_ingest_wrong_shape_rejected() {
        let request = post_json(
            "/api/v1/flows",
            json!({ "flow_id": "f-2", "sample": [1, 2, 3] }),
        );
        let (status, body) = send(create_router(state()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_ingest_malformed_body() {
        let request = post_json(
            "/api/v1/flows",
            json!({ "flow_id": "f-4", "sample": [["a", "b", "c"], ["d", "e", "f"]] }),
        );
        let (status, body) = send(create_router(state()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert!(body["error"].is_string());

        let no_json = Request::builder()
            .method("POST")
            .uri("/api/v1/dns")
            .body(Body::from("hostname=x"))
            .unwrap();
        let (status, body) = send(create_router(state()), no_json).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_ingest_validation() {
        let request = post_json(
            "/api/v1/flows",
            json!({ "flow_id": "", "sample": [1, 2, 3, 4, 5, 6] }),
        );
        let (status, _) = send(create_router(state()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_after_processing() {
        let state = state();
        let result = state
            .pipeline
            .process(FlowRequest {
                flow_id: "f-3".to_string(),
                sample: FlowSample::Flat(vec![7.0; 6]),
                context: FlowContext::default(),
            })
            .await
            .unwrap();
        assert_eq!(result.label, TrafficLabel::Streaming);

        let (status, body) = send(create_router(state), get("/api/v1/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["highConfidence"], 1);
        assert_eq!(body["predictionLatencies"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_status() {
        let (status, body) = send(create_router(state()), get("/api/v1/engine")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_object());
    }

    #[test]
    fn test_meter_routes() {
        tokio_test::block_on(async {
            let app = create_router(state());

            let (status, body) = send(app.clone(), get("/api/v1/meters/decode/1a")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["internal"], 26);

            let (status, body) = send(app.clone(), get("/api/v1/meters/encode/26")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["external"], "1a");

            let (status, _) = send(app, get("/api/v1/meters/decode/zz")).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        });
    }

    #[tokio::test]
    async fn test_dns_observation() {
        let state = state();
        let request = post_json(
            "/api/v1/dns",
            json!({ "hostname": "Video.Example.com.", "addresses": ["203.0.113.7", "2001:db8::1"] }),
        );
        let (status, body) = send(create_router(state.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], 2);
        assert_eq!(body["dropped"], 0);

        let ip = "203.0.113.7".parse().unwrap();
        assert_eq!(state.pipeline.dns_cache().get(&ip).as_deref(), Some("video.example.com"));
    }
}
