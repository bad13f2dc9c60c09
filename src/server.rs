//! HTTP transport for the analysis pipeline.
//!
//! Handlers only validate input and delegate to [`Analyzer`]. Document
//! analysis runs on its own task; a panic there becomes a 500.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Returns |
//! |--------|------|------|---------|
//! | `GET`  | `/health` | | status and version |
//! | `POST` | `/analyze/document` | raw document bytes | `DocumentResult` |
//! | `POST` | `/analyze/email` | `{"email_text": "..."}` | `UnitResult` |
//! | `POST` | `/analyze/call` | `{"call_text": "..."}` | `UnitResult` |
//! | `POST` | `/analyze/economics` | `{"content": "..."}` | `SynthesisOutput` |
//! | `POST` | `/analyze/factcheck` | `{"content": "..."}` | `FactCheckReport` |
//! | `POST` | `/analyze/report` | raw document bytes | `InvestorReport` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "email_text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `payload_too_large` (413), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser front ends.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use diligence_core::orchestrator::NoObserver;
use diligence_core::{DocumentResult, FactCheckReport, TextKind, UnitResult};

use crate::config::Config;
use crate::economics::SynthesisOutput;
use crate::pipeline::{Analyzer, InvestorReport};

#[derive(Clone)]
struct AppState {
    analyzer: Arc<Analyzer>,
}

/// Starts the server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, analyzer: Analyzer) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(analyzer);

    info!(bind = %bind_addr, "diligence server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes with CORS and a body limit one byte above the document
/// limit, so oversized uploads reach the handler and get a JSON 413.
pub fn router(analyzer: Analyzer) -> Router {
    let body_limit = analyzer.max_document_bytes().saturating_add(1);
    let state = AppState {
        analyzer: Arc::new(analyzer),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/analyze/document", post(handle_document))
        .route("/analyze/email", post(handle_email))
        .route("/analyze/call", post(handle_call))
        .route("/analyze/economics", post(handle_economics))
        .route("/analyze/factcheck", post(handle_factcheck))
        .route("/analyze/report", post(handle_report))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn payload_too_large(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn check_document(state: &AppState, body: &Bytes) -> Result<(), AppError> {
    if body.is_empty() {
        return Err(bad_request("document body must not be empty"));
    }
    let limit = state.analyzer.max_document_bytes();
    if body.len() > limit {
        return Err(payload_too_large(format!(
            "document is {} bytes; the limit is {} bytes",
            body.len(),
            limit
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(bad_request(format!("{} must not be empty", field))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

async fn handle_document(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DocumentResult>, AppError> {
    check_document(&state, &body)?;
    let analyzer = state.analyzer.clone();
    let result = tokio::spawn(async move { analyzer.analyze_document(&body).await })
        .await
        .map_err(|e| internal(format!("document analysis aborted: {}", e)))?;
    Ok(Json(result))
}

async fn handle_report(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InvestorReport>, AppError> {
    check_document(&state, &body)?;
    let analyzer = state.analyzer.clone();
    let report = tokio::spawn(async move { analyzer.full_report(&body, &NoObserver).await })
        .await
        .map_err(|e| internal(format!("report generation aborted: {}", e)))?;
    Ok(Json(report))
}

// ============ Text ============

#[derive(Deserialize)]
struct EmailRequest {
    email_text: Option<String>,
}

#[derive(Deserialize)]
struct CallRequest {
    call_text: Option<String>,
}

#[derive(Deserialize)]
struct ContentRequest {
    content: Option<String>,
}

async fn handle_email(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<UnitResult>, AppError> {
    let text = require_text("email_text", req.email_text)?;
    Ok(Json(state.analyzer.analyze_text(&text, TextKind::Email).await))
}

async fn handle_call(
    State(state): State<AppState>,
    Json(req): Json<CallRequest>,
) -> Result<Json<UnitResult>, AppError> {
    let text = require_text("call_text", req.call_text)?;
    Ok(Json(
        state
            .analyzer
            .analyze_text(&text, TextKind::CallTranscript)
            .await,
    ))
}

async fn handle_economics(
    State(state): State<AppState>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<SynthesisOutput>, AppError> {
    let content = require_text("content", req.content)?;
    Ok(Json(state.analyzer.run_economics(&content).await))
}

async fn handle_factcheck(
    State(state): State<AppState>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<FactCheckReport>, AppError> {
    let content = require_text("content", req.content)?;
    Ok(Json(state.analyzer.verify(&content).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::DisabledClient;
    use crate::raster::NoRasterizer;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(max_document_bytes: usize) -> Router {
        let mut config = Config::minimal();
        config.pipeline.max_document_bytes = max_document_bytes;
        router(Analyzer::new(
            &config,
            Arc::new(DisabledClient),
            Arc::new(NoRasterizer),
        ))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn empty_email_is_bad_request() {
        let (status, body) = send(app(1024), json_post("/analyze/email", r#"{"email_text": " "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn oversized_document_is_payload_too_large() {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze/document")
            .body(Body::from(vec![b'x'; 17]))
            .unwrap();
        let (status, body) = send(app(16), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn factcheck_returns_a_verdict() {
        let (status, body) = send(
            app(1024),
            json_post(
                "/analyze/factcheck",
                r#"{"content": "$500K cash, $100K/month burn, 16 months runway"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verdict"], "high_risk");
    }

    #[tokio::test]
    async fn unreadable_document_returns_failed_result() {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze/document")
            .body(Body::from("not a document"))
            .unwrap();
        let (status, body) = send(app(1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["total_units"], 0);
    }

    #[tokio::test]
    async fn unreadable_report_skips_downstream_analysis() {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze/report")
            .body(Body::from("not a document"))
            .unwrap();
        let (status, body) = send(app(1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document"]["status"], "failed");
        assert!(body["economics"].is_null());
        assert!(body["fact_check"].is_null());
    }
}
