use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::{Method, Request},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, info_span};

use crate::domain::{BatchApplier, EntityQueryService};
use crate::http::handlers;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub applier: Arc<BatchApplier>,
    pub queries: Arc<EntityQueryService>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(cors::Any)
        .allow_origin(cors::Any);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    Router::new()
        .route("/api/sync/", post(handlers::post_sync))
        .route("/api/beneficiaries/", get(handlers::list_beneficiaries))
        .route("/api/beneficiaries/{id}/", get(handlers::get_beneficiary))
        .route("/api/funds/", get(handlers::list_funds))
        .route("/api/funds/{id}/", get(handlers::get_fund))
        .route("/api/transactions/", get(handlers::list_transactions))
        .route("/api/transactions/{id}/", get(handlers::get_transaction))
        .route("/health", get(handlers::health))
        .layer(cors)
        .layer(trace)
        .with_state(state)
}

/// Serve the router until the token is cancelled
pub async fn run_http_server(
    config: HttpServerConfig,
    state: AppState,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let result = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
            info!("HTTP server shutdown signal received");
        })
        .await;

    match result {
        Ok(()) => {
            info!("HTTP server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("HTTP server error: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use common::memory::InMemoryCanonicalStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let store = Arc::new(InMemoryCanonicalStore::new());
        let state = AppState {
            applier: Arc::new(BatchApplier::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
            )),
            queries: Arc::new(EntityQueryService::new(
                store.clone(),
                store.clone(),
                store,
            )),
        };
        create_router(state)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_sync(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/sync/")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_is_still_200() {
        let body = json!([
            {"action": "create", "entity_type": "Fund",
             "payload": {"amount_cents": 1000, "source": "NGO"}},
            {"action": "create", "entity_type": "Transaction",
             "payload": {"fund": 1, "amount_cents": 2000, "recipient": "Kinondo"}},
            {"action": "frobnicate", "entity_type": "Fund", "payload": {}},
        ]);

        let (status, response) = send(test_router(), post_sync(body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        let results = response["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], json!("success"));
        assert_eq!(results[0]["entity"]["fields"]["id"], json!(1));
        assert_eq!(results[1]["status"], json!("error"));
        assert_eq!(results[1]["error"]["kind"], json!("validation"));
        assert_eq!(results[2]["error"]["kind"], json!("invalid_entry"));
        assert_eq!(results[2]["entry"]["action"], json!("frobnicate"));
    }

    #[tokio::test]
    async fn test_single_object_body_is_accepted() {
        let body = json!({"action": "create", "entity_type": "Beneficiary",
                          "payload": {"name": "Jane", "age": 25, "location": "Ukunda"}});

        let router = test_router();
        let (status, response) = send(router.clone(), post_sync(body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["results"][0]["status"], json!("success"));

        let list = Request::builder()
            .uri("/api/beneficiaries/")
            .body(Body::empty())
            .unwrap();
        let (status, listed) = send(router, list).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["name"], json!("Jane"));
    }

    #[tokio::test]
    async fn test_fund_detail_and_missing_fund() {
        let body = json!({"action": "create", "entity_type": "Fund",
                          "payload": {"amount_cents": 7000, "source": "County"}});
        let router = test_router();
        let (status, _) = send(router.clone(), post_sync(body.to_string())).await;
        assert_eq!(status, StatusCode::OK);

        let detail = Request::builder()
            .uri("/api/funds/1/")
            .body(Body::empty())
            .unwrap();
        let (status, fund) = send(router.clone(), detail).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fund["amount_cents"], json!(7000));

        let missing = Request::builder()
            .uri("/api/funds/99/")
            .body(Body::empty())
            .unwrap();
        let (status, error) = send(router, missing).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["status"], json!(404));
    }

    #[tokio::test]
    async fn test_non_json_body_is_400() {
        let (status, response) = send(test_router(), post_sync("action=create")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["status"], json!(400));
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(test_router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }
}
