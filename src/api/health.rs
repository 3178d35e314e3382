/// Health check and metrics endpoints
///
/// `/health` reports the service and its database; `/health/ipfs` probes the
/// storage network node; `/metrics` exposes the Prometheus registry.
use crate::{context::AppContext, error::PinResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<ComponentHealth>,
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Storage network node connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsHealthResponse {
    pub connected: bool,
    pub peer_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ipfs", get(ipfs_health))
        .route("/metrics", get(metrics_handler))
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let checks = vec![check_database_detailed(&ctx).await];

    let healthy = checks.iter().all(|c| c.status == "healthy");
    let health = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.started_at.elapsed().as_secs_f64(),
        checks,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

async fn check_database(ctx: &AppContext) -> PinResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

async fn check_database_detailed(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let result = check_database(ctx).await;

    ComponentHealth {
        name: "database".to_string(),
        status: if result.is_ok() { "healthy" } else { "unhealthy" }.to_string(),
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        error: result.err().map(|e| e.to_string()),
    }
}

/// GET /health/ipfs
pub async fn ipfs_health(State(ctx): State<AppContext>) -> (StatusCode, Json<IpfsHealthResponse>) {
    match ctx.pin_service.network().node_info().await {
        Ok(info) => (
            StatusCode::OK,
            Json(IpfsHealthResponse {
                connected: true,
                peer_id: info.peer_id,
                version: info.agent_version,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Storage network health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(IpfsHealthResponse {
                    connected: false,
                    peer_id: String::new(),
                    version: String::new(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::test_support::{get, TestApp},
        config::{IpfsBackend, ServerConfig},
        db::memory_pool,
        ipfs::KuboClient,
        server::build_router,
    };
    use axum::body::{to_bytes, Body};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_database() {
        let app = TestApp::new().await;

        let (status, body) = app.send(get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"][0]["name"], "database");
    }

    #[tokio::test]
    async fn test_ipfs_health_memory_node() {
        let app = TestApp::new().await;

        let (status, body) = app.send(get("/health/ipfs", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_ipfs_health_unreachable_node() {
        let mut config = ServerConfig::for_tests();
        config.ipfs.backend = IpfsBackend::Kubo;
        config.ipfs.api_url = "http://127.0.0.1:9".to_string();
        config.ipfs.timeout_secs = 1;

        let network = Arc::new(KuboClient::new(&config.ipfs).unwrap());
        let (ctx, _receiver) = AppContext::build(config, memory_pool().await, network);

        let response = build_router(ctx)
            .oneshot(get("/health/ipfs", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: IpfsHealthResponse = serde_json::from_slice(&body).unwrap();
        assert!(!health.connected);
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = TestApp::new().await;
        metrics::record_pin_created("human");

        let response = app
            .router
            .clone()
            .oneshot(axum::http::Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("pins_created_total"));
    }
}
