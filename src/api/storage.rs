/// Storage usage endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::PinResult,
    storage_ledger::StorageResponse,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

/// Platform data envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// Build storage routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/storage", get(get_storage))
        .route("/agents/:id/storage", get(get_agent_storage))
}

/// GET /storage
async fn get_storage(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PinResult<Json<DataEnvelope<StorageResponse>>> {
    let usage = ctx.pin_service.storage_usage(&auth.principal).await?;

    Ok(Json(DataEnvelope {
        data: StorageResponse::from(&usage),
    }))
}

/// GET /agents/:id/storage
async fn get_agent_storage(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(agent_id): Path<String>,
) -> PinResult<Json<DataEnvelope<StorageResponse>>> {
    let usage = ctx
        .pin_service
        .agent_storage_usage(&auth.principal, &agent_id)
        .await?;

    Ok(Json(DataEnvelope {
        data: StorageResponse::from(&usage),
    }))
}
