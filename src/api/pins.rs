/// Pinning Service API endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{PinError, PinResult},
    pin_store::{PinListOptions, PinStatus, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT},
    pins::{NewPin, PinListResponse, PinStatusResponse},
};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

const MAX_META_KEYS: usize = 10;
const MAX_META_VALUE_LEN: usize = 256;

/// Build pin routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/pins", post(create_pin).get(list_pins))
        .route("/pins/:requestid", get(get_pin).delete(delete_pin))
        .route("/agents/:id/pins", get(list_agent_pins))
}

/// Raw list query; every field stays a string so bad values surface as
/// validation errors in the usual envelope
#[derive(Debug, Default, Deserialize)]
pub struct ListPinsQuery {
    pub status: Option<String>,
    pub cid: Option<String>,
    pub name: Option<String>,
    pub meta: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListPinsQuery {
    pub fn into_options(self) -> PinResult<PinListOptions> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let statuses = match present(self.status) {
            Some(raw) => parse_statuses(&raw)?,
            None => Vec::new(),
        };

        let meta = match present(self.meta) {
            Some(raw) => parse_meta(&raw)?,
            None => BTreeMap::new(),
        };

        let limit = match present(self.limit) {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(limit) if limit >= 1 => limit.min(MAX_LIST_LIMIT),
                _ => return Err(PinError::Validation("limit must be a positive integer".to_string())),
            },
            None => DEFAULT_LIST_LIMIT,
        };

        let offset = match present(self.offset) {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(offset) if offset >= 0 => offset,
                _ => {
                    return Err(PinError::Validation(
                        "offset must be a non-negative integer".to_string(),
                    ))
                }
            },
            None => 0,
        };

        Ok(PinListOptions {
            cid: present(self.cid),
            name: present(self.name),
            statuses,
            meta,
            before: present(self.before).map(|raw| parse_timestamp("before", &raw)).transpose()?,
            after: present(self.after).map(|raw| parse_timestamp("after", &raw)).transpose()?,
            limit,
            offset,
        })
    }
}

/// Comma-separated statuses, each one of the four pin states
fn parse_statuses(raw: &str) -> PinResult<Vec<PinStatus>> {
    let mut statuses = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let status: PinStatus = part.parse()?;
        if !statuses.contains(&status) {
            statuses.push(status);
        }
    }
    Ok(statuses)
}

/// JSON object of string values, matched as a subset of each pin's meta
fn parse_meta(raw: &str) -> PinResult<BTreeMap<String, String>> {
    let invalid = || PinError::Validation("meta must be a valid JSON object".to_string());

    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| invalid())?;
    let object = value.as_object().ok_or_else(invalid)?;

    if object.len() > MAX_META_KEYS {
        return Err(PinError::Validation(format!(
            "meta must have at most {} keys",
            MAX_META_KEYS
        )));
    }

    let mut meta = BTreeMap::new();
    for (key, value) in object {
        let value = value
            .as_str()
            .ok_or_else(|| PinError::Validation("meta values must be strings".to_string()))?;
        if value.chars().count() > MAX_META_VALUE_LEN {
            return Err(PinError::Validation(format!(
                "meta values must be at most {} characters",
                MAX_META_VALUE_LEN
            )));
        }
        meta.insert(key.clone(), value.to_string());
    }

    Ok(meta)
}

fn parse_timestamp(field: &str, raw: &str) -> PinResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| PinError::Validation(format!("{} must be an RFC 3339 timestamp", field)))
}

fn list_options(query: Result<Query<ListPinsQuery>, QueryRejection>) -> PinResult<PinListOptions> {
    let Query(query) = query.map_err(|e| PinError::Validation(format!("invalid query: {}", e)))?;
    query.into_options()
}

/// POST /pins
///
/// The body is parsed by hand so an unauthenticated caller gets 401 before
/// any body validation.
async fn create_pin(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    body: Bytes,
) -> PinResult<(StatusCode, Json<PinStatusResponse>)> {
    let request: NewPin = serde_json::from_slice(&body)
        .map_err(|_| PinError::Validation("invalid JSON body".to_string()))?;

    let pin = ctx.pin_service.create(&auth.principal, request).await?;

    Ok((StatusCode::ACCEPTED, Json(PinStatusResponse::from(&pin))))
}

/// GET /pins
async fn list_pins(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    query: Result<Query<ListPinsQuery>, QueryRejection>,
) -> PinResult<Json<PinListResponse>> {
    let opts = list_options(query)?;
    let (pins, count) = ctx.pin_service.list(&auth.principal, &opts).await?;

    Ok(Json(PinListResponse::new(&pins, count)))
}

/// GET /pins/:requestid
async fn get_pin(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(requestid): Path<String>,
) -> PinResult<Json<PinStatusResponse>> {
    let pin = ctx.pin_service.get(&auth.principal, &requestid).await?;

    Ok(Json(PinStatusResponse::from(&pin)))
}

/// DELETE /pins/:requestid
async fn delete_pin(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(requestid): Path<String>,
) -> PinResult<StatusCode> {
    ctx.pin_service.delete(&auth.principal, &requestid).await?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /agents/:id/pins
async fn list_agent_pins(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(agent_id): Path<String>,
    query: Result<Query<ListPinsQuery>, QueryRejection>,
) -> PinResult<Json<PinListResponse>> {
    let opts = list_options(query)?;
    let (pins, count) = ctx
        .pin_service
        .list_agent_pins(&auth.principal, &agent_id, &opts)
        .await?;

    Ok(Json(PinListResponse::new(&pins, count)))
}
