use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use common::domain::{BatchResponse, Beneficiary, Fund, Transaction};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::http::{AppError, AppResult, AppState};

/// `POST /api/sync/`: apply a list of entries, or a single entry object.
///
/// Always answers 200 with one result per entry once the body parses.
#[instrument(skip_all, fields(body_len = body.len()))]
pub async fn post_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<BatchResponse>> {
    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("request body is not valid JSON: {}", e)))?;

    let entries = match parsed {
        Value::Array(entries) => entries,
        entry @ Value::Object(_) => vec![entry],
        _ => {
            return Err(AppError::bad_request(
                "request body must be a JSON array or object",
            ))
        }
    };
    debug!(entries = entries.len(), "Received sync batch");

    let results = state.applier.apply_batch(entries).await;
    Ok(Json(BatchResponse { results }))
}

pub async fn list_beneficiaries(State(state): State<AppState>) -> AppResult<Json<Vec<Beneficiary>>> {
    Ok(Json(state.queries.list_beneficiaries().await?))
}

pub async fn list_funds(State(state): State<AppState>) -> AppResult<Json<Vec<Fund>>> {
    Ok(Json(state.queries.list_funds().await?))
}

pub async fn list_transactions(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Transaction>>> {
    Ok(Json(state.queries.list_transactions().await?))
}

pub async fn get_beneficiary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Beneficiary>> {
    Ok(Json(state.queries.get_beneficiary(id).await?))
}

pub async fn get_fund(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Fund>> {
    Ok(Json(state.queries.get_fund(id).await?))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Transaction>> {
    Ok(Json(state.queries.get_transaction(id).await?))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
