use axum::{
    Json,
    extract::{Path, Query, State},
};
use rankmeter_core::types::{AccountId, LedgerEntry, LedgerReceipt};

use crate::AppState;
use crate::api::{ApiResponse, BalanceResponse, GrantRequest, LedgerQuery, PurchaseRequest};
use crate::infra::errors::AppResult;

const DEFAULT_HISTORY_LIMIT: u32 = 50;

pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> AppResult<Json<ApiResponse<BalanceResponse>>> {
    let balance = state.ledger.get_balance(account_id).await?;
    Ok(Json(ApiResponse::success(BalanceResponse {
        account_id,
        balance,
    })))
}

/// Newest first; `limit` is clamped by the ledger.
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(query): Query<LedgerQuery>,
) -> AppResult<Json<ApiResponse<Vec<LedgerEntry>>>> {
    let entries = state
        .ledger
        .history(account_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// Called by the payment webhook once a checkout completes. Replays of the
/// same checkout are acknowledged without adding credits twice.
pub async fn record_purchase(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(request): Json<PurchaseRequest>,
) -> AppResult<Json<ApiResponse<LedgerReceipt>>> {
    let receipt = state
        .ledger
        .purchase(account_id, request.credits, &request.checkout_id)
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}

pub async fn record_grant(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(request): Json<GrantRequest>,
) -> AppResult<Json<ApiResponse<LedgerReceipt>>> {
    let receipt = state
        .ledger
        .grant(account_id, request.credits, &request.period_key)
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}
