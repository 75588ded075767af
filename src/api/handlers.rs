// src/api/handlers.rs

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::{types::*, ApiState};
use crate::billing::recharge::{self, RechargePackage, RechargeReceipt, PACKAGES};
use crate::billing::{CallKind, CallRequest};
use crate::directory;
use crate::infra::errors::DosttError;
use crate::storage::store::{
    CallRow, CompanionRow, NewCall, NewTransaction, TransactionRow, UserRow,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

fn map_error(err: DosttError) -> ApiError {
    let status = match &err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        DosttError::CallActive { .. } | DosttError::CompanionOffline { .. } => StatusCode::CONFLICT,
        DosttError::NoOnlineCompanion => StatusCode::SERVICE_UNAVAILABLE,
        DosttError::InvalidStartState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => {
            tracing::error!("Request failed: {err}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    };
    api_error(status, err.to_string())
}

fn internal(err: anyhow::Error) -> ApiError {
    map_error(DosttError::from_anyhow(err))
}

fn require_user_id(query: &UserQuery) -> Result<i64, ApiError> {
    query
        .user_id
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "User ID is required"))
}

async fn existing_user(state: &ApiState, user_id: i64) -> Result<UserRow, ApiError> {
    state
        .store
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| map_error(DosttError::UserNotFound { user_id }))
}

/// GET /api/health — Liveness and active call count.
pub async fn health(State(state): State<ApiState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_calls: state.calls.active_count().await,
    })
}

/// POST /api/login — Username-only login, creating the account on first use.
pub async fn login(
    State(state): State<ApiState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<UserRow>, ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Username is required"));
    }

    let starting_coins = state.config.accounts.starting_coins as i64;
    let user = state
        .store
        .login_or_create(username.to_string(), starting_coins)
        .await
        .map_err(internal)?;
    Ok(Json(user))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<UserRow>, ApiError> {
    Ok(Json(existing_user(&state, id).await?))
}

/// PATCH /api/users/{id}/coins — Overwrite the balance. Refused mid-call.
pub async fn update_coins(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<CoinsUpdate>,
) -> Result<Json<UserRow>, ApiError> {
    if body.coins < 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Valid coins amount required",
        ));
    }
    existing_user(&state, id).await?;

    state
        .calls
        .write_balance(id, body.coins as u64)
        .await
        .map_err(map_error)?;
    Ok(Json(existing_user(&state, id).await?))
}

/// GET /api/companions
pub async fn list_companions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<CompanionRow>>, ApiError> {
    let companions = state.store.list_companions().await.map_err(internal)?;
    Ok(Json(companions))
}

/// GET /api/packages
pub async fn list_packages() -> Json<Vec<RechargePackage>> {
    Json(PACKAGES.to_vec())
}

/// POST /api/users/{id}/recharge — Buy a coin package.
pub async fn recharge_coins(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<RechargeRequest>,
) -> Result<Json<RechargeReceipt>, ApiError> {
    let package = recharge::find_package(body.coins).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("No recharge package with {} coins", body.coins),
        )
    })?;

    let receipt = recharge::recharge(
        &state.store,
        &state.calls,
        id,
        package,
        body.payment_method,
    )
    .await
    .map_err(map_error)?;
    Ok(Json(receipt))
}

/// POST /api/users/{id}/call — Start a call, replacing any active one.
pub async fn start_call(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<StartCallRequest>,
) -> Result<(StatusCode, Json<CallState>), ApiError> {
    let companions = state.store.list_companions().await.map_err(internal)?;
    let companion = match body.companion_id {
        Some(companion_id) => directory::find_online(&companions, companion_id),
        None => directory::pick_random_online(&companions),
    }
    .map_err(map_error)?;
    let kind = match body.kind {
        Some(kind) => kind,
        None => directory::random_kind().map_err(internal)?,
    };

    let handle = state
        .calls
        .start(CallRequest {
            user_id: id,
            companion_id: companion.id,
            kind,
        })
        .await
        .map_err(map_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CallState::from_handle(&handle, Some(companion.name.clone()))),
    ))
}

/// GET /api/users/{id}/call — Current tick of the user's call.
pub async fn get_call(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<CallState>, ApiError> {
    let handle = state
        .calls
        .get(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("User {id} has no call")))?;

    let companion = state
        .store
        .get_companion(handle.companion_id())
        .await
        .map_err(internal)?;
    Ok(Json(CallState::from_handle(
        &handle,
        companion.map(|c| c.name),
    )))
}

/// DELETE /api/users/{id}/call — Hang up and wait for the balance write.
pub async fn end_call(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<CallEnded>, ApiError> {
    let handle = state
        .calls
        .get(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("User {id} has no call")))?;

    let final_balance = state.calls.end(id).await.unwrap_or_else(|| handle.end());
    let tick = handle.snapshot();
    Ok(Json(CallEnded {
        final_balance,
        elapsed_seconds: tick.elapsed_seconds,
        status: tick.status,
    }))
}

/// GET /api/calls?userId= — Call history, newest first.
pub async fn list_calls(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<CallRow>>, ApiError> {
    let user_id = require_user_id(&query)?;
    let calls = state.store.calls_by_user(user_id).await.map_err(internal)?;
    Ok(Json(calls))
}

/// POST /api/calls — Record a call history entry.
pub async fn create_call(
    State(state): State<ApiState>,
    Json(body): Json<NewCall>,
) -> Result<(StatusCode, Json<CallRow>), ApiError> {
    body.call_type
        .parse::<CallKind>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    if body.duration < 0 || body.coins_spent < 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Duration and coins spent must not be negative",
        ));
    }
    existing_user(&state, body.user_id).await?;
    if state
        .store
        .get_companion(body.companion_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(map_error(DosttError::CompanionNotFound {
            companion_id: body.companion_id,
        }));
    }

    let call = state.store.insert_call(body).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(call)))
}

/// GET /api/transactions?userId= — Recharge ledger, newest first.
pub async fn list_transactions(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<TransactionRow>>, ApiError> {
    let user_id = require_user_id(&query)?;
    let entries = state
        .store
        .transactions_by_user(user_id)
        .await
        .map_err(internal)?;
    Ok(Json(entries))
}

/// POST /api/transactions — Append a ledger entry without crediting coins.
pub async fn create_transaction(
    State(state): State<ApiState>,
    Json(body): Json<NewTransaction>,
) -> Result<(StatusCode, Json<TransactionRow>), ApiError> {
    if body.amount < 0 || body.coins < 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Amount and coins must not be negative",
        ));
    }
    existing_user(&state, body.user_id).await?;

    let entry = state
        .store
        .insert_transaction(body)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(entry)))
}
