use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        AccountStateQuery, AccountStateResponse, ChangePasswordRequest, LoginRequest,
        LoginResponse, MeResponse, PasswordStrengthRequest, PasswordStrengthResponse,
    },
    extractors::{AuthUser, MaybeAuthUser},
    guard::{guard_route, AccountState},
    policy, services,
};
use crate::{
    error::AppError,
    response::{ApiResponse, Empty},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
        .route("/auth/state", get(account_state))
        .route("/auth/password-strength", post(password_strength))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>, AppError> {
    let Json(payload) = payload?;
    let (token, user) =
        services::login(&state, payload.email.as_deref(), payload.password.as_deref()).await?;
    Ok(ApiResponse::ok(LoginResponse { token, user }).with_message("Login successful"))
}

#[instrument(skip_all)]
pub async fn logout(AuthUser(claims): AuthUser) -> ApiResponse<Empty> {
    services::logout(&claims);
    ApiResponse::ok(Empty::default()).with_message("Logged out")
}

#[instrument(skip_all)]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<ApiResponse<MeResponse>, AppError> {
    let user = services::current_identity(&state, &claims).await?;
    Ok(ApiResponse::ok(MeResponse { user }))
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<Empty>, AppError> {
    let Json(payload) = payload?;
    services::change_password(
        &state,
        &claims,
        payload.current_password.as_deref(),
        payload.new_password.as_deref(),
    )
    .await?;
    Ok(ApiResponse::ok(Empty::default()).with_message("Password changed successfully"))
}

/// Optional-auth: reports where the UI guard should route this caller.
#[instrument(skip_all)]
pub async fn account_state(
    State(state): State<AppState>,
    MaybeAuthUser(claims): MaybeAuthUser,
    query: Result<Query<AccountStateQuery>, QueryRejection>,
) -> Result<ApiResponse<AccountStateResponse>, AppError> {
    let Query(query) = query?;
    let identity = services::resolve_optional(&state, claims.as_ref()).await?;
    let account = AccountState::of(identity.as_ref());
    let redirect = query
        .path
        .as_deref()
        .and_then(|path| guard_route(account, path).redirect_target());
    Ok(ApiResponse::ok(AccountStateResponse {
        state: account,
        redirect,
    }))
}

#[instrument(skip_all)]
pub async fn password_strength(
    payload: Result<Json<PasswordStrengthRequest>, JsonRejection>,
) -> Result<ApiResponse<PasswordStrengthResponse>, AppError> {
    let Json(payload) = payload?;
    Ok(ApiResponse::ok(PasswordStrengthResponse {
        score: policy::strength_score(&payload.password),
        violations: policy::validate(&payload.password)
            .into_iter()
            .map(Into::into)
            .collect(),
    }))
}
