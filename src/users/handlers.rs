use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{
        CreateUserRequest, CreateUserResponse, ListParams, UpdateUserRequest, UserListResponse,
        UserResponse,
    },
    services,
};
use crate::{
    auth::extractors::ActiveUser,
    error::AppError,
    response::{ApiResponse, Empty},
    state::AppState,
};

/// Every route requires an authenticated, unrestricted caller.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

/// Ids are opaque; anything that is not a UUID cannot name a user.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::NotFound("User not found".into()))
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    _caller: ActiveUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<ApiResponse<UserListResponse>, AppError> {
    let Query(params) = params?;
    let page =
        services::list_users(&state, params.page, params.limit, params.search.as_deref()).await?;
    Ok(ApiResponse::ok(page.into()))
}

#[instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    _caller: ActiveUser,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<ApiResponse<CreateUserResponse>, AppError> {
    let Json(payload) = payload?;
    let created =
        services::create_user(&state, payload.name.as_deref(), payload.email.as_deref()).await?;
    Ok(ApiResponse::created(CreateUserResponse {
        user: created.user,
        generated_password: created.generated_password,
    })
    .with_message("User created. Share the generated password now; it cannot be shown again."))
}

#[instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    _caller: ActiveUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<UserResponse>, AppError> {
    let user = services::get_user(&state, parse_id(&id)?).await?;
    Ok(ApiResponse::ok(UserResponse { user }))
}

#[instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    _caller: ActiveUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<ApiResponse<UserResponse>, AppError> {
    let Json(payload) = payload?;
    let user = services::update_user(
        &state,
        parse_id(&id)?,
        payload.name.as_deref(),
        payload.email.as_deref(),
    )
    .await?;
    Ok(ApiResponse::ok(UserResponse { user }))
}

#[instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    ActiveUser(caller): ActiveUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Empty>, AppError> {
    services::delete_user(&state, caller.id, parse_id(&id)?).await?;
    Ok(ApiResponse::ok(Empty::default()).with_message("User deleted"))
}
