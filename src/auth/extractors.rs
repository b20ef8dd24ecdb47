use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use super::jwt::{extract_bearer, Claims, JwtKeys, TokenError};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::PublicUser;

const NOT_AUTHENTICATED: &str = "Not authenticated";

fn verify_request(parts: &Parts, keys: &JwtKeys) -> Result<Claims, TokenError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let token = extract_bearer(header).ok_or(TokenError::Missing)?;
    keys.verify(token)
}

/// Verified token claims. Rejects with 401 when the token is absent,
/// malformed or expired; the reason is only logged.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        match verify_request(parts, &keys) {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(reason) => {
                warn!(%reason, path = %parts.uri.path(), "access gate rejected request");
                Err(AppError::unauthorized(NOT_AUTHENTICATED))
            }
        }
    }
}

/// Like `AuthUser`, but proceeds anonymously instead of rejecting.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<Claims>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        match verify_request(parts, &keys) {
            Ok(claims) => Ok(MaybeAuthUser(Some(claims))),
            Err(reason) => {
                debug!(%reason, "proceeding without identity");
                Ok(MaybeAuthUser(None))
            }
        }
    }
}

/// Authenticated caller whose account is not awaiting a password change.
///
/// Restricted accounts get 403; a token for a deleted account gets 401.
#[derive(Debug, Clone)]
pub struct ActiveUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for ActiveUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        let user = state
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token references a missing account");
                AppError::unauthorized(NOT_AUTHENTICATED)
            })?;
        if user.must_change_password {
            warn!(user_id = %user.id, path = %parts.uri.path(), "password change required");
            return Err(AppError::PasswordChangeRequired);
        }
        Ok(ActiveUser(user.into()))
    }
}
