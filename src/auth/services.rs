use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::jwt::Claims;
use super::policy::{self, Violation};
use crate::error::{AppError, FieldError};
use crate::state::AppState;
use crate::users::repo_types::{normalize_email, PublicUser};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn policy_error(field: &str, violations: &[Violation]) -> AppError {
    AppError::Validation {
        message: "Password does not meet requirements".into(),
        errors: violations
            .iter()
            .map(|v| FieldError::new(field, v.message()))
            .collect(),
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Anonymous -> Authenticated. Whether the session is restricted depends
/// only on the stored `must_change_password` flag.
#[instrument(skip(st, password))]
pub async fn login(
    st: &AppState,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<(String, PublicUser), AppError> {
    let (Some(email), Some(password)) = (
        present(email.map(str::trim)),
        present(password),
    ) else {
        return Err(AppError::validation("Email and password are required"));
    };
    let email = normalize_email(email);

    let Some(mut user) = st.store.find_by_email(&email).await? else {
        st.hasher.verify_dummy(password).await?;
        warn!(email = %email, "login unknown email");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    if !st.hasher.verify(password, &user.password_hash).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    let token = st.keys.issue(user.id, &user.email)?;
    let now = OffsetDateTime::now_utc();
    st.store.touch_last_login(user.id, now).await?;
    user.last_login = Some(now);

    info!(
        user_id = %user.id,
        must_change_password = user.must_change_password,
        "user logged in"
    );
    Ok((token, user.into()))
}

/// Tokens are stateless; the client discards its copy.
pub fn logout(claims: &Claims) {
    info!(user_id = %claims.sub, "user logged out");
}

/// Resolves verified claims to the account. A deleted account is reported
/// exactly like a bad token.
#[instrument(skip(st, claims), fields(user_id = %claims.sub))]
pub async fn current_identity(st: &AppState, claims: &Claims) -> Result<PublicUser, AppError> {
    match st.store.find_by_id(claims.sub).await? {
        Some(user) => Ok(user.into()),
        None => {
            warn!("token references a missing account");
            Err(AppError::unauthorized("Not authenticated"))
        }
    }
}

/// The only transition out of the restricted state.
#[instrument(skip(st, claims, current_password, new_password), fields(user_id = %claims.sub))]
pub async fn change_password(
    st: &AppState,
    claims: &Claims,
    current_password: Option<&str>,
    new_password: Option<&str>,
) -> Result<(), AppError> {
    let (Some(current), Some(new)) = (present(current_password), present(new_password)) else {
        return Err(AppError::validation(
            "Current password and new password are required",
        ));
    };

    let violations = policy::validate(new);
    if !violations.is_empty() {
        return Err(policy_error("newPassword", &violations));
    }

    let Some(user) = st.store.find_by_id(claims.sub).await? else {
        warn!("token references a missing account");
        return Err(AppError::unauthorized("Not authenticated"));
    };

    if !st.hasher.verify(current, &user.password_hash).await? {
        warn!("change password with wrong current password");
        return Err(AppError::unauthorized("Current password is incorrect"));
    }

    if new == current {
        return Err(AppError::validation(
            "New password must be different from current password",
        ));
    }

    let hash = st.hasher.hash(new).await?;
    st.store.complete_password_rotation(user.id, &hash).await?;

    info!(was_restricted = user.must_change_password, "password changed");
    Ok(())
}

/// Account behind an optional token, for callers that accept anonymity.
pub async fn resolve_optional(
    st: &AppState,
    claims: Option<&Claims>,
) -> Result<Option<PublicUser>, AppError> {
    match claims {
        Some(claims) => Ok(st.store.find_by_id(claims.sub).await?.map(Into::into)),
        None => Ok(None),
    }
}
