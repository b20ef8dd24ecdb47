use serde::{Deserialize, Serialize};

use super::guard::AccountState;
use super::policy::Violation;
use crate::users::repo_types::PublicUser;

/// Request body for login. Fields are optional so that a missing one is
/// reported as 400 rather than a deserialization failure.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordStrengthRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct ViolationView {
    pub code: Violation,
    pub message: String,
}

impl From<Violation> for ViolationView {
    fn from(v: Violation) -> Self {
        Self {
            code: v,
            message: v.message(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PasswordStrengthResponse {
    pub score: u8,
    pub violations: Vec<ViolationView>,
}

#[derive(Debug, Deserialize)]
pub struct AccountStateQuery {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountStateResponse {
    pub state: AccountState,
    pub redirect: Option<&'static str>,
}
