use serde::Serialize;

use crate::users::repo_types::PublicUser;

pub const LOGIN_ROUTE: &str = "/login";
pub const CHANGE_PASSWORD_ROUTE: &str = "/change-password";

/// Observable account state: token validity combined with the
/// `must_change_password` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    Anonymous,
    Restricted,
    Full,
}

impl AccountState {
    pub fn of(identity: Option<&PublicUser>) -> Self {
        match identity {
            None => Self::Anonymous,
            Some(u) if u.must_change_password => Self::Restricted,
            Some(_) => Self::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(&'static str),
}

impl RouteDecision {
    pub fn redirect_target(self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Redirect(to) => Some(to),
        }
    }
}

fn same_route(path: &str, route: &str) -> bool {
    path.trim_end_matches('/') == route
}

/// Where the UI should send a caller in `state` who navigates to `path`.
pub fn guard_route(state: AccountState, path: &str) -> RouteDecision {
    match state {
        AccountState::Anonymous if same_route(path, LOGIN_ROUTE) => RouteDecision::Allow,
        AccountState::Anonymous => RouteDecision::Redirect(LOGIN_ROUTE),
        AccountState::Restricted if same_route(path, CHANGE_PASSWORD_ROUTE) => {
            RouteDecision::Allow
        }
        AccountState::Restricted => RouteDecision::Redirect(CHANGE_PASSWORD_ROUTE),
        AccountState::Full => RouteDecision::Allow,
    }
}
