use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::policy;
use crate::config::SeedAdmin;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo::StoreError;
use crate::users::repo_types::{
    normalize_email, ListQuery, NewUserRecord, ProfilePatch, PublicUser,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn checked_email(raw: &str) -> Result<String, AppError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

/// A freshly provisioned account plus the only copy of its password.
#[derive(Debug)]
pub struct ProvisionedUser {
    pub user: PublicUser,
    pub generated_password: String,
}

/// Administrator-initiated account creation. The account starts restricted
/// and the generated plaintext is returned once, never stored or logged.
#[instrument(skip(st))]
pub async fn create_user(
    st: &AppState,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<ProvisionedUser, AppError> {
    let (Some(name), Some(email)) = (non_blank(name), non_blank(email)) else {
        return Err(AppError::validation("Name and email are required"));
    };
    let email = checked_email(email)?;

    let generated_password = policy::generate();
    let password_hash = st.hasher.hash(&generated_password).await?;

    let user = st
        .store
        .create(NewUserRecord {
            name: name.to_string(),
            email,
            password_hash,
            must_change_password: true,
        })
        .await
        .map_err(|e| {
            if let StoreError::Conflict { email } = &e {
                warn!(%email, "provisioning duplicate email");
            }
            AppError::from(e)
        })?;

    info!(user_id = %user.id, email = %user.email, "user provisioned");
    Ok(ProvisionedUser {
        user: user.into(),
        generated_password,
    })
}

#[instrument(skip(st))]
pub async fn get_user(st: &AppState, id: Uuid) -> Result<PublicUser, AppError> {
    st.store
        .find_by_id(id)
        .await?
        .map(Into::into)
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

#[instrument(skip(st))]
pub async fn update_user(
    st: &AppState,
    id: Uuid,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<PublicUser, AppError> {
    let mut patch = ProfilePatch::default();
    if let Some(name) = name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("Name cannot be empty"));
        }
        patch.name = Some(name.to_string());
    }
    if let Some(email) = email {
        patch.email = Some(checked_email(email)?);
    }
    if patch.is_empty() {
        return Err(AppError::validation(
            "At least one field (name or email) must be provided",
        ));
    }

    let user = st.store.update_profile(id, patch).await?;
    info!(user_id = %user.id, "user updated");
    Ok(user.into())
}

/// Deletes `id` on behalf of `actor`. Deleting oneself is refused.
#[instrument(skip(st))]
pub async fn delete_user(st: &AppState, actor: Uuid, id: Uuid) -> Result<(), AppError> {
    if actor == id {
        warn!("self-deletion attempt");
        return Err(AppError::Forbidden("You cannot delete your own account".into()));
    }
    st.store.delete(id).await?;
    info!(user_id = %id, "user deleted");
    Ok(())
}

#[derive(Debug)]
pub struct UserPage {
    pub users: Vec<PublicUser>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

#[instrument(skip(st))]
pub async fn list_users(
    st: &AppState,
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<&str>,
) -> Result<UserPage, AppError> {
    let query = ListQuery {
        page: page.unwrap_or(1).max(1),
        page_size: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        search: non_blank(search).map(str::to_string),
    };
    let (rows, total) = st.store.list(&query).await?;
    debug!(returned = rows.len(), total, "listed users");
    Ok(UserPage {
        users: rows.into_iter().map(Into::into).collect(),
        total,
        page: query.page,
        limit: query.page_size,
        total_pages: total.div_ceil(u64::from(query.page_size)),
    })
}

/// Creates the bootstrap administrator unless the email already exists.
pub async fn seed_admin(st: &AppState, seed: &SeedAdmin) -> anyhow::Result<()> {
    let email = normalize_email(&seed.email);
    anyhow::ensure!(is_valid_email(&email), "SEED_ADMIN_EMAIL is not a valid email");
    if st.store.find_by_email(&email).await?.is_some() {
        debug!(%email, "seed administrator already present");
        return Ok(());
    }
    let violations = policy::validate(&seed.password);
    if !violations.is_empty() {
        let reasons: Vec<String> = violations.iter().map(|v| v.message()).collect();
        anyhow::bail!("SEED_ADMIN_PASSWORD rejected: {}", reasons.join("; "));
    }

    let password_hash = st.hasher.hash(&seed.password).await?;
    match st
        .store
        .create(NewUserRecord {
            name: seed.name.clone(),
            email,
            password_hash,
            must_change_password: true,
        })
        .await
    {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "seeded administrator account");
            Ok(())
        }
        Err(StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("newuser@example.com"));
        assert!(!is_valid_email("newuser"));
        assert!(!is_valid_email("new user@example.com"));
        assert!(!is_valid_email("a@b"));
    }

    #[tokio::test]
    async fn provisioning_returns_policy_compliant_password_once() {
        let st = AppState::fake();
        let created = create_user(&st, Some("New User"), Some("NewUser@Example.com"))
            .await
            .unwrap();
        assert_eq!(created.user.email, "newuser@example.com");
        assert!(created.user.must_change_password);
        assert!(created.generated_password.len() >= 12);
        assert!(policy::validate(&created.generated_password).is_empty());

        let stored = st.store.find_by_id(created.user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, created.generated_password);
        assert!(st
            .hasher
            .verify(&created.generated_password, &stored.password_hash)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn provisioning_validates_input() {
        let st = AppState::fake();
        let err = create_user(&st, Some(" "), Some("a@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Name and email are required");
        let err = create_user(&st, Some("A"), Some("not-an-email"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email");
    }

    #[tokio::test]
    async fn provisioning_duplicate_email_conflicts() {
        let st = AppState::fake();
        create_user(&st, Some("A"), Some("dup@example.com")).await.unwrap();
        let err = create_user(&st, Some("B"), Some("DUP@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn self_deletion_is_refused() {
        let st = AppState::fake();
        let me = create_user(&st, Some("Me"), Some("me@example.com")).await.unwrap();
        let err = delete_user(&st, me.user.id, me.user.id).await.unwrap_err();
        assert_eq!(err.to_string(), "You cannot delete your own account");
        assert!(st.store.find_by_id(me.user.id).await.unwrap().is_some());

        let err = delete_user(&st, me.user.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_requires_a_field() {
        let st = AppState::fake();
        let u = create_user(&st, Some("U"), Some("u@example.com")).await.unwrap();
        let err = update_user(&st, u.user.id, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let updated = update_user(&st, u.user.id, Some(" Renamed "), None)
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.email, "u@example.com");
    }

    #[tokio::test]
    async fn list_clamps_paging() {
        let st = AppState::fake();
        for i in 0..3 {
            create_user(&st, Some("Buyer"), Some(format!("b{i}@example.com").as_str()))
                .await
                .unwrap();
        }
        let page = list_users(&st, Some(0), Some(500), None).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 1);

        let page = list_users(&st, Some(2), Some(2), Some("  ")).await.unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn seeding_is_idempotent_and_policy_checked() {
        let st = AppState::fake();
        let seed = SeedAdmin {
            name: "Admin".into(),
            email: "Admin@Example.com".into(),
            password: "Bootstrap#2024".into(),
        };
        seed_admin(&st, &seed).await.unwrap();
        seed_admin(&st, &seed).await.unwrap();
        let admin = st
            .store
            .find_by_email("admin@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.must_change_password);

        let weak = SeedAdmin {
            password: "weak".into(),
            email: "other@example.com".into(),
            ..seed
        };
        assert!(seed_admin(&st, &weak).await.is_err());
    }
}
