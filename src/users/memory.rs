use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo::{StoreError, UserStore};
use crate::users::repo_types::{
    normalize_email, ListQuery, NewUserRecord, ProfilePatch, UserRecord,
};

/// In-process user store with the same contract as the Postgres one.
///
/// Used for local development (`USER_STORE=memory`) and tests. Contents are
/// lost on restart.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, UserRecord>>, StoreError> {
        self.users
            .read()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("user store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, UserRecord>>, StoreError> {
        self.users
            .write()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("user store lock poisoned")))
    }
}

fn email_taken(users: &HashMap<Uuid, UserRecord>, email: &str, except: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| Some(u.id) != except && u.email == email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = normalize_email(email);
        Ok(self.read()?.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn create(&self, new: NewUserRecord) -> Result<UserRecord, StoreError> {
        let email = normalize_email(&new.email);
        let mut users = self.write()?;
        if email_taken(&users, &email, None) {
            return Err(StoreError::Conflict { email });
        }
        let now = OffsetDateTime::now_utc();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email,
            name: new.name,
            password_hash: new.password_hash,
            must_change_password: new.must_change_password,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn complete_password_rotation(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.write()?;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.must_change_password = false;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: ProfilePatch,
    ) -> Result<UserRecord, StoreError> {
        let mut users = self.write()?;
        if !users.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        let email = patch.email.as_deref().map(normalize_email);
        if let Some(email) = &email {
            if email_taken(&users, email, Some(id)) {
                return Err(StoreError::Conflict {
                    email: email.clone(),
                });
            }
        }
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        if let Some(user) = self.write()?.get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.write()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, query: &ListQuery) -> Result<(Vec<UserRecord>, u64), StoreError> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let users = self.read()?;
        let mut matches: Vec<&UserRecord> = users
            .values()
            .filter(|u| match &needle {
                Some(n) => u.name.to_lowercase().contains(n) || u.email.contains(n),
                None => true,
            })
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}
