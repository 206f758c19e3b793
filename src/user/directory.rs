//! User directory contract and the in-memory provider.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{NewUser, User};
use crate::{Error, Result};

/// Storage of registered users.
///
/// Implementations must be `Send + Sync` because one directory is shared by
/// every request task.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Find the user owning `public_key_der` (DER `SubjectPublicKeyInfo`).
    async fn find_by_public_key(&self, public_key_der: &[u8]) -> Result<Option<User>>;

    /// Find a user by identifier.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Create a user.
    ///
    /// Fails with [`Error::DuplicateKey`] if the public key is already owned.
    async fn create(&self, new_user: NewUser) -> Result<User>;

    /// Set `login_first` if unset and always set `login_last` to `at`.
    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User>;

    /// Replace the display name.
    async fn update_display_name(&self, id: Uuid, display_name: String) -> Result<User>;

    /// Delete a user.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Users indexed by id and by public key.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_key: HashMap<Vec<u8>, Uuid>,
}

impl UserTable {
    pub(crate) fn from_users(users: Vec<User>) -> Result<Self> {
        let mut table = Self::default();
        for user in users {
            table.insert(user)?;
        }
        Ok(table)
    }

    pub(crate) fn users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.by_id.values().collect();
        users.sort_by_key(|user| (user.signup, user.id));
        users
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn find_by_public_key(&self, public_key_der: &[u8]) -> Option<User> {
        let id = self.by_key.get(public_key_der)?;
        self.by_id.get(id).cloned()
    }

    pub(crate) fn find_by_id(&self, id: Uuid) -> Option<User> {
        self.by_id.get(&id).cloned()
    }

    pub(crate) fn insert(&mut self, user: User) -> Result<User> {
        if self.by_key.contains_key(&user.public_key_der) {
            return Err(Error::DuplicateKey(user.key_fingerprint));
        }
        self.by_key.insert(user.public_key_der.clone(), user.id);
        self.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    pub(crate) fn update(&mut self, id: Uuid, apply: impl FnOnce(&mut User)) -> Result<User> {
        let user = self.by_id.get_mut(&id).ok_or(Error::UserNotFound)?;
        apply(user);
        Ok(user.clone())
    }

    pub(crate) fn remove(&mut self, id: Uuid) -> Result<User> {
        let user = self.by_id.remove(&id).ok_or(Error::UserNotFound)?;
        self.by_key.remove(&user.public_key_der);
        Ok(user)
    }
}

/// Process-local [`UserDirectory`]; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    table: RwLock<UserTable>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the directory holds no user.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_public_key(&self, public_key_der: &[u8]) -> Result<Option<User>> {
        Ok(self.table.read().find_by_public_key(public_key_der))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.table.read().find_by_id(id))
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let user = self.table.write().insert(new_user.into_user(Utc::now()))?;
        debug!(user_id = %user.id, fingerprint = %user.key_fingerprint, "User created");
        Ok(user)
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User> {
        self.table.write().update(id, |user| user.record_login(at))
    }

    async fn update_display_name(&self, id: Uuid, display_name: String) -> Result<User> {
        self.table
            .write()
            .update(id, |user| user.display_name = display_name)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let user = self.table.write().remove(id)?;
        debug!(user_id = %user.id, "User deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_user(key: &[u8]) -> NewUser {
        NewUser {
            public_key_der: key.to_vec(),
            public_key_algorithm: "ECDSA".to_string(),
            key_fingerprint: crate::pki::fingerprint_sha256(key),
        }
    }

    #[tokio::test]
    async fn create_then_find_by_public_key() {
        // GIVEN: a directory with one user
        let dir = InMemoryUserDirectory::new();
        let created = dir.create(new_user(b"key-a")).await.unwrap();
        // WHEN: looking up by key
        let found = dir.find_by_public_key(b"key-a").await.unwrap();
        // THEN: the same user comes back
        assert_eq!(found, Some(created.clone()));
        assert_eq!(dir.find_by_id(created.id).await.unwrap(), Some(created));
        assert_eq!(dir.find_by_public_key(b"key-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_public_key_is_rejected() {
        let dir = InMemoryUserDirectory::new();
        dir.create(new_user(b"same")).await.unwrap();
        let err = dir.create(new_user(b"same")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)), "{err:?}");
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn touch_login_updates_timestamps() {
        let dir = InMemoryUserDirectory::new();
        let user = dir.create(new_user(b"k")).await.unwrap();
        assert_eq!(user.login_first, None);

        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(30);
        dir.touch_login(user.id, t1).await.unwrap();
        let after = dir.touch_login(user.id, t2).await.unwrap();

        assert_eq!(after.login_first, Some(t1));
        assert_eq!(after.login_last, Some(t2));
    }

    #[tokio::test]
    async fn update_display_name_persists() {
        let dir = InMemoryUserDirectory::new();
        let user = dir.create(new_user(b"k")).await.unwrap();
        dir.update_display_name(user.id, "Bob".to_string())
            .await
            .unwrap();
        let found = dir.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(found.display_name, "Bob");
    }

    #[tokio::test]
    async fn delete_frees_the_public_key() {
        let dir = InMemoryUserDirectory::new();
        let user = dir.create(new_user(b"k")).await.unwrap();
        dir.delete(user.id).await.unwrap();

        assert!(dir.is_empty());
        assert_eq!(dir.find_by_public_key(b"k").await.unwrap(), None);
        dir.create(new_user(b"k")).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_id_is_user_not_found() {
        let dir = InMemoryUserDirectory::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            dir.touch_login(id, Utc::now()).await.unwrap_err(),
            Error::UserNotFound
        ));
        assert!(matches!(dir.delete(id).await.unwrap_err(), Error::UserNotFound));
    }
}
