use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{CreateUserError, UserStore};
use super::repo_types::{NewUser, User};

/// `UserStore` backed by a map, with the same uniqueness rules as the
/// `users` table.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Option<User>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id)?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Some(user.clone())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id).await)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| username == Some(u.username.as_str()) || email == Some(u.email.as_str()))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, CreateUserError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.username == new.username || u.email == new.email)
        {
            return Err(CreateUserError::Duplicate);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.id,
            username: new.username,
            email: new.email,
            full_name: new.full_name,
            password_hash: new.password_hash,
            avatar_url: new.avatar_url,
            cover_image_url: new.cover_image_url,
            refresh_token: None,
            watch_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<()> {
        self.update(id, |u| u.refresh_token = token.map(str::to_string))
            .await;
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.update(id, |u| u.password_hash = password_hash.to_string())
            .await;
        Ok(())
    }

    async fn set_avatar_url(&self, id: Uuid, avatar_url: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .update(id, |u| u.avatar_url = avatar_url.to_string())
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            password_hash: "hash".into(),
            avatar_url: "https://media/a.png".into(),
            cover_image_url: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username_or_email() {
        let store = InMemoryUserStore::new();
        store.create(new_user("bob", "bob@example.com")).await.unwrap();

        let dup_name = store.create(new_user("bob", "other@example.com")).await;
        assert!(matches!(dup_name, Err(CreateUserError::Duplicate)));

        let dup_email = store.create(new_user("bobby", "bob@example.com")).await;
        assert!(matches!(dup_email, Err(CreateUserError::Duplicate)));
    }

    #[tokio::test]
    async fn find_by_username_or_email_matches_either() {
        let store = InMemoryUserStore::new();
        let created = store.create(new_user("carol", "carol@example.com")).await.unwrap();

        let by_name = store.find_by_username_or_email(Some("carol"), None).await.unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(created.id));

        let by_email = store
            .find_by_username_or_email(None, Some("carol@example.com"))
            .await
            .unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));

        let none = store.find_by_username_or_email(None, None).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn set_refresh_token_overwrites_and_clears() {
        let store = InMemoryUserStore::new();
        let user = store.create(new_user("dave", "dave@example.com")).await.unwrap();

        store.set_refresh_token(user.id, Some("t1")).await.unwrap();
        store.set_refresh_token(user.id, Some("t2")).await.unwrap();
        assert_eq!(store.get(user.id).await.unwrap().refresh_token.as_deref(), Some("t2"));

        store.set_refresh_token(user.id, None).await.unwrap();
        assert!(store.get(user.id).await.unwrap().refresh_token.is_none());
    }
}
