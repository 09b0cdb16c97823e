use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String, // argon2 PHC string, never serialized
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub refresh_token: Option<String>,
    pub watch_history: Vec<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields required to insert a user. Strings are already normalized.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub watch_history: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            full_name: u.full_name.clone(),
            avatar: u.avatar_url.clone(),
            cover_image: u.cover_image_url.clone(),
            watch_history: u.watch_history.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
impl NewUser {
    pub fn fixture(username: &str, email: &str, password_hash: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            password_hash: password_hash.into(),
            avatar_url: "https://media.fake.local/avatars/fixture.png".into(),
            cover_image_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_never_leaks_secrets() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice A".into(),
            password_hash: "$argon2id$secret-hash".into(),
            avatar_url: "https://media/a.png".into(),
            cover_image_url: None,
            refresh_token: Some("refresh-secret".into()),
            watch_history: vec![],
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("\"fullName\":\"Alice A\""));
        assert!(json.contains("\"avatar\""));
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("refresh-secret"));
    }
}
