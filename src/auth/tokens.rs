use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::de::DeserializeOwned;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::claims::{AccessClaims, RefreshClaims, TokenKind},
    config::JwtConfig,
    error::{AppError, AppResult},
    users::{
        repo::UserStore,
        repo_types::{PublicUser, User},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("Unexpected token type")]
    WrongKind,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e),
        }
    }
}

/// Signing material for one class of token.
#[derive(Clone)]
struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDuration,
}

impl JwtKeys {
    fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: TimeDuration::minutes(ttl_minutes),
        }
    }
}

/// Token pair handed out by login and refresh, with the sanitized user.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Issues, verifies and rotates access/refresh tokens. A refresh token is
/// only accepted while it equals the one stored on the user record.
#[derive(Clone)]
pub struct TokenManager {
    access: JwtKeys,
    refresh: JwtKeys,
    issuer: String,
    audience: String,
}

impl TokenManager {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access: JwtKeys::new(&cfg.access_secret, cfg.access_ttl_minutes),
            refresh: JwtKeys::new(&cfg.refresh_secret, cfg.refresh_ttl_minutes),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn access_ttl(&self) -> TimeDuration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> TimeDuration {
        self.refresh.ttl
    }

    fn window(&self, ttl: TimeDuration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + ttl;
        (
            now.unix_timestamp().max(0) as usize,
            exp.unix_timestamp().max(0) as usize,
        )
    }

    pub fn sign_access(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let (iat, exp) = self.window(self.access.ttl);
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.access.encoding)?;
        debug!(user_id = %user.id, kind = ?TokenKind::Access, "jwt signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let (iat, exp) = self.window(self.refresh.ttl);
        let claims = RefreshClaims {
            sub: user_id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh.encoding)?;
        debug!(user_id = %user_id, kind = ?TokenKind::Refresh, "jwt signed");
        Ok(token)
    }

    fn decode<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        Ok(decode::<T>(token, key, &validation)?.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token, &self.access.decoding)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::WrongKind);
        }
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode(token, &self.refresh.decoding)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::WrongKind);
        }
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }

    /// Signs a fresh pair and stores the refresh token on the user,
    /// replacing whatever was there.
    pub async fn issue_tokens(&self, store: &dyn UserStore, user: &User) -> AppResult<IssuedTokens> {
        const SIGN_FAILED: &str = "Something went wrong while generating access and refresh token";

        let access_token = self
            .sign_access(user)
            .map_err(|e| AppError::upstream(SIGN_FAILED, e))?;
        let refresh_token = self
            .sign_refresh(user.id)
            .map_err(|e| AppError::upstream(SIGN_FAILED, e))?;

        store
            .set_refresh_token(user.id, Some(refresh_token.as_str()))
            .await
            .map_err(|e| AppError::upstream(SIGN_FAILED, e))?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            user: PublicUser::from(user),
        })
    }

    /// Full rotation: the presented token must verify and must still be the
    /// one on record, then a new pair replaces it.
    pub async fn verify_and_rotate_refresh(
        &self,
        store: &dyn UserStore,
        token: &str,
    ) -> AppResult<IssuedTokens> {
        let claims = self.verify_refresh(token)?;

        let user = store
            .find_by_id(claims.sub)
            .await
            .map_err(|e| AppError::upstream("Failed to load user", e))?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        match user.refresh_token.as_deref() {
            Some(stored) if !stored.is_empty() && stored == token => {}
            _ => {
                warn!(user_id = %user.id, "refresh token does not match stored token");
                return Err(AppError::Auth("Refresh token is expired or used".into()));
            }
        }

        self.issue_tokens(store, &user).await
    }

    /// Makes any outstanding refresh token for the user unusable.
    pub async fn revoke(&self, store: &dyn UserStore, user_id: Uuid) -> AppResult<()> {
        store
            .set_refresh_token(user_id, None)
            .await
            .map_err(|e| AppError::upstream("Failed to revoke session", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::users::{memory::InMemoryUserStore, repo_types::NewUser};

    fn manager() -> TokenManager {
        TokenManager::new(&AppConfig::for_tests().jwt)
    }

    async fn seeded() -> (InMemoryUserStore, User) {
        let store = InMemoryUserStore::new();
        let user = store
            .create(NewUser::fixture("erin", "erin@example.com", "hash"))
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn issued_access_token_roundtrips_identity() {
        let tm = manager();
        let (store, user) = seeded().await;
        let issued = tm.issue_tokens(&store, &user).await.unwrap();

        let claims = tm.verify_access(&issued.access_token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "erin");
        assert_eq!(claims.email, "erin@example.com");
        assert_eq!(claims.full_name, "Test User");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(issued.user.id, user.id);
    }

    #[tokio::test]
    async fn issue_persists_refresh_token() {
        let tm = manager();
        let (store, user) = seeded().await;
        let issued = tm.issue_tokens(&store, &user).await.unwrap();
        let stored = store.get(user.id).await.unwrap().refresh_token;
        assert_eq!(stored.as_deref(), Some(issued.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn rotation_replaces_both_tokens() {
        let tm = manager();
        let (store, user) = seeded().await;
        let first = tm.issue_tokens(&store, &user).await.unwrap();

        let second = tm
            .verify_and_rotate_refresh(&store, &first.refresh_token)
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_ne!(second.access_token, first.access_token);

        // the consumed token is now stale
        let err = tm
            .verify_and_rotate_refresh(&store, &first.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn second_login_invalidates_previous_refresh_token() {
        let tm = manager();
        let (store, user) = seeded().await;
        let first = tm.issue_tokens(&store, &user).await.unwrap();
        let _second = tm.issue_tokens(&store, &user).await.unwrap();

        let err = tm
            .verify_and_rotate_refresh(&store, &first.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn revoke_blocks_refresh_before_expiry() {
        let tm = manager();
        let (store, user) = seeded().await;
        let issued = tm.issue_tokens(&store, &user).await.unwrap();

        tm.revoke(&store, user.id).await.unwrap();
        let err = tm
            .verify_and_rotate_refresh(&store, &issued.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn refresh_for_missing_user_is_not_found() {
        let tm = manager();
        let token = tm.sign_refresh(Uuid::new_v4()).unwrap();
        let store = InMemoryUserStore::new();
        let err = tm.verify_and_rotate_refresh(&store, &token).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn token_classes_are_not_interchangeable() {
        let tm = manager();
        let (store, user) = seeded().await;
        let issued = tm.issue_tokens(&store, &user).await.unwrap();

        assert!(matches!(
            tm.verify_access(&issued.refresh_token),
            Err(TokenError::Invalid(_))
        ));
        assert!(matches!(
            tm.verify_refresh(&issued.access_token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.access_ttl_minutes = -10;
        let tm = TokenManager::new(&cfg);
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: "frank".into(),
            email: "frank@example.com".into(),
            full_name: "Frank".into(),
            password_hash: "hash".into(),
            avatar_url: "https://media/f.png".into(),
            cover_image_url: None,
            refresh_token: None,
            watch_history: vec![],
            created_at: now,
            updated_at: now,
        };
        let token = tm.sign_access(&user).unwrap();
        assert!(matches!(tm.verify_access(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = manager();
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.issuer = "bad-iss".into();
        cfg.audience = "bad-aud".into();
        let bad = TokenManager::new(&cfg);

        let token = good.sign_refresh(Uuid::new_v4()).unwrap();
        assert!(bad.verify_refresh(&token).is_err());
    }

    #[test]
    fn garbage_is_invalid() {
        let tm = manager();
        assert!(matches!(tm.verify_access("not.a.jwt"), Err(TokenError::Invalid(_))));
    }
}
