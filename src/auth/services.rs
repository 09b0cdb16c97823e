use tracing::{info, warn};

use crate::{
    auth::{
        dto::{LoginRequest, UpdatePasswordRequest},
        password::{hash_password, verify_password},
        tokens::IssuedTokens,
    },
    error::{AppError, AppResult},
    state::AppState,
    users::{repo_types::User, services::non_blank},
};

const MIN_PASSWORD_LEN: usize = 8;

/// Looks the user up by username or email, checks the password and issues a
/// fresh token pair.
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<IssuedTokens> {
    let username = non_blank(req.username.as_deref()).map(|s| s.to_lowercase());
    let email = non_blank(req.email.as_deref()).map(|s| s.to_lowercase());
    let password = req.password.filter(|p| !p.trim().is_empty());

    let password = match (username.is_some() || email.is_some(), password) {
        (true, Some(p)) => p,
        (has_identity, password) => {
            let mut fields = Vec::new();
            if !has_identity {
                fields.push("username or email".to_string());
            }
            if password.is_none() {
                fields.push("password".to_string());
            }
            return Err(AppError::Validation {
                message: "Username or email and password are required".into(),
                fields,
            });
        }
    };

    let user = state
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await
        .map_err(|e| AppError::upstream("Failed to load user", e))?
        .ok_or_else(|| {
            warn!(?username, ?email, "login unknown user");
            AppError::NotFound("User not found".into())
        })?;

    let ok = verify_password(&password, &user.password_hash)
        .map_err(|e| AppError::upstream("Failed to verify credentials", e))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Auth("Invalid user credentials".into()));
    }

    let issued = state.tokens.issue_tokens(state.users.as_ref(), &user).await?;
    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok(issued)
}

/// Replaces the password hash after checking the old password. The stored
/// hash is untouched on any failure.
pub async fn update_password(
    state: &AppState,
    user: &User,
    req: UpdatePasswordRequest,
) -> AppResult<()> {
    let old = req.old_password.filter(|p| !p.is_empty());
    let new = req.new_password.filter(|p| !p.trim().is_empty());
    let (old, new) = match (old, new) {
        (Some(o), Some(n)) => (o, n),
        (o, n) => {
            let fields = [("oldPassword", o.is_none()), ("newPassword", n.is_none())]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(f, _)| f.to_string())
                .collect();
            return Err(AppError::missing_fields(fields));
        }
    };

    if new.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let ok = verify_password(&old, &user.password_hash)
        .map_err(|e| AppError::upstream("Failed to verify credentials", e))?;
    if !ok {
        warn!(user_id = %user.id, "update password with wrong old password");
        return Err(AppError::Auth("Invalid old password".into()));
    }

    let hash = hash_password(&new).map_err(|e| AppError::upstream("Failed to hash password", e))?;
    state
        .users
        .set_password_hash(user.id, &hash)
        .await
        .map_err(|e| AppError::upstream("Failed to update password", e))?;

    info!(user_id = %user.id, "password changed");
    Ok(())
}
