use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::password::hash_password,
    error::{AppError, AppResult},
    state::AppState,
    storage::ext_from_mime,
    users::{
        repo::CreateUserError,
        repo_types::{NewUser, User},
        upload::{MultipartForm, UploadItem},
    },
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Default)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<UploadItem>,
    pub cover_image: Option<UploadItem>,
}

impl From<MultipartForm> for RegisterForm {
    fn from(mut form: MultipartForm) -> Self {
        Self {
            username: form.text("username").map(String::from),
            email: form.text("email").map(String::from),
            full_name: form.text("fullName").map(String::from),
            password: form.text("password").map(String::from),
            avatar: form.take_file("avatar"),
            cover_image: form.take_file("coverImage"),
        }
    }
}

/// Storage key and public URL of an uploaded image.
struct StoredImage {
    key: String,
    url: String,
}

async fn upload_image(
    state: &AppState,
    prefix: &str,
    owner: Uuid,
    item: UploadItem,
) -> anyhow::Result<StoredImage> {
    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}-{}.{}", prefix, owner, Uuid::new_v4(), ext);
    debug!(%key, file_name = ?item.file_name, size = item.body.len(), "uploading image");
    let url = state
        .storage
        .upload(&key, item.body, &item.content_type)
        .await?;
    Ok(StoredImage { key, url })
}

/// Best-effort removal of images whose owning user was never created.
async fn discard_images(state: &AppState, images: &[&StoredImage]) {
    for image in images {
        match state.storage.remove(&image.key).await {
            Ok(()) => debug!(key = %image.key, "discarded orphaned image"),
            Err(e) => warn!(error = %e, key = %image.key, "orphaned image left in media store"),
        }
    }
}

/// Validates the form, uploads the images and creates the user.
pub async fn register(state: &AppState, form: RegisterForm) -> AppResult<User> {
    let username = non_blank(form.username.as_deref()).map(|s| s.to_lowercase());
    let email = non_blank(form.email.as_deref()).map(|s| s.to_lowercase());
    let full_name = non_blank(form.full_name.as_deref()).map(String::from);
    let password = form.password.filter(|p| !p.trim().is_empty());

    let (username, email, full_name, password) = match (username, email, full_name, password) {
        (Some(u), Some(e), Some(f), Some(p)) => (u, e, f, p),
        (u, e, f, p) => {
            let fields = [
                ("username", u.is_none()),
                ("email", e.is_none()),
                ("fullName", f.is_none()),
                ("password", p.is_none()),
            ]
            .into_iter()
            .filter(|(_, missing)| *missing)
            .map(|(name, _)| name.to_string())
            .collect();
            return Err(AppError::missing_fields(fields));
        }
    };

    let existing = state
        .users
        .find_by_username_or_email(Some(username.as_str()), Some(email.as_str()))
        .await
        .map_err(|e| AppError::upstream("Failed to check existing users", e))?;
    if existing.is_some() {
        warn!(%username, %email, "username or email already registered");
        return Err(AppError::Conflict("Username or email already exist".into()));
    }

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }

    let avatar = form
        .avatar
        .ok_or_else(|| AppError::validation("Avatar is required"))?;

    let user_id = Uuid::new_v4();
    let avatar = upload_image(state, "avatars", user_id, avatar)
        .await
        .map_err(|e| AppError::upstream("Failed to upload avatar", e))?;

    let cover = match form.cover_image {
        Some(cover) => match upload_image(state, "covers", user_id, cover).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, %user_id, "cover image upload failed; continuing without it");
                None
            }
        },
        None => None,
    };
    let uploaded: Vec<&StoredImage> = std::iter::once(&avatar).chain(cover.as_ref()).collect();

    let password_hash = match hash_password(&password) {
        Ok(hash) => hash,
        Err(e) => {
            discard_images(state, &uploaded).await;
            return Err(AppError::upstream("Failed to hash password", e));
        }
    };

    let created = state
        .users
        .create(NewUser {
            id: user_id,
            username,
            email,
            full_name,
            password_hash,
            avatar_url: avatar.url.clone(),
            cover_image_url: cover.as_ref().map(|c| c.url.clone()),
        })
        .await;
    let user = match created {
        Ok(user) => user,
        Err(e) => {
            discard_images(state, &uploaded).await;
            return Err(match e {
                CreateUserError::Duplicate => {
                    AppError::Conflict("Username or email already exist".into())
                }
                CreateUserError::Other(e) => AppError::upstream("Failed to create user", e),
            });
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn update_avatar(
    state: &AppState,
    user: &User,
    avatar: Option<UploadItem>,
) -> AppResult<User> {
    let avatar = avatar.ok_or_else(|| AppError::validation("Avatar file is missing"))?;

    let image = upload_image(state, "avatars", user.id, avatar)
        .await
        .map_err(|e| AppError::upstream("Error while uploading avatar", e))?;

    let updated = state
        .users
        .set_avatar_url(user.id, &image.url)
        .await
        .map_err(|e| AppError::upstream("Failed to update avatar", e))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(user_id = %user.id, "avatar updated");
    Ok(updated)
}
