use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// A file part received in a multipart form.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
}

/// Text fields and file parts of a multipart body, keyed by field name.
/// Later parts with the same name replace earlier ones; empty files are dropped.
#[derive(Debug, Default)]
pub struct MultipartForm {
    texts: HashMap<String, String>,
    files: HashMap<String, UploadItem>,
}

impl MultipartForm {
    pub async fn collect(mut mp: Multipart) -> AppResult<Self> {
        let mut form = Self::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| AppError::validation(format!("Malformed multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Malformed multipart body: {e}")))?;
                debug!(field = %name, size = body.len(), %content_type, "multipart file received");
                if !body.is_empty() {
                    form.files.insert(
                        name,
                        UploadItem {
                            body,
                            content_type,
                            file_name,
                        },
                    );
                }
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Malformed multipart body: {e}")))?;
                form.texts.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadItem> {
        self.files.remove(name)
    }
}
