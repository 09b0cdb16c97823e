use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;

/// External media hosting. `upload` returns the public URL of the stored object.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct S3MediaStore {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3MediaStore {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}", key))?;
        Ok(format!("{}/{}", self.public_url, key))
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {}", key))?;
        Ok(())
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    /// Records uploads and removals in memory; `failing()` rejects every upload.
    #[derive(Default)]
    pub struct FakeMediaStore {
        pub uploads: Mutex<Vec<String>>,
        pub removed: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl FakeMediaStore {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MediaStore for FakeMediaStore {
        async fn upload(&self, key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("fake media store rejects uploads");
            }
            self.uploads.lock().await.push(key.to_string());
            Ok(format!("https://media.fake.local/{}", key))
        }

        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.removed.lock().await.push(key.to_string());
            Ok(())
        }
    }
}
