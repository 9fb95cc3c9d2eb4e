// s3-db-backup/src/backup/s3_storage.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tracing::debug;

use crate::config::resolve::ResolvedSettings;
use crate::errors::{AppError, Result};

/// The object storage calls a backup run makes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, file: &Path) -> Result<()>;

    /// Every key in `bucket` starting with `prefix`, across all listing pages.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Builds one [`ObjectStore`] per connection from its resolved settings.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn connect(&self, settings: &ResolvedSettings) -> Result<Box<dyn ObjectStore>>;
}

/// Any S3-compatible service reachable through the AWS SDK.
pub struct S3Store {
    client: s3::Client,
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, bucket: &str, key: &str, file: &Path) -> Result<()> {
        let upload_error = |message: String| AppError::UploadFailure {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let body = ByteStream::from_path(file)
            .await
            .map_err(|e| upload_error(format!("cannot read {}: {}", file.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| upload_error(DisplayErrorContext(&e).to_string()))?;

        debug!(bucket, key, "Object uploaded");
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| AppError::RetentionFailure {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;

            keys.extend(page.contents().iter().filter_map(|object| object.key().map(str::to_string)));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket, prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "failed to delete s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// Creates [`S3Store`]s with static credentials from the resolved settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StoreFactory;

#[async_trait]
impl StoreFactory for S3StoreFactory {
    async fn connect(&self, settings: &ResolvedSettings) -> Result<Box<dyn ObjectStore>> {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None, // session_token
            None, // expiry
            "Static",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let mut builder = s3::config::Builder::from(&sdk_config);
        // Left alone when unset so the SDK picks the addressing style.
        if let Some(path_style) = settings.force_path_style {
            builder = builder.force_path_style(path_style);
        }

        debug!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = %settings.region,
            "S3 client configured"
        );
        Ok(Box::new(S3Store {
            client: s3::Client::from_conf(builder.build()),
        }))
    }
}
