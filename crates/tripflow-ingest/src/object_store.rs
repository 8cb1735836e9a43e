//! Object store access
//!
//! The pipeline only ever streams whole objects out of the store, so the seam
//! is a single [`ObjectStore::copy_to`]. [`S3ObjectStore`] talks to S3 or any
//! S3-compatible endpoint.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    Client,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument};

use crate::config::ObjectStoreSettings;
use crate::error::ObjectStoreError;

/// Read side of an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object's bytes into `writer`. Returns the number of bytes written.
    ///
    /// On error, `writer` may already hold a prefix of the object.
    async fn copy_to(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ObjectStoreError>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(settings: &ObjectStoreSettings) -> Self {
        debug!("Initializing object store with settings: {:?}", settings);

        let region = Region::new(settings.region.clone());

        let mut s3_config_builder = match (&settings.access_key, &settings.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "tripflow-settings");
                aws_sdk_s3::Config::builder()
                    .credentials_provider(credentials)
                    .region(region)
            }
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        s3_config_builder = s3_config_builder.force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = %settings.region,
            "Object store client initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, writer))]
    async fn copy_to(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ObjectStoreError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    ObjectStoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    ObjectStoreError::Request {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        let mut body = response.body;
        let mut written: u64 = 0;

        loop {
            let chunk = body.try_next().await.map_err(|e| ObjectStoreError::Stream {
                bucket: bucket.to_string(),
                key: key.to_string(),
                bytes: written,
                message: DisplayErrorContext(&e).to_string(),
            })?;

            let Some(chunk) = chunk else {
                break;
            };

            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;

        debug!("Downloaded {} bytes from s3://{}/{}", written, bucket, key);
        Ok(written)
    }
}
