use crate::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// S3 accepts at most this many keys per DeleteObjects call
const DELETE_BATCH_SIZE: usize = 1000;

/// Errors returned by the object store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Failed to delete {key}: {message}")]
    Delete { key: String, message: String },

    #[error("Failed to list bucket objects: {0}")]
    List(String),

    #[error("Bulk delete left {failed} objects in place")]
    PartialDelete { failed: usize },

    #[error("Invalid request: {0}")]
    Request(String),
}

/// Object storage addressed by key, where the key is the uploaded file name
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, overwriting any previous object, and return its public URL
    async fn upload(&self, key: &str, body: Bytes, content_type: &str)
        -> Result<String, StorageError>;

    /// Remove a single object
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every object in the bucket, returning how many were deleted
    async fn delete_all(&self) -> Result<usize, StorageError>;

    /// Deterministic public URL for a stored key
    fn public_url(&self, key: &str) -> String;
}

/// Bytes left as-is in an object key path; `/` keeps prefix separators readable
const KEY_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Build the `https://{bucket}.{host}/{key}` URL for a stored object, percent-encoding the key
pub fn public_object_url(bucket: &str, host: &str, key: &str) -> String {
    let key = utf8_percent_encode(key, KEY_PATH);
    format!("https://{bucket}.{host}/{key}")
}

/// S3-backed object store
pub struct S3Store {
    client: S3Client,
    bucket: String,
    public_host: String,
}

impl S3Store {
    /// Create a new store from the shared AWS configuration
    pub fn new(sdk_config: &SdkConfig, config: &S3Config) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            public_host: config.public_host.clone(),
        }
    }

    /// List every key in the bucket, following continuation tokens
    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::List(DisplayErrorContext(&e).to_string()))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Image uploaded to S3");
        metrics::counter!("images.uploaded").increment(1);

        Ok(self.public_url(key))
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Image deleted from S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_all(&self) -> Result<usize, StorageError> {
        let keys = self.list_keys().await?;
        let mut deleted = 0;
        let mut failed = 0;

        for batch in delete_batches(&keys) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::Request(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::Request(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::Delete {
                    key: "*".to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;

            let errors = response.errors().len();
            failed += errors;
            deleted += batch.len() - errors;
        }

        if failed > 0 {
            return Err(StorageError::PartialDelete { failed });
        }

        info!(deleted_count = deleted, "Emptied bucket");
        Ok(deleted)
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.bucket, &self.public_host, key)
    }
}

/// Split keys into DeleteObjects-sized batches; an empty bucket yields no batches
fn delete_batches(keys: &[String]) -> impl Iterator<Item = &[String]> {
    keys.chunks(DELETE_BATCH_SIZE)
}

/// Content type for an uploaded file, from the client header or the extension
pub fn content_type_for(file_name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared.filter(|d| !d.is_empty()) {
        return declared.to_string();
    }

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        "gif" => "image/gif".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
