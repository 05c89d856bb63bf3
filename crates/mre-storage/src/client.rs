//! S3 client for the feature cache bucket.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (S3-compatible stores, local testing)
    pub endpoint_url: Option<String>,
    /// Static credentials; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Bucket holding cached feature blobs
    pub bucket_name: String,
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("FEATURE_CACHE_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("FEATURE_CACHE_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("FEATURE_CACHE_SECRET_ACCESS_KEY").ok(),
            bucket_name: std::env::var("FEATURE_CACHE_BUCKET")
                .map_err(|_| StorageError::config_error("FEATURE_CACHE_BUCKET not set"))?,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

/// Thin S3 wrapper scoped to one bucket.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let client = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "static");
                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials)
                    .force_path_style(true);
                if let Some(ref endpoint) = config.endpoint_url {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(ref endpoint) = config.endpoint_url {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                return Err(StorageError::config_error(
                    "FEATURE_CACHE_ACCESS_KEY_ID and FEATURE_CACHE_SECRET_ACCESS_KEY must be set together",
                ))
            }
        };

        Ok(Self {
            client,
            bucket: config.bucket_name,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store a JSON document.
    pub async fn put_json(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        debug!(key = %key, bytes = body.len(), "Uploading object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(())
    }

    /// Fetch an object; `None` when the key does not exist.
    pub async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.to_string().contains("NoSuchKey") => return Ok(None),
            Err(e) => return Err(StorageError::download_failed(e.to_string())),
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    /// List everything under `prefix`, following continuation tokens.
    ///
    /// With a delimiter, keys below the next delimiter are rolled up into
    /// `Listing::prefixes`.
    pub async fn list(&self, prefix: &str, delimiter: Option<&str>) -> StorageResult<Listing> {
        let mut listing = Listing::default();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_delimiter(delimiter.map(str::to_string))
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            listing
                .keys
                .extend(response.contents().iter().filter_map(|o| o.key.clone()));
            listing.prefixes.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix.clone()),
            );

            let truncated = response.is_truncated() == Some(true);
            match response.next_continuation_token {
                Some(next) if truncated => token = Some(next),
                _ => break,
            }
        }

        debug!(
            prefix = %prefix,
            keys = listing.keys.len(),
            prefixes = listing.prefixes.len(),
            "Listed feature cache"
        );
        Ok(listing)
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = e.to_string();
                if message.contains("NotFound") || message.contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(message))
                }
            }
        }
    }

    /// Verify the bucket is reachable with the configured credentials.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("bucket {} unreachable: {}", self.bucket, e)))?;
        info!(bucket = %self.bucket, "Feature cache bucket reachable");
        Ok(())
    }
}

/// Result of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Full object keys
    pub keys: Vec<String>,
    /// Rolled-up common prefixes, each ending in the delimiter
    pub prefixes: Vec<String>,
}
