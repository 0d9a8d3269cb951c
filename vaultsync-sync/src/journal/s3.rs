//! S3-compatible object store.

use super::object_store::ObjectStore;
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

/// [`ObjectStore`] over an S3 bucket, optionally below a key prefix.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
        prefix: &str,
    ) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "vaultsync",
        );

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(region.into()))
            .credentials_provider(credentials)
            .behavior_version_latest();

        if let Some(endpoint) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint).force_path_style(true);
        }

        let prefix = prefix.trim_matches('/');
        Self {
            client: S3Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
        }
    }

    pub fn from_config(remote: &RemoteConfig) -> SyncResult<Self> {
        match remote {
            RemoteConfig::ObjectStore {
                endpoint,
                bucket,
                region,
                access_key_id,
                secret_access_key,
                prefix,
            } => Ok(Self::new(
                bucket.as_str(),
                region.as_str(),
                endpoint.as_deref(),
                access_key_id,
                secret_access_key,
                prefix,
            )),
            RemoteConfig::CouchDb { .. } => Err(SyncError::Config(
                "CouchDB remote given to the object store".into(),
            )),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn failure(key: &str, message: impl std::fmt::Display) -> SyncError {
        SyncError::ObjectStore {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn label(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> SyncResult<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::failure(key, format!("upload failed: {e}")))?;
        debug!("uploaded {size} bytes to s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(Self::failure(key, format!("download failed: {service_err}")));
            }
        };
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Self::failure(key, format!("failed to read body: {e}")))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn exists(&self, key: &str) -> SyncResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::failure(key, format!("head object failed: {service_err}")))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| Self::failure(prefix, format!("list failed: {e}")))?;
            keys.extend(resp.contents().iter().filter_map(|obj| {
                obj.key()
                    .and_then(|k| k.strip_prefix(self.prefix.as_str()))
                    .map(str::to_string)
            }));
            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::failure(key, format!("delete failed: {e}")))?;
        Ok(())
    }
}
