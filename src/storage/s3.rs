// mysqlbackuptool/src/storage/s3.rs
use async_trait::async_trait;
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};
use aws_sdk_s3 as s3;
use bytes::BytesMut;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::{ListingPage, ObjectStore, StoredObject};
use crate::config::StorageConfig;
use crate::errors::{BackupError, Result};

/// Size of the first multipart part. S3 requires at least 5 MiB for every part but the last.
const BASE_PART_SIZE: usize = 8 * 1024 * 1024;
/// Part size doubles after this many parts so the 10 000 part limit is never the ceiling.
const PARTS_PER_SIZE_STEP: i32 = 1000;
/// Largest object a single PutObject accepts.
const SINGLE_PUT_LIMIT: u64 = 5 * 1024 * 1024 * 1024;

fn part_size_for(part_number: i32) -> usize {
    let step = ((part_number - 1) / PARTS_PER_SIZE_STEP).clamp(0, 9) as u32;
    BASE_PART_SIZE << step
}

/// Reads from `body` until `buffer` holds `target` bytes or the stream ends.
async fn fill_part(
    body: &mut (dyn AsyncRead + Send + Unpin),
    buffer: &mut BytesMut,
    target: usize,
) -> std::io::Result<usize> {
    buffer.reserve(target.saturating_sub(buffer.len()));
    while buffer.len() < target {
        let wanted = (target - buffer.len()) as u64;
        if (&mut *body).take(wanted).read_buf(buffer).await? == 0 {
            break;
        }
    }
    Ok(buffer.len())
}

/// S3-compatible object storage (AWS, DigitalOcean Spaces, MinIO, ...).
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds one client for the whole run from the resolved storage configuration.
    pub async fn connect(storage_config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());

        if let Some(endpoint) = &storage_config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(region) = &storage_config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(path) = &storage_config.credentials_file {
            let files = EnvConfigFiles::builder()
                .with_file(EnvConfigFileKind::Credentials, path)
                .include_default_config_file(true)
                .build();
            loader = loader.profile_files(files);
        }
        if let Some(profile) = &storage_config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(creds) = &storage_config.static_credentials {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        }

        let sdk_config = loader.load().await;
        // Custom endpoints (MinIO, Spaces, Ceph) generally want path-style addressing.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(storage_config.endpoint_url.is_some())
            .build();

        S3ObjectStore {
            client: s3::Client::from_conf(s3_config),
            bucket: storage_config.bucket.clone(),
        }
    }

    async fn put_single(&self, key: &str, body: ByteStream) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                BackupError::Transfer(format!(
                    "PutObject s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        mut buffer: BytesMut,
    ) -> Result<u64> {
        let mut completed = Vec::new();
        let mut total: u64 = 0;
        let mut part_number: i32 = 1;

        while !buffer.is_empty() {
            let chunk = buffer.split().freeze();
            let chunk_len = chunk.len() as u64;

            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| {
                    BackupError::Transfer(format!(
                        "UploadPart {} of s3://{}/{} failed: {}",
                        part_number,
                        self.bucket,
                        key,
                        DisplayErrorContext(&e)
                    ))
                })?;

            completed.push(
                CompletedPart::builder()
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            total += chunk_len;
            debug!(part = part_number, bytes = chunk_len, total, "Uploaded part");

            part_number += 1;
            fill_part(body, &mut buffer, part_size_for(part_number))
                .await
                .map_err(|e| BackupError::Transfer(format!("Reading dump stream failed: {}", e)))?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                BackupError::Transfer(format!(
                    "CompleteMultipartUpload for s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(total)
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(
                key,
                upload_id,
                error = %DisplayErrorContext(&e),
                "Could not abort multipart upload; the bucket may keep orphaned parts until a lifecycle rule removes them"
            );
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListingPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                BackupError::Storage(format!(
                    "ListObjectsV2 on s3://{}/{} failed: {}",
                    self.bucket,
                    prefix,
                    DisplayErrorContext(&e)
                ))
            })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| StoredObject {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListingPage { objects, next })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Storage(format!(
                    "DeleteObject s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn upload_stream(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut buffer = BytesMut::with_capacity(BASE_PART_SIZE);
        let first = fill_part(body, &mut buffer, BASE_PART_SIZE)
            .await
            .map_err(|e| BackupError::Transfer(format!("Reading dump stream failed: {}", e)))?;

        // The whole stream fit in one part: a plain PutObject is enough.
        if first < BASE_PART_SIZE {
            self.put_single(key, ByteStream::from(buffer.freeze())).await?;
            return Ok(first as u64);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Transfer(format!(
                    "CreateMultipartUpload for s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| BackupError::Transfer("CreateMultipartUpload returned no upload id".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, body, buffer).await {
            Ok(total) => Ok(total),
            Err(e) => {
                self.abort_upload(key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_file(&self, key: &str, path: &Path) -> Result<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        info!(
            "Uploading {} ({} bytes) to s3://{}/{}",
            path.display(),
            size,
            self.bucket,
            key
        );

        if size > SINGLE_PUT_LIMIT {
            let mut file = tokio::fs::File::open(path).await?;
            return self.upload_stream(key, &mut file).await;
        }

        let body = ByteStream::from_path(path).await.map_err(|e| {
            BackupError::Transfer(format!(
                "Failed to create ByteStream from file {}: {}",
                path.display(),
                e
            ))
        })?;
        self.put_single(key, body).await?;
        Ok(size)
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
