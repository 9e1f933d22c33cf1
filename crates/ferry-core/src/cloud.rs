//! Cloud-class distribution backends.
//!
//! Exactly one of three strategies is active per run, chosen by
//! configuration and never by availability probing:
//!
//! - object-storage-v2: content-addressed dedup by sha3-512, short-lived
//!   credential grant, streamed object upload with byte progress;
//! - legacy direct upload: one multipart POST to the platform itself;
//! - third-party sync: an external command scoped to the one artifact.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials as AwsCredentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::artifact::NormalizedArtifact;
use crate::endpoints::Endpoint;
use crate::error::{DistributionError, StepStatus};
use crate::metadata::extract_xml_value;
use crate::retry::{Attempt, RetryPolicy, with_retry};
use crate::transport::{RequestBody, Transport, TransportRequest};

/// Part size for the streamed object upload.
const UPLOAD_PART_SIZE: usize = 5 * 1024 * 1024;

/// Short-lived, scoped object-storage credentials. Never persisted;
/// single-use per artifact version.
#[derive(Debug, Clone)]
pub struct UploadCredentialGrant {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
    pub bucket: String,
    pub path_prefix: String,
    pub region: String,
    pub expiration: String,
}

impl UploadCredentialGrant {
    /// Object key for the artifact under this grant's scope.
    pub fn key_for(&self, file_name: &str) -> String {
        let prefix = self.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

fn parse_grant(payload: &Value) -> Result<UploadCredentialGrant> {
    let field = |name: &'static str| -> Result<String> {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DistributionError::MissingResponseField {
                    operation: "credential grant",
                    field: name,
                }
                .into()
            })
    };
    Ok(UploadCredentialGrant {
        access_key_id: field("accessKeyId")?,
        secret_key: field("secretAccessKey")?,
        session_token: field("sessionToken")?,
        bucket: field("bucket")?,
        path_prefix: field("path")?,
        region: field("region")?,
        expiration: field("expiration")?,
    })
}

/// Result of probing the cloud backend for a same-named object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingObjectProbe {
    pub found: bool,
    pub remote_digest: Option<String>,
}

fn probe_from_listing(listing: &Value, file_name: &str) -> ExistingObjectProbe {
    let entry = listing.as_array().and_then(|files| {
        files
            .iter()
            .find(|f| f.get("fileName").and_then(Value::as_str) == Some(file_name))
    });
    match entry {
        Some(entry) => ExistingObjectProbe {
            found: true,
            remote_digest: entry
                .get("sha3_512")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        None => ExistingObjectProbe {
            found: false,
            remote_digest: None,
        },
    }
}

/// Byte-progress accumulator for the streamed upload. The transfer client
/// may report from an internal worker, hence the mutex.
#[derive(Debug)]
pub struct UploadProgress {
    total: u64,
    state: Mutex<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    sent: u64,
    last_logged_decile: u64,
}

impl UploadProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn add(&self, bytes: u64) {
        let mut state = self.state.lock().expect("progress mutex poisoned");
        state.sent += bytes;
        let decile = if self.total == 0 {
            10
        } else {
            state.sent * 10 / self.total
        };
        if decile > state.last_logged_decile {
            state.last_logged_decile = decile;
            info!(
                sent = state.sent,
                total = self.total,
                percent = decile * 10,
                "upload progress"
            );
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.state.lock().expect("progress mutex poisoned").sent
    }
}

/// Object-storage seam, mockable for tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream a local file to the granted bucket/key, reporting progress.
    async fn put_file(
        &self,
        grant: &UploadCredentialGrant,
        key: &str,
        path: &Path,
        progress: &UploadProgress,
    ) -> Result<()>;
}

/// Production object store over the AWS SDK, built per grant since the
/// credentials are scoped and short-lived.
#[derive(Debug, Default)]
pub struct S3ObjectStore;

impl S3ObjectStore {
    async fn client_for(&self, grant: &UploadCredentialGrant) -> Client {
        let credentials = AwsCredentials::new(
            grant.access_key_id.clone(),
            grant.secret_key.clone(),
            Some(grant.session_token.clone()),
            None,
            "ferry-upload-grant",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(grant.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        Client::new(&config)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(
        &self,
        grant: &UploadCredentialGrant,
        key: &str,
        path: &Path,
        progress: &UploadProgress,
    ) -> Result<()> {
        let client = self.client_for(grant).await;

        let create = client
            .create_multipart_upload()
            .bucket(&grant.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("create multipart upload failed: {e}"))?;
        let upload_id = create
            .upload_id()
            .context("create multipart upload returned no upload id")?
            .to_string();

        match self
            .stream_parts(&client, grant, key, &upload_id, path, progress)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                // Don't leave a dangling multipart upload on the bucket.
                let _ = client
                    .abort_multipart_upload()
                    .bucket(&grant.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }
}

impl S3ObjectStore {
    async fn stream_parts(
        &self,
        client: &Client,
        grant: &UploadCredentialGrant,
        key: &str,
        upload_id: &str,
        path: &Path,
        progress: &UploadProgress,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open upload file: {}", path.display()))?;

        let mut parts = Vec::new();
        let mut part_number = 1i32;
        loop {
            let mut buffer = vec![0u8; UPLOAD_PART_SIZE];
            let mut filled = 0;
            while filled < UPLOAD_PART_SIZE {
                let read = file.read(&mut buffer[filled..]).await?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            if filled == 0 && part_number > 1 {
                break;
            }
            buffer.truncate(filled);
            let last_part = filled < UPLOAD_PART_SIZE;

            let uploaded = client
                .upload_part()
                .bucket(&grant.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| anyhow!("upload part {part_number} failed: {e}"))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            progress.add(filled as u64);
            debug!(part = part_number, bytes = filled, "part uploaded");

            if last_part {
                break;
            }
            part_number += 1;
        }

        client
            .complete_multipart_upload()
            .bucket(&grant.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| anyhow!("complete multipart upload failed: {e}"))?;
        Ok(())
    }
}

/// Drives whichever cloud strategy the run selected.
pub struct CloudDistributor<'a> {
    pub transport: &'a dyn Transport,
    pub store: &'a dyn ObjectStore,
    pub base_url: &'a str,
    pub policy: RetryPolicy,
}

impl CloudDistributor<'_> {
    /// Content-addressed v2 path: probe, then skip / replace / create.
    pub async fn distribute_v2(
        &self,
        artifact: &NormalizedArtifact,
        local_sha3_512: &str,
    ) -> Result<StepStatus> {
        let probe = self.probe_cloud_file(&artifact.file_name).await?;

        if probe.found {
            if probe.remote_digest.as_deref() == Some(local_sha3_512) {
                info!(
                    file = %artifact.file_name,
                    "cloud object already matches local digest, skipping upload"
                );
                return Ok(StepStatus::skipped("cloud object already up to date"));
            }
            info!(file = %artifact.file_name, "cloud object digest differs, deleting stale object");
            self.delete_cloud_file(&artifact.file_name).await?;
        }

        self.upload_with_grant(artifact).await?;
        Ok(StepStatus::Succeeded)
    }

    async fn probe_cloud_file(&self, file_name: &str) -> Result<ExistingObjectProbe> {
        let url = Endpoint::CloudFiles.url(self.base_url);
        let listing = with_retry(&self.policy, "cloud file listing", || {
            let url = url.clone();
            async move {
                let response = self
                    .transport
                    .send(TransportRequest::get(url).with_accept("application/json"))
                    .await?;
                if !response.is_success() {
                    return Ok(Attempt::Retry(format!("status {}", response.status)));
                }
                let payload = response.json()?;
                let files = payload
                    .get(Endpoint::CloudFiles.envelope_key().expect("listing has envelope"))
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                Ok(Attempt::Done(files))
            }
        })
        .await?;
        Ok(probe_from_listing(&listing, file_name))
    }

    async fn delete_cloud_file(&self, file_name: &str) -> Result<()> {
        let url = Endpoint::CloudFileByName.url_with(self.base_url, file_name);
        with_retry(&self.policy, "cloud file delete", || {
            let url = url.clone();
            async move {
                let response = self.transport.send(TransportRequest::delete(url)).await?;
                if response.is_success() {
                    Ok(Attempt::Done(()))
                } else {
                    Ok(Attempt::Retry(format!("status {}", response.status)))
                }
            }
        })
        .await
    }

    /// Two-step upload: request a grant, then stream the object. A failed
    /// stream discards the grant and requests a fresh one on the next
    /// attempt, since grants are short-lived and single-use.
    async fn upload_with_grant(&self, artifact: &NormalizedArtifact) -> Result<()> {
        let size = std::fs::metadata(&artifact.path)
            .with_context(|| format!("Failed to stat artifact: {}", artifact.path.display()))?
            .len();

        let mut last_outcome = String::new();
        for attempt in 1..=self.policy.max_attempts {
            let grant = self.request_grant(&artifact.file_name).await?;
            let key = grant.key_for(&artifact.file_name);
            let progress = UploadProgress::new(size);
            info!(
                file = %artifact.file_name,
                bucket = %grant.bucket,
                %key,
                size,
                attempt,
                "streaming artifact to object storage"
            );
            match self
                .store
                .put_file(&grant, &key, &artifact.path, &progress)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "object upload attempt failed");
                    last_outcome = e.to_string();
                }
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.sleep).await;
            }
        }

        Err(DistributionError::RetryExhausted {
            operation: "cloud object upload".to_string(),
            attempts: self.policy.max_attempts,
            last_outcome,
        }
        .into())
    }

    async fn request_grant(&self, file_name: &str) -> Result<UploadCredentialGrant> {
        let url = Endpoint::CloudUploadGrant.url(self.base_url);
        let body = serde_json::json!({ "fileName": file_name });
        with_retry(&self.policy, "credential grant", || {
            let request = TransportRequest::post(url.clone())
                .with_accept("application/json")
                .with_body(RequestBody::Json(body.clone()));
            async move {
                let response = self.transport.send(request).await?;
                if !response.is_success() {
                    return Ok(Attempt::Retry(format!("status {}", response.status)));
                }
                let grant = parse_grant(&response.json()?)?;
                Ok(Attempt::Done(grant))
            }
        })
        .await
    }

    /// Legacy path: one multipart POST of the raw bytes to the platform's
    /// fixed upload endpoint. Returns the package id parsed from the body.
    pub async fn distribute_legacy(
        &self,
        artifact: &NormalizedArtifact,
        existing_id: Option<u64>,
    ) -> Result<(StepStatus, u64)> {
        let url = Endpoint::LegacyFileUpload.url(self.base_url);
        let object_id = existing_id.map_or_else(|| "0".to_string(), |id| id.to_string());

        let body = with_retry(&self.policy, "legacy package upload", || {
            let request = TransportRequest::post(url.clone())
                .with_header("DESTINATION", "0")
                .with_header("OBJECT_ID", object_id.clone())
                .with_header("FILE_TYPE", "0")
                .with_header("FILE_NAME", artifact.file_name.clone())
                .with_body(RequestBody::FileUpload {
                    path: artifact.path.clone(),
                    file_name: artifact.file_name.clone(),
                    fields: Vec::new(),
                });
            async move {
                let response = self.transport.send(request).await?;
                if response.is_success() {
                    Ok(Attempt::Done(response.body))
                } else {
                    Ok(Attempt::Retry(format!("status {}", response.status)))
                }
            }
        })
        .await?;

        let id = match existing_id {
            Some(id) => id,
            None => extract_xml_value(&body, "id")
                .and_then(|raw| raw.parse::<u64>().ok())
                .ok_or(DistributionError::MissingResponseField {
                    operation: "legacy package upload",
                    field: "id",
                })?,
        };
        Ok((StepStatus::Succeeded, id))
    }

    /// Third-party sync: delegate to the external command, scoped to the
    /// one artifact by an explicit include filter.
    pub async fn distribute_third_party(
        &self,
        artifact: &NormalizedArtifact,
        command_line: &str,
    ) -> Result<StepStatus> {
        let (program, args) = build_sync_command(command_line, &artifact.file_name)?;
        info!(%program, ?args, "running third-party sync command");

        let status = tokio::process::Command::new(&program)
            .args(&args)
            .status()
            .await
            .with_context(|| format!("Failed to run sync command: {program}"))?;

        if status.success() {
            Ok(StepStatus::Succeeded)
        } else {
            error!(%status, "third-party sync command failed");
            Ok(StepStatus::failed(format!("sync command exited with {status}")))
        }
    }
}

/// Split a configured command line and append the single-file include
/// filter for the artifact.
fn build_sync_command(command_line: &str, file_name: &str) -> Result<(String, Vec<String>)> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .context("sync_command is empty")?;
    let mut args: Vec<String> = parts.collect();
    args.push("--include".to_string());
    args.push(file_name.to_string());
    Ok((program, args))
}
