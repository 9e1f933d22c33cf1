//! Top-level distribution run.
//!
//! One orchestrator invocation sequences the whole pipeline:
//! normalize → hash → resolve capability → check existing → shares →
//! cloud → metadata → optional recalculation. There is no rollback of
//! partially completed distribution; re-running is idempotent through the
//! existence and hash probes.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{self, Artifact};
use crate::capability::{self, Capability};
use crate::cloud::{CloudDistributor, ObjectStore};
use crate::config::{CloudBackend, RunConfig};
use crate::digest::{self, DigestAlgorithm};
use crate::endpoints::Endpoint;
use crate::error::{DistributionError, StepStatus};
use crate::metadata::{
    self, MetadataReconciler, PackageMetadata, build_current_record, build_legacy_record,
};
use crate::retry::RetryPolicy;
use crate::share;
use crate::transport::{Transport, TransportRequest};

/// Externally observable outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub package_uploaded: bool,
    pub metadata_updated: bool,
    pub recalculated: bool,
    pub package_id: Option<u64>,
}

/// Structured summary for downstream collaborators (e.g. a notifier).
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub file_name: String,
    pub display_name: String,
    pub category: Option<String>,
    pub platform_version: String,
    pub uploaded: bool,
    pub metadata_updated: bool,
    pub recalculated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub result: RunResult,
    pub summary: RunSummary,
}

/// Coordinates one distribution run. Holds no mutable state; every run
/// takes the immutable config in and returns a [`RunReport`].
pub struct DistributionOrchestrator<'a> {
    config: &'a RunConfig,
    transport: &'a dyn Transport,
    store: &'a dyn ObjectStore,
}

impl<'a> DistributionOrchestrator<'a> {
    pub fn new(
        config: &'a RunConfig,
        transport: &'a dyn Transport,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            transport,
            store,
        }
    }

    pub async fn run(&self, artifact: &Artifact) -> Result<RunReport> {
        let policy = RetryPolicy::from_config(self.config);

        // NORMALIZE
        let normalized = artifact::normalize(artifact)?;

        // HASH: one streaming pass for everything this run may need.
        let digests = digest::digest_file(&normalized.path, &self.digest_algorithms())?;

        // RESOLVE_CAPABILITY
        let platform_version = self.fetch_platform_version().await?;
        let capability = capability::resolve(&platform_version)?;
        info!(
            version = %platform_version,
            legacy_mode = capability.legacy_mode,
            "platform capability resolved"
        );

        // CHECK_EXISTING
        let existing_id = self
            .lookup_existing_id(capability, &normalized.file_name)
            .await?;
        debug!(?existing_id, file = %normalized.file_name, "existing package lookup");

        let backend = self.effective_backend(capability);
        let meta = PackageMetadata::from_config(
            self.config,
            &artifact.display_name,
            &normalized.file_name,
        );
        let reconciler = MetadataReconciler {
            transport: self.transport,
            base_url: self.config.base_url(),
            policy,
        };

        let mut package_id = existing_id;
        let mut package_uploaded = false;
        let mut metadata_updated = false;

        // Current API generation: the metadata record precedes the binary;
        // its object id is the prerequisite for the upload step.
        if !capability.legacy_mode
            && !self.config.skip_metadata_upload
            && (package_id.is_none() || self.config.replace_metadata)
        {
            let category_id = self.resolved_category_id(&reconciler).await?;
            let record = build_current_record(&meta, category_id);
            package_id = Some(reconciler.submit_current(record, package_id).await?);
            metadata_updated = true;
        }

        // DISTRIBUTE_SHARES
        let share_count = self.config.shares.len();
        for (index, share_config) in self.config.shares.iter().enumerate() {
            let report = share::distribute_to_share(
                share_config,
                &normalized,
                self.config.replace_package,
                self.config.mount_root.as_deref(),
            )?;
            for warning in &report.warnings {
                warn!(share = %share_config.url, %warning, "share distribution warning");
            }
            if final_share_sets_uploaded(index, share_count, backend.is_some(), &report.status) {
                package_uploaded = true;
            }
        }

        // DISTRIBUTE_CLOUD
        if let Some(backend) = backend {
            let distributor = CloudDistributor {
                transport: self.transport,
                store: self.store,
                base_url: self.config.base_url(),
                policy,
            };
            match backend {
                CloudBackend::ObjectStorageV2 => {
                    let sha3_512 = digests
                        .sha3_512
                        .as_deref()
                        .context("sha3-512 digest required for object-storage-v2")?;
                    let status = distributor.distribute_v2(&normalized, sha3_512).await?;
                    // A dedup skip means the remote already holds this
                    // content: the required work is done.
                    package_uploaded = !matches!(status, StepStatus::Failed { .. });
                }
                CloudBackend::LegacyDirectUpload => {
                    if package_id.is_some() && !self.config.replace_package {
                        info!(
                            file = %normalized.file_name,
                            "not replacing existing package on platform"
                        );
                    } else {
                        let (_, id) = distributor
                            .distribute_legacy(&normalized, package_id)
                            .await?;
                        package_id = Some(id);
                        package_uploaded = true;
                    }
                }
                CloudBackend::ThirdPartySync => {
                    let command = self
                        .config
                        .sync_command
                        .as_deref()
                        .ok_or_else(|| {
                            DistributionError::Config(
                                "third-party-sync backend requires sync_command".into(),
                            )
                        })?;
                    let status = distributor
                        .distribute_third_party(&normalized, command)
                        .await?;
                    package_uploaded = status.is_succeeded();
                }
            }
        }

        // A replaced binary under the current generation refreshes the
        // record too, even when no pre-distribution submission happened.
        if !capability.legacy_mode
            && !self.config.skip_metadata_upload
            && !metadata_updated
            && package_uploaded
            && self.config.replace_package
        {
            let category_id = self.resolved_category_id(&reconciler).await?;
            let record = build_current_record(&meta, category_id);
            package_id = Some(reconciler.submit_current(record, package_id).await?);
            metadata_updated = true;
        }

        // RECONCILE_METADATA (legacy generation: the binary upload came
        // first and established the row; metadata decorates it).
        if capability.legacy_mode
            && !self.config.skip_metadata_upload
            && (package_uploaded || self.config.replace_metadata)
        {
            let hash =
                metadata::legacy_hash_fields(backend, self.config.use_md5, &digests);
            let record = build_legacy_record(&meta, hash);
            package_id = Some(reconciler.submit_legacy(record, package_id).await?);
            metadata_updated = true;
        }

        // RECALCULATE: advisory, always last, with a fresh token since the
        // run may have outlived the original one.
        let mut recalculated = false;
        if self.config.recalculate_after_upload && metadata_updated && !capability.legacy_mode {
            recalculated = self.recalculate_inventory().await;
        }

        let result = RunResult {
            package_uploaded,
            metadata_updated,
            recalculated,
            package_id,
        };
        let summary = RunSummary {
            file_name: normalized.file_name.clone(),
            display_name: artifact.display_name.clone(),
            category: self.config.category.clone(),
            platform_version,
            uploaded: package_uploaded,
            metadata_updated,
            recalculated,
        };
        info!(?result, "distribution run complete");
        Ok(RunReport { result, summary })
    }

    /// Category id for the current record, when a non-empty name is set.
    async fn resolved_category_id(
        &self,
        reconciler: &MetadataReconciler<'_>,
    ) -> Result<Option<u64>> {
        match self.config.category.as_deref() {
            Some(name) if !name.is_empty() => {
                Ok(Some(reconciler.resolve_category_id(name).await?))
            }
            _ => Ok(None),
        }
    }

    /// Digest algorithms this run can need, so hashing stays one pass.
    fn digest_algorithms(&self) -> Vec<DigestAlgorithm> {
        let mut algorithms = vec![DigestAlgorithm::Sha512];
        if self.config.use_md5 {
            algorithms.push(DigestAlgorithm::Md5);
        }
        // The v2 backend may be selected explicitly, or implicitly when no
        // other distribution target is configured.
        let v2_possible = self.config.cloud_backend == Some(CloudBackend::ObjectStorageV2)
            || (self.config.cloud_backend.is_none() && self.config.shares.is_empty());
        if v2_possible {
            algorithms.push(DigestAlgorithm::Sha3_512);
        }
        algorithms
    }

    /// Cloud strategy for this run: the configured one, or the generation
    /// default when no share targets are configured at all.
    fn effective_backend(&self, capability: Capability) -> Option<CloudBackend> {
        match self.config.cloud_backend {
            Some(backend) => Some(backend),
            None if self.config.shares.is_empty() => {
                if capability.legacy_mode {
                    Some(CloudBackend::LegacyDirectUpload)
                } else {
                    Some(CloudBackend::ObjectStorageV2)
                }
            }
            None => None,
        }
    }

    async fn fetch_platform_version(&self) -> Result<String> {
        let endpoint = Endpoint::PlatformVersion;
        let response = self
            .transport
            .send(TransportRequest::get(endpoint.url(self.config.base_url())).with_accept("application/json"))
            .await?;
        if !response.is_success() {
            return Err(DistributionError::UnexpectedStatus {
                operation: "platform version",
                status: response.status,
            }
            .into());
        }
        let payload = response.json()?;
        let version = crate::transport::unwrap_envelope(endpoint, &payload)?;
        version
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                DistributionError::MissingResponseField {
                    operation: "platform version",
                    field: "version",
                }
                .into()
            })
    }

    /// Find an existing package id by file name, using the lookup shape
    /// of the resolved generation.
    async fn lookup_existing_id(
        &self,
        capability: Capability,
        file_name: &str,
    ) -> Result<Option<u64>> {
        if capability.legacy_mode {
            let url = Endpoint::LegacyPackageByName.url_with(self.config.base_url(), file_name);
            let response = self
                .transport
                .send(TransportRequest::get(url).with_accept("application/xml"))
                .await?;
            if !response.is_success() {
                return Ok(None);
            }
            Ok(metadata::extract_xml_value(&response.body, "id")
                .and_then(|raw| raw.parse().ok()))
        } else {
            let url = format!(
                "{}?page=0&page-size=1&filter=fileName%3D%3D%22{}%22",
                Endpoint::CurrentPackages.url(self.config.base_url()),
                crate::endpoints::urlencode_segment(file_name)
            );
            let response = self
                .transport
                .send(TransportRequest::get(url).with_accept("application/json"))
                .await?;
            if !response.is_success() {
                return Ok(None);
            }
            let payload = response.json()?;
            let id = payload
                .get("results")
                .and_then(|r| r.as_array())
                .and_then(|r| r.first())
                .and_then(|entry| entry.get("id"))
                .and_then(|v| match v {
                    serde_json::Value::Number(n) => n.as_u64(),
                    serde_json::Value::String(s) => s.parse().ok(),
                    _ => None,
                });
            Ok(id)
        }
    }

    /// Advisory inventory recalculation; never fatal.
    async fn recalculate_inventory(&self) -> bool {
        if let Err(e) = self.transport.refresh_auth().await {
            warn!(error = %e, "token refresh before recalculation failed");
            return false;
        }
        let url = Endpoint::RefreshInventory.url(self.config.base_url());
        match self.transport.send(TransportRequest::post(url)).await {
            Ok(response) if response.is_success() => {
                info!("cloud inventory recalculation requested");
                true
            }
            Ok(response) => {
                warn!(status = response.status, "inventory recalculation rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "inventory recalculation failed");
                false
            }
        }
    }
}

/// Contract preserved from the source behavior: only the final share of
/// the list, with no cloud backend also active, decides the run-level
/// uploaded flag; earlier shares contribute silently.
fn final_share_sets_uploaded(
    index: usize,
    share_count: usize,
    backend_active: bool,
    status: &StepStatus,
) -> bool {
    index == share_count - 1 && !backend_active && status.is_succeeded()
}
