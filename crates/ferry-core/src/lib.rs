//! Ferry Core Library
//!
//! Package distribution and metadata reconciliation engine: publishes a
//! local package artifact to an endpoint-management platform across
//! fileshare and cloud storage backends, deduplicating by content hash
//! and reconciling the metadata record against either of the platform's
//! two API generations.

pub mod artifact;
pub mod capability;
pub mod cloud;
pub mod config;
pub mod digest;
pub mod endpoints;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod retry;
pub mod share;
pub mod transport;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{
        CloudBackend, RunConfig, ShareConfig, apply_env_overrides, load_run_config,
    };

    // Artifact pipeline
    pub use crate::artifact::{Artifact, NormalizedArtifact, normalize};
    pub use crate::digest::{DigestAlgorithm, DigestSet, digest_file};

    // Capability
    pub use crate::capability::{Capability, resolve};

    // Distribution
    pub use crate::cloud::{CloudDistributor, ObjectStore, S3ObjectStore, UploadCredentialGrant};
    pub use crate::orchestrator::{DistributionOrchestrator, RunReport, RunResult, RunSummary};
    pub use crate::share::distribute_to_share;

    // Transport
    pub use crate::transport::{Credentials, HttpTransport, Transport};

    // Errors
    pub use crate::error::{DistributionError, StepStatus};
}
