//! Run configuration: parsed once, validated once, immutable afterwards.
//!
//! All boolean flags are strict booleans in TOML (or parsed through
//! [`parse_bool_flag`] when they arrive as environment strings); downstream
//! components never re-interpret raw strings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::DistributionError;

pub const DEFAULT_SLEEP_SECONDS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const MAX_ATTEMPTS_CEILING: u32 = 10;

/// Which cloud-class backend receives the artifact. At most one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudBackend {
    /// Content-addressed cloud distribution (v2): dedup by sha3-512,
    /// short-lived credential grant, streamed object upload.
    ObjectStorageV2,
    /// Legacy direct multipart upload to the platform itself.
    LegacyDirectUpload,
    /// External synchronization command scoped to the one artifact.
    ThirdPartySync,
}

/// One on-prem fileshare target. Processed in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Share URL, e.g. `smb://fileserver.example.com/CasperShare`.
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Server credentials: either a user account or an API client pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl AuthConfig {
    pub fn is_oauth(&self) -> bool {
        self.client_id.is_some()
    }
}

/// Immutable input for one distribution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Platform base URL, e.g. `https://mdm.example.com`.
    pub server_url: String,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Cloud backend selector; `None` with no shares means the cloud
    /// default path is taken at run time.
    #[serde(default)]
    pub cloud_backend: Option<CloudBackend>,

    /// Fileshare targets, processed in order.
    #[serde(default)]
    pub shares: Vec<ShareConfig>,

    /// Directory shares get mounted under; platform default when unset.
    #[serde(default)]
    pub mount_root: Option<std::path::PathBuf>,

    /// External command for the third-party sync backend.
    #[serde(default)]
    pub sync_command: Option<String>,

    #[serde(default)]
    pub replace_package: bool,
    #[serde(default)]
    pub replace_metadata: bool,
    #[serde(default)]
    pub skip_metadata_upload: bool,
    /// Use MD5 instead of SHA-512 for the legacy hash field.
    #[serde(default)]
    pub use_md5: bool,
    #[serde(default)]
    pub recalculate_after_upload: bool,

    /// Fixed interval between retry attempts.
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: u64,
    /// Bounded attempt count for retryable network calls.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    // Metadata record fields.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub os_requirements: Option<String>,
}

fn default_sleep_seconds() -> u64 {
    DEFAULT_SLEEP_SECONDS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_priority() -> i64 {
    10
}

impl RunConfig {
    /// Base URL with any trailing slash trimmed, for endpoint joining.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| DistributionError::Config(format!("server_url: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(
                DistributionError::Config(format!("server_url scheme '{}'", url.scheme())).into(),
            );
        }

        let has_user = self.auth.username.is_some() && self.auth.password.is_some();
        let has_client = self.auth.client_id.is_some() && self.auth.client_secret.is_some();
        if !has_user && !has_client {
            return Err(DistributionError::Config(
                "auth requires username/password or client_id/client_secret".into(),
            )
            .into());
        }
        if has_user && has_client {
            return Err(DistributionError::Config(
                "auth must be username/password or client_id/client_secret, not both".into(),
            )
            .into());
        }

        for (i, share) in self.shares.iter().enumerate() {
            if share.url.is_empty() || share.username.is_empty() || share.password.is_empty() {
                return Err(DistributionError::Config(format!(
                    "share {i}: url, username and password are all required"
                ))
                .into());
            }
        }

        if self.cloud_backend == Some(CloudBackend::ThirdPartySync) && self.sync_command.is_none() {
            return Err(DistributionError::Config(
                "third-party-sync backend requires sync_command".into(),
            )
            .into());
        }

        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(DistributionError::Config(format!(
                "max_attempts must be 1..={MAX_ATTEMPTS_CEILING}"
            ))
            .into());
        }

        Ok(())
    }
}

/// Parse a configuration file.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_run_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse configuration content from a string.
pub fn parse_run_config_str(content: &str) -> Result<RunConfig> {
    let config: RunConfig = toml::from_str(content).context("TOML parsing error")?;
    config.validate()?;
    Ok(config)
}

/// Strict boolean parsing for flags arriving as strings (env layer).
/// Only `true`/`false` (case-insensitive) are accepted.
pub fn parse_bool_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DistributionError::Config(format!(
            "expected 'true' or 'false', got '{other}'"
        ))
        .into()),
    }
}

/// Layer environment-style boolean overrides onto a parsed config. The
/// variable source is injected so callers other than a process env (and
/// tests) can provide one.
pub fn apply_env_overrides<F>(config: &mut RunConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let apply = |name: &str, target: &mut bool| -> Result<()> {
        if let Some(raw) = lookup(name) {
            *target = parse_bool_flag(&raw)
                .with_context(|| format!("invalid boolean in {name}"))?;
        }
        Ok(())
    };
    apply("FERRY_REPLACE_PACKAGE", &mut config.replace_package)?;
    apply("FERRY_REPLACE_METADATA", &mut config.replace_metadata)?;
    apply("FERRY_SKIP_METADATA_UPLOAD", &mut config.skip_metadata_upload)?;
    apply("FERRY_USE_MD5", &mut config.use_md5)?;
    apply(
        "FERRY_RECALCULATE_AFTER_UPLOAD",
        &mut config.recalculate_after_upload,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
server_url = "https://mdm.example.com"

[auth]
username = "svc-upload"
password = "hunter2"
"#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_run_config_str(minimal_toml()).unwrap();
        assert_eq!(config.server_url, "https://mdm.example.com");
        assert!(config.cloud_backend.is_none());
        assert!(config.shares.is_empty());
        assert_eq!(config.sleep_seconds, DEFAULT_SLEEP_SECONDS);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(!config.replace_package);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
server_url = "https://mdm.example.com/"
cloud_backend = "object-storage-v2"
replace_package = true
recalculate_after_upload = true
sleep_seconds = 5
max_attempts = 10
category = "Utilities"
priority = 12

[auth]
client_id = "abc"
client_secret = "def"

[[shares]]
url = "smb://fs1.example.com/Packages"
username = "smbuser"
password = "smbpass"

[[shares]]
url = "smb://fs2.example.com/Packages"
username = "smbuser"
password = "smbpass"
"#;
        let config = parse_run_config_str(toml).unwrap();
        assert_eq!(config.cloud_backend, Some(CloudBackend::ObjectStorageV2));
        assert_eq!(config.shares.len(), 2);
        assert_eq!(config.base_url(), "https://mdm.example.com");
        assert_eq!(config.category.as_deref(), Some("Utilities"));
        assert!(config.auth.is_oauth());
    }

    #[test]
    fn test_rejects_missing_auth() {
        let toml = r#"server_url = "https://mdm.example.com""#;
        assert!(parse_run_config_str(toml).is_err());
    }

    #[test]
    fn test_rejects_both_auth_kinds() {
        let toml = r#"
server_url = "https://mdm.example.com"

[auth]
username = "u"
password = "p"
client_id = "c"
client_secret = "s"
"#;
        assert!(parse_run_config_str(toml).is_err());
    }

    #[test]
    fn test_rejects_sync_backend_without_command() {
        let toml = r#"
server_url = "https://mdm.example.com"
cloud_backend = "third-party-sync"

[auth]
username = "u"
password = "p"
"#;
        assert!(parse_run_config_str(toml).is_err());
    }

    #[test]
    fn test_rejects_attempts_out_of_range() {
        // Top-level keys must precede the [auth] table.
        let toml = format!("max_attempts = 11\n{}", minimal_toml());
        assert!(parse_run_config_str(&toml).is_err());
        let toml = format!("max_attempts = 0\n{}", minimal_toml());
        assert!(parse_run_config_str(&toml).is_err());
    }

    #[test]
    fn test_strict_bool_flag() {
        assert!(parse_bool_flag("true").unwrap());
        assert!(!parse_bool_flag("False").unwrap());
        assert!(parse_bool_flag("").is_err());
        assert!(parse_bool_flag("yes").is_err());
        assert!(parse_bool_flag("0").is_err());
    }

    #[test]
    fn test_env_overrides_layer_strict_bools() {
        let mut config = parse_run_config_str(minimal_toml()).unwrap();
        let vars: std::collections::HashMap<&str, &str> = [
            ("FERRY_REPLACE_PACKAGE", "true"),
            ("FERRY_USE_MD5", "TRUE"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();
        assert!(config.replace_package);
        assert!(config.use_md5);
        assert!(!config.replace_metadata);

        // Loose truthiness is rejected, not coerced.
        let result = apply_env_overrides(&mut config, |name| {
            (name == "FERRY_REPLACE_METADATA").then(|| "yes".to_string())
        });
        assert!(result.is_err());
    }
}
