//! On-prem fileshare distribution.
//!
//! Each configured share is mounted, probed for an existing copy under the
//! fixed `Packages/` subpath, written if needed, and unmounted. A failed
//! mount is not raised directly: it surfaces as "expected path not found"
//! so the run can continue with the remaining targets. Unmount is
//! best-effort on every exit path.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use url::Url;

use crate::artifact::NormalizedArtifact;
use crate::config::ShareConfig;
use crate::error::StepStatus;

/// Subdirectory of the share root that serves packages to clients.
const PACKAGES_SUBPATH: &str = "Packages";

#[derive(Debug)]
pub struct ShareReport {
    pub status: StepStatus,
    pub warnings: Vec<String>,
}

/// Distribute the normalized artifact to one share target. `mount_root`
/// overrides the platform default mount location when set.
pub fn distribute_to_share(
    share: &ShareConfig,
    artifact: &NormalizedArtifact,
    replace: bool,
    mount_root: Option<&Path>,
) -> Result<ShareReport> {
    let mount = ShareMount::prepare(share, mount_root)?;
    mount.mount();

    let mut report = sync_to_share_root(&mount.mount_point, artifact, replace);

    if let Err(e) = mount.unmount() {
        // Never fatal: the copy outcome stands either way.
        warn!(share = %share.url, error = %e, "failed to unmount share");
        if let Ok(report) = report.as_mut() {
            report.warnings.push(format!("unmount failed: {e}"));
        }
    }
    report
}

/// Copy into `<root>/Packages/<file_name>` and verify the result exists.
fn sync_to_share_root(
    root: &Path,
    artifact: &NormalizedArtifact,
    replace: bool,
) -> Result<ShareReport> {
    let packages_dir = root.join(PACKAGES_SUBPATH);
    if !packages_dir.is_dir() {
        // Covers both a missing subpath and a mount that never happened.
        error!(path = %packages_dir.display(), "expected path not found on share");
        return Ok(ShareReport {
            status: StepStatus::failed(format!(
                "expected path not found: {}",
                packages_dir.display()
            )),
            warnings: Vec::new(),
        });
    }

    let dest = packages_dir.join(&artifact.file_name);
    if dest.exists() && !replace {
        info!(path = %dest.display(), "not replacing existing package on share");
        return Ok(ShareReport {
            status: StepStatus::skipped("not replacing existing package"),
            warnings: Vec::new(),
        });
    }

    info!(from = %artifact.path.display(), to = %dest.display(), "copying package to share");
    fs::copy(&artifact.path, &dest)
        .with_context(|| format!("Failed to copy package to share: {}", dest.display()))?;

    // Post-copy existence check before declaring success.
    if !dest.exists() {
        return Ok(ShareReport {
            status: StepStatus::failed(format!("copy not verified: {}", dest.display())),
            warnings: Vec::new(),
        });
    }

    Ok(ShareReport {
        status: StepStatus::Succeeded,
        warnings: Vec::new(),
    })
}

/// One mounted share: exclusive use for mount → copy → unmount.
struct ShareMount<'a> {
    share: &'a ShareConfig,
    host: String,
    share_path: String,
    mount_point: PathBuf,
}

impl<'a> ShareMount<'a> {
    fn prepare(share: &'a ShareConfig, mount_root: Option<&Path>) -> Result<Self> {
        let url = Url::parse(&share.url)
            .with_context(|| format!("invalid share URL: {}", share.url))?;
        let host = url
            .host_str()
            .with_context(|| format!("share URL has no host: {}", share.url))?
            .to_string();
        let share_path = url.path().trim_matches('/').to_string();
        let mount_point = mount_point_for(&share_path, mount_root);
        Ok(Self {
            share,
            host,
            share_path,
            mount_point,
        })
    }

    /// Mount via the OS. Failure is logged, never raised: a missing mount
    /// shows up later as "expected path not found".
    fn mount(&self) {
        if let Err(e) = fs::create_dir_all(&self.mount_point) {
            warn!(path = %self.mount_point.display(), error = %e, "cannot create mount point");
            return;
        }

        info!(share = %self.share.url, mount_point = %self.mount_point.display(), "mounting share");
        let status = mount_command(self).status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(share = %self.share.url, %status, "mount command failed"),
            Err(e) => warn!(share = %self.share.url, error = %e, "mount command did not run"),
        }
    }

    fn unmount(&self) -> Result<()> {
        let status = Command::new("umount")
            .arg(&self.mount_point)
            .status()
            .context("umount command did not run")?;
        if !status.success() {
            anyhow::bail!("umount exited with {status}");
        }
        Ok(())
    }
}

fn mount_point_for(share_path: &str, mount_root: Option<&Path>) -> PathBuf {
    let name = share_path.replace('/', "_");
    match mount_root {
        Some(root) => root.join(name),
        None if cfg!(target_os = "macos") => PathBuf::from("/Volumes").join(name),
        None => PathBuf::from("/mnt/ferry").join(name),
    }
}

#[cfg(target_os = "macos")]
fn mount_command(mount: &ShareMount<'_>) -> Command {
    let mut command = Command::new("mount");
    command.arg("-t").arg("smbfs").arg(format!(
        "//{}:{}@{}/{}",
        mount.share.username, mount.share.password, mount.host, mount.share_path
    ));
    command.arg(&mount.mount_point);
    command
}

#[cfg(not(target_os = "macos"))]
fn mount_command(mount: &ShareMount<'_>) -> Command {
    let mut command = Command::new("mount");
    command
        .arg("-t")
        .arg("cifs")
        .arg(format!("//{}/{}", mount.host, mount.share_path))
        .arg(&mount.mount_point)
        .arg("-o")
        .arg(format!(
            "username={},password={}",
            mount.share.username, mount.share.password
        ));
    command
}
