//! Artifact normalization.
//!
//! Bundle-style packages are directories; the platform only accepts flat
//! files, so a bundle is archived to `<name>.zip` with the bundle itself as
//! the single top-level entry (the bundle format requires one named root).
//! A previously produced archive is reused verbatim, so repeated runs over
//! the same bundle are cheap and byte-stable.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::DistributionError;

/// The package file or bundle to be distributed. Read-only run input.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    /// Human-facing name shown in the platform UI.
    pub display_name: String,
    /// Platform-visible file name; may differ from `display_name`.
    pub file_name: String,
    pub is_bundle: bool,
}

impl Artifact {
    /// Describe a local artifact. `display_name` defaults to the file name.
    pub fn from_path(path: impl Into<PathBuf>, display_name: Option<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(DistributionError::ArtifactMissing(path).into());
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("artifact path has no file name: {}", path.display()))?;
        let is_bundle = path.is_dir();
        let display_name = display_name.unwrap_or_else(|| file_name.clone());
        Ok(Artifact {
            path,
            display_name,
            file_name,
            is_bundle,
        })
    }
}

/// Post-normalization artifact: always a flat file, never a directory.
#[derive(Debug, Clone)]
pub struct NormalizedArtifact {
    pub path: PathBuf,
    pub file_name: String,
}

/// Normalize an artifact for upload.
///
/// Regular files pass through unchanged. Bundle directories are archived
/// to a sibling `<name>.zip`; an existing archive is an idempotent cache
/// hit and is reused without recomputation.
pub fn normalize(artifact: &Artifact) -> anyhow::Result<NormalizedArtifact> {
    if !artifact.is_bundle {
        return Ok(NormalizedArtifact {
            path: artifact.path.clone(),
            file_name: artifact.file_name.clone(),
        });
    }

    let zip_file_name = format!("{}.zip", artifact.file_name);
    let zip_path = artifact
        .path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&zip_file_name);

    if zip_path.exists() {
        info!(path = %zip_path.display(), "reusing existing bundle archive");
        return Ok(NormalizedArtifact {
            path: zip_path,
            file_name: zip_file_name,
        });
    }

    info!(
        bundle = %artifact.path.display(),
        archive = %zip_path.display(),
        "archiving bundle"
    );
    archive_bundle(&artifact.path, &artifact.file_name, &zip_path)?;

    Ok(NormalizedArtifact {
        path: zip_path,
        file_name: zip_file_name,
    })
}

/// Temporary staging tree, removed on every exit path.
struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    fn create(bundle_name: &str) -> anyhow::Result<Self> {
        let root = std::env::temp_dir().join(format!(
            "ferry-staging-{}-{}",
            bundle_name.replace(['/', '\\'], "_"),
            std::process::id()
        ));
        if root.exists() {
            fs::remove_dir_all(&root)
                .with_context(|| format!("Failed to clear stale staging dir: {}", root.display()))?;
        }
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create staging dir: {}", root.display()))?;
        Ok(StagingDir { root })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(path = %self.root.display(), error = %e, "failed to remove staging dir");
        }
    }
}

/// Stage the bundle under a subdirectory and archive the staging tree, so
/// the zip carries the bundle as its single top-level entry.
fn archive_bundle(bundle: &Path, bundle_name: &str, zip_path: &Path) -> anyhow::Result<()> {
    let staging = StagingDir::create(bundle_name)?;
    let staged = staging.root.join(bundle_name);
    copy_dir_recursive(bundle, &staged)
        .with_context(|| format!("Failed to stage bundle: {}", bundle.display()))?;

    let result = write_zip(&staging.root, zip_path);
    if result.is_err() {
        // Never leave a half-written archive behind as a future cache hit.
        let _ = fs::remove_file(zip_path);
    }
    result
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if ty.is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy file: {}", entry.path().display()))?;
        } else {
            bail!(
                "unsupported entry in bundle (symlink?): {}",
                entry.path().display()
            );
        }
    }
    Ok(())
}

fn write_zip(staging_root: &Path, zip_path: &Path) -> anyhow::Result<()> {
    let file = File::create(zip_path)
        .with_context(|| format!("Failed to create archive: {}", zip_path.display()))?;
    let mut writer = ZipWriter::new(file);
    add_dir_to_zip(&mut writer, staging_root, staging_root)?;
    writer
        .finish()
        .with_context(|| format!("Failed to finish archive: {}", zip_path.display()))?;
    Ok(())
}

fn add_dir_to_zip(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
) -> anyhow::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .expect("entry is under the staging root")
            .to_string_lossy()
            .replace('\\', "/");
        let options = entry_options(&path)?;

        if entry.file_type()?.is_dir() {
            writer
                .add_directory(format!("{relative}/"), options)
                .with_context(|| format!("Failed to add directory entry: {relative}"))?;
            add_dir_to_zip(writer, root, &path)?;
        } else {
            writer
                .start_file(relative.as_str(), options)
                .with_context(|| format!("Failed to add file entry: {relative}"))?;
            let mut source = File::open(&path)
                .with_context(|| format!("Failed to open staged file: {}", path.display()))?;
            let mut buffer = vec![0u8; 128 * 1024];
            loop {
                let read = source.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                writer.write_all(&buffer[..read])?;
            }
            debug!(entry = %relative, "archived");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn entry_options(path: &Path) -> anyhow::Result<SimpleFileOptions> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(SimpleFileOptions::default().unix_permissions(mode))
}

#[cfg(not(unix))]
fn entry_options(_path: &Path) -> anyhow::Result<SimpleFileOptions> {
    Ok(SimpleFileOptions::default())
}
