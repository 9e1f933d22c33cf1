//! Platform API generation gate.
//!
//! A single boolean, resolved once per run from the reported platform
//! version, decides which metadata payload shape is built and whether the
//! binary upload precedes or follows metadata-record creation.

use anyhow::{Context, Result, bail};
use semver::Version;

/// The platform switched API generations at this version.
fn legacy_cutover() -> Version {
    Version::new(11, 5, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// `true` for platforms older than 11.5: flat record shape, upload
    /// before metadata. `false` for the current API: JSON record with a
    /// resolved category id, metadata before upload.
    pub legacy_mode: bool,
}

/// Parse a platform version string leniently.
///
/// Platform versions are not strict semver: "11.10" has two components and
/// beats "11.5", and release builds carry suffixes like "11.10.1-t17".
/// Missing components are treated as zero.
pub fn parse_platform_version(raw: &str) -> Result<Version> {
    let core = raw
        .trim()
        .split(['-', '+'])
        .next()
        .unwrap_or_default();
    if core.is_empty() {
        bail!("empty platform version string");
    }

    let mut parts = core.split('.');
    let mut component = |name: &str| -> Result<u64> {
        match parts.next() {
            Some(p) => p
                .parse::<u64>()
                .with_context(|| format!("invalid {name} component in version '{raw}'")),
            None => Ok(0),
        }
    };

    let major = component("major")?;
    let minor = component("minor")?;
    let patch = component("patch")?;
    Ok(Version::new(major, minor, patch))
}

/// Decide which API generation governs this run.
pub fn resolve(platform_version: &str) -> Result<Capability> {
    let version = parse_platform_version(platform_version)?;
    Ok(Capability {
        legacy_mode: version < legacy_cutover(),
    })
}
