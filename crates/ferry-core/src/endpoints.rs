//! Closed set of platform endpoints.
//!
//! Every operation the engine performs against the platform maps to one
//! variant here: its path template and, where the response wraps the
//! interesting payload, the envelope key. Exhaustive matches keep the set
//! checked at compile time instead of living in a runtime lookup table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// POST basic credentials for a bearer token (user accounts).
    AuthToken,
    /// POST client credentials for a bearer token (API clients).
    OauthToken,
    /// GET the platform version string.
    PlatformVersion,
    /// Legacy XML package collection: POST creates.
    LegacyPackages,
    /// Legacy XML package by id: PUT updates.
    LegacyPackageById,
    /// Legacy XML package lookup by name.
    LegacyPackageByName,
    /// Legacy direct multipart binary upload.
    LegacyFileUpload,
    /// Current JSON package collection: filtered GET, POST creates.
    CurrentPackages,
    /// Current JSON package by id: PUT updates.
    CurrentPackageById,
    /// Current category lookup (name-filtered).
    Categories,
    /// Cloud distribution point file listing.
    CloudFiles,
    /// Cloud distribution point file by name: DELETE removes.
    CloudFileByName,
    /// POST for a short-lived upload credential grant.
    CloudUploadGrant,
    /// Advisory cloud inventory recalculation.
    RefreshInventory,
}

impl Endpoint {
    /// Path template relative to the server base URL. `{}` marks the
    /// single substitutable segment for the by-id / by-name variants.
    pub fn path_template(&self) -> &'static str {
        match self {
            Endpoint::AuthToken => "api/v1/auth/token",
            Endpoint::OauthToken => "api/oauth/token",
            Endpoint::PlatformVersion => "api/v1/version",
            Endpoint::LegacyPackages => "legacy/packages/id/0",
            Endpoint::LegacyPackageById => "legacy/packages/id/{}",
            Endpoint::LegacyPackageByName => "legacy/packages/name/{}",
            Endpoint::LegacyFileUpload => "legacy/fileuploads/packages",
            Endpoint::CurrentPackages => "api/v1/packages",
            Endpoint::CurrentPackageById => "api/v1/packages/{}",
            Endpoint::Categories => "api/v1/categories",
            Endpoint::CloudFiles => "api/v1/cloud-distribution/files",
            Endpoint::CloudFileByName => "api/v1/cloud-distribution/files/{}",
            Endpoint::CloudUploadGrant => "api/v1/cloud-distribution/uploads",
            Endpoint::RefreshInventory => "api/v1/cloud-distribution/refresh-inventory",
        }
    }

    /// Key under which the response envelope carries the payload, where
    /// the platform wraps it at all.
    pub fn envelope_key(&self) -> Option<&'static str> {
        match self {
            Endpoint::AuthToken => Some("token"),
            Endpoint::OauthToken => Some("access_token"),
            Endpoint::PlatformVersion => Some("version"),
            Endpoint::CurrentPackages | Endpoint::Categories => Some("results"),
            Endpoint::CloudFiles => Some("files"),
            Endpoint::LegacyPackages
            | Endpoint::LegacyPackageById
            | Endpoint::LegacyPackageByName
            | Endpoint::LegacyFileUpload
            | Endpoint::CurrentPackageById
            | Endpoint::CloudFileByName
            | Endpoint::CloudUploadGrant
            | Endpoint::RefreshInventory => None,
        }
    }

    /// Full URL against a base with no path argument.
    pub fn url(&self, base_url: &str) -> String {
        debug_assert!(!self.path_template().contains("{}"));
        format!("{}/{}", base_url.trim_end_matches('/'), self.path_template())
    }

    /// Full URL with the `{}` segment substituted.
    pub fn url_with(&self, base_url: &str, arg: &str) -> String {
        debug_assert!(self.path_template().contains("{}"));
        let path = self.path_template().replace("{}", &urlencode_segment(arg));
        format!("{}/{}", base_url.trim_end_matches('/'), path)
    }
}

/// Percent-encode a path segment or filter value (names may contain
/// spaces, ampersands and quotes).
pub(crate) fn urlencode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
