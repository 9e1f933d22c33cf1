//! Metadata record reconciliation.
//!
//! The structured descriptor (category, notes, priority, hash) is distinct
//! from the binary artifact. Two incompatible record shapes exist: the
//! legacy flat XML record and the current JSON record with a resolved
//! integer category id. Exactly one shape is built per run, and each build
//! function must only ever be used under its own API generation.

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{CloudBackend, RunConfig};
use crate::digest::{DigestAlgorithm, DigestSet};
use crate::endpoints::{Endpoint, urlencode_segment};
use crate::error::DistributionError;
use crate::retry::{Attempt, RetryPolicy, with_retry};
use crate::transport::{RequestBody, Transport, TransportRequest};

/// Record fields common to both API generations.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub display_name: String,
    pub file_name: String,
    pub category: Option<String>,
    pub info: Option<String>,
    pub notes: Option<String>,
    pub priority: i64,
    pub os_requirements: Option<String>,
}

impl PackageMetadata {
    pub fn from_config(config: &RunConfig, display_name: &str, file_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            file_name: file_name.to_string(),
            category: config.category.clone(),
            info: config.info.clone(),
            notes: config.notes.clone(),
            priority: config.priority,
            os_requirements: config.os_requirements.clone(),
        }
    }
}

/// Hash pair for the legacy record, or `None` when the active cloud
/// strategy verifies integrity out of band (object-storage-v2).
pub fn legacy_hash_fields(
    active_backend: Option<CloudBackend>,
    use_md5: bool,
    digests: &DigestSet,
) -> Option<(&'static str, String)> {
    if active_backend == Some(CloudBackend::ObjectStorageV2) {
        return None;
    }
    let algorithm = if use_md5 {
        DigestAlgorithm::Md5
    } else {
        DigestAlgorithm::Sha512
    };
    digests
        .get(algorithm)
        .map(|value| (algorithm.legacy_label(), value.to_string()))
}

/// Build the flat XML record for the legacy API generation.
pub fn build_legacy_record(
    meta: &PackageMetadata,
    hash: Option<(&'static str, String)>,
) -> String {
    let mut xml = String::from("<package>");
    push_element(&mut xml, "name", &meta.display_name);
    push_element(&mut xml, "filename", &meta.file_name);
    if let Some(category) = &meta.category {
        push_element(&mut xml, "category", category);
    }
    if let Some(info) = &meta.info {
        push_element(&mut xml, "info", info);
    }
    if let Some(notes) = &meta.notes {
        push_element(&mut xml, "notes", notes);
    }
    push_element(&mut xml, "priority", &meta.priority.to_string());
    if let Some(os_requirements) = &meta.os_requirements {
        push_element(&mut xml, "os_requirements", os_requirements);
    }
    if let Some((hash_type, hash_value)) = hash {
        push_element(&mut xml, "hash_type", hash_type);
        push_element(&mut xml, "hash_value", &hash_value);
    }
    xml.push_str("</package>");
    xml
}

/// Build the JSON record for the current API generation. The category is
/// already resolved to an integer id; raw category strings never appear.
pub fn build_current_record(meta: &PackageMetadata, category_id: Option<u64>) -> Value {
    let mut record = json!({
        "packageName": meta.display_name,
        "fileName": meta.file_name,
        "priority": meta.priority,
        "info": meta.info.as_deref().unwrap_or(""),
        "notes": meta.notes.as_deref().unwrap_or(""),
    });
    if let Some(id) = category_id {
        record["categoryId"] = json!(id);
    }
    if let Some(os_requirements) = &meta.os_requirements {
        record["osRequirements"] = json!(os_requirements);
    }
    record
}

fn push_element(xml: &mut String, tag: &str, value: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push('>');
    xml.push_str(&xml_escape(value));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push('>');
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Pull the text of the first `<tag>..</tag>` element out of an XML body.
/// The legacy API wraps ids in trivially flat XML, so a scan suffices.
pub(crate) fn extract_xml_value(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}

fn parse_id_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Submits metadata records and resolves category lookups.
pub struct MetadataReconciler<'a> {
    pub transport: &'a dyn Transport,
    pub base_url: &'a str,
    pub policy: RetryPolicy,
}

impl MetadataReconciler<'_> {
    /// Resolve a category name to its integer id via a name-filtered
    /// lookup. A non-empty name that does not resolve is fatal.
    pub async fn resolve_category_id(&self, name: &str) -> Result<u64> {
        let url = format!(
            "{}?page=0&page-size=1&filter=name%3D%3D%22{}%22",
            Endpoint::Categories.url(self.base_url),
            urlencode_segment(name)
        );
        let results = with_retry(&self.policy, "category lookup", || {
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
                let key = Endpoint::Categories
                    .envelope_key()
                    .expect("category listing has envelope");
                Ok(Attempt::Done(payload.get(key).cloned().unwrap_or(Value::Null)))
            }
        })
        .await?;

        let id = results
            .as_array()
            .and_then(|r| r.first())
            .and_then(|entry| entry.get("id"))
            .and_then(parse_id_value);
        match id {
            Some(id) => {
                debug!(category = name, id, "category resolved");
                Ok(id)
            }
            None => Err(DistributionError::UnknownCategory(name.to_string()).into()),
        }
    }

    /// Submit the legacy XML record: PUT for an existing id, POST for a
    /// new row. Returns the package id.
    pub async fn submit_legacy(&self, record: String, existing_id: Option<u64>) -> Result<u64> {
        let (request, operation) = match existing_id {
            Some(id) => (
                TransportRequest::put(
                    Endpoint::LegacyPackageById.url_with(self.base_url, &id.to_string()),
                ),
                "legacy metadata update",
            ),
            None => (
                TransportRequest::post(Endpoint::LegacyPackages.url(self.base_url)),
                "legacy metadata create",
            ),
        };
        let request = request
            .with_accept("application/xml")
            .with_body(RequestBody::Xml(record));

        let body = with_retry(&self.policy, operation, || {
            let request = request.clone();
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
                .and_then(|raw| raw.parse().ok())
                .ok_or(DistributionError::MissingResponseField {
                    operation: "legacy metadata create",
                    field: "id",
                })?,
        };
        info!(package_id = id, "legacy metadata record reconciled");
        Ok(id)
    }

    /// Submit the current JSON record. Returns the package id, which under
    /// the current generation is the prerequisite for the binary upload.
    pub async fn submit_current(&self, record: Value, existing_id: Option<u64>) -> Result<u64> {
        let (request, operation) = match existing_id {
            Some(id) => (
                TransportRequest::put(
                    Endpoint::CurrentPackageById.url_with(self.base_url, &id.to_string()),
                ),
                "metadata update",
            ),
            None => (
                TransportRequest::post(Endpoint::CurrentPackages.url(self.base_url)),
                "metadata create",
            ),
        };
        let request = request
            .with_accept("application/json")
            .with_body(RequestBody::Json(record));

        let body = with_retry(&self.policy, operation, || {
            let request = request.clone();
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
            None => serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("id").and_then(parse_id_value))
                .ok_or(DistributionError::MissingResponseField {
                    operation: "metadata create",
                    field: "id",
                })?,
        };
        info!(package_id = id, "metadata record reconciled");
        Ok(id)
    }
}
