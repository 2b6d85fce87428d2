// Uploaded-file metadata registry.
//
// File bytes live in the external object store; this module records metadata
// and resolves download requests to a redirect target.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::Database;
use crate::error::HubError;
use crate::storage::ObjectStorage;

/// Category recorded when a submission leaves it out.
pub const DEFAULT_CATEGORY: &str = "other";

/// Uploader recorded when a submission leaves it out.
pub const DEFAULT_UPLOADER: &str = "Anonymous";

/// A stored resource record. JSON field names match the upload client
/// (`originalname`, `mimetype`, `size`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub filename: String,
    #[serde(rename = "originalname")]
    pub original_name: String,
    #[serde(rename = "mimetype")]
    pub mime_type: String,
    #[serde(rename = "size")]
    pub size_bytes: i64,
    pub category: String,
    pub description: String,
    pub uploader: String,
    pub storage_path: Option<String>,
    pub public_url: Option<String>,
    pub upload_time: DateTime<Utc>,
    pub download_count: i64,
    pub likes: i64,
}

impl Resource {
    /// Route that resolves this record to a redirect.
    pub fn download_url(&self) -> String {
        format!("/api/resources/{}/download", self.id)
    }
}

/// Upload-metadata submission (`POST /api/resources`). Required fields are
/// options so their absence surfaces as a validation error rather than a
/// deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResource {
    pub filename: Option<String>,
    pub originalname: Option<String>,
    pub mimetype: Option<String>,
    pub size: Option<i64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub storage_path: Option<String>,
    pub public_url: Option<String>,
}

/// Sort orders accepted by the resource listing. `popular` and `download`
/// are the same ordering; unrecognized keys fall back to `Newest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSort {
    Newest,
    Popular,
    Download,
    Likes,
}

impl ResourceSort {
    pub fn parse(key: Option<&str>) -> Self {
        match key {
            Some("popular") => ResourceSort::Popular,
            Some("download") => ResourceSort::Download,
            Some("likes") => ResourceSort::Likes,
            _ => ResourceSort::Newest,
        }
    }

    pub(crate) fn order_clause(self) -> &'static str {
        match self {
            ResourceSort::Newest => "upload_time DESC",
            ResourceSort::Popular | ResourceSort::Download => "download_count DESC",
            ResourceSort::Likes => "likes DESC",
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceRegistry
// ---------------------------------------------------------------------------

/// Service wrapping resource persistence and download resolution.
pub struct ResourceRegistry {
    db: Arc<Database>,
    storage: ObjectStorage,
}

impl ResourceRegistry {
    pub fn new(db: Arc<Database>, storage: ObjectStorage) -> Self {
        ResourceRegistry { db, storage }
    }

    /// Record metadata for a file already uploaded to the object store.
    ///
    /// Generates the id and upload time, applies defaults for the optional
    /// fields, and persists the record.
    pub fn register(
        &self,
        submission: NewResource,
        now: DateTime<Utc>,
    ) -> Result<Resource, HubError> {
        let filename = required(submission.filename, "filename")?;
        let original_name = required(submission.originalname, "originalname")?;
        let mime_type = required(submission.mimetype, "mimetype")?;
        let size_bytes = submission
            .size
            .ok_or_else(|| HubError::validation("size is required"))?;

        let resource = Resource {
            id: Uuid::new_v4().to_string(),
            filename,
            original_name,
            mime_type,
            size_bytes,
            category: non_empty_or(submission.category, DEFAULT_CATEGORY),
            description: submission.description.unwrap_or_default(),
            uploader: non_empty_or(submission.uploader, DEFAULT_UPLOADER),
            storage_path: submission.storage_path,
            public_url: submission.public_url,
            upload_time: now,
            download_count: 0,
            likes: 0,
        };
        self.db.insert_resource(&resource)?;
        Ok(resource)
    }

    /// List records, optionally filtered by exact category match.
    /// `None`, `""`, and `"all"` return everything.
    pub fn list(
        &self,
        category: Option<&str>,
        sort: ResourceSort,
    ) -> Result<Vec<Resource>, HubError> {
        let filter = category.filter(|c| !c.is_empty() && *c != "all");
        Ok(self.db.list_resources(filter, sort)?)
    }

    /// Resolve a download request to a redirect target.
    ///
    /// A stored `public_url` wins; otherwise the object store mints one from
    /// `storage_path`. The download counter increment is best-effort — a
    /// failed bump never blocks the redirect.
    pub fn resolve_download(&self, id: &str) -> Result<String, HubError> {
        let resource = self
            .db
            .get_resource(id)?
            .ok_or_else(|| HubError::not_found(format!("resource {id} not found")))?;

        if let Some(url) = resource.public_url.as_deref().filter(|u| !u.is_empty()) {
            self.bump_download_count(id);
            return Ok(url.to_string());
        }

        if let Some(path) = resource.storage_path.as_deref().filter(|p| !p.is_empty()) {
            return match self.storage.public_url(path) {
                Ok(url) => {
                    self.bump_download_count(id);
                    Ok(url)
                }
                Err(err) => {
                    warn!("Public URL resolution failed for resource {id}: {err}");
                    Err(HubError::not_found("file not available for download"))
                }
            };
        }

        Err(HubError::not_found("file not available for download"))
    }

    fn bump_download_count(&self, id: &str) {
        if let Err(err) = self.db.increment_download_count(id) {
            warn!("Failed to increment download count for resource {id}: {err:#}");
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, HubError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(HubError::validation(format!("{field} is required"))),
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::db::now;

    fn registry(storage: ObjectStorage) -> ResourceRegistry {
        let db = Arc::new(Database::open(":memory:").expect("in-memory database should open"));
        ResourceRegistry::new(db, storage)
    }

    fn supabase() -> ObjectStorage {
        ObjectStorage::from_config(&StorageConfig {
            supabase_url: "https://example.supabase.co".to_string(),
            bucket: "user-uploads".to_string(),
        })
    }

    fn submission() -> NewResource {
        NewResource {
            filename: Some("abc123.pdf".to_string()),
            originalname: Some("debate-notes.pdf".to_string()),
            mimetype: Some("application/pdf".to_string()),
            size: Some(42_000),
            ..NewResource::default()
        }
    }

    // ------------------------------------------------------------------
    // register
    // ------------------------------------------------------------------

    #[test]
    fn register_applies_defaults_and_persists() {
        let registry = registry(ObjectStorage::Disabled);
        let resource = registry.register(submission(), now()).unwrap();

        assert_eq!(resource.category, DEFAULT_CATEGORY);
        assert_eq!(resource.uploader, DEFAULT_UPLOADER);
        assert_eq!(resource.description, "");
        assert_eq!(resource.download_count, 0);
        assert!(!resource.id.is_empty());
        assert_eq!(
            resource.download_url(),
            format!("/api/resources/{}/download", resource.id)
        );

        let listed = registry.list(None, ResourceSort::Newest).unwrap();
        assert_eq!(listed, vec![resource]);
    }

    #[test]
    fn register_rejects_missing_required_fields() {
        let registry = registry(ObjectStorage::Disabled);
        for strip in ["filename", "originalname", "mimetype", "size"] {
            let mut sub = submission();
            match strip {
                "filename" => sub.filename = None,
                "originalname" => sub.originalname = Some("  ".to_string()),
                "mimetype" => sub.mimetype = None,
                _ => sub.size = None,
            }
            let err = registry.register(sub, now()).unwrap_err();
            assert!(matches!(err, HubError::Validation(_)), "field: {strip}");
        }
        // Nothing persisted by the rejected submissions.
        assert!(registry.list(None, ResourceSort::Newest).unwrap().is_empty());
    }

    // ------------------------------------------------------------------
    // list
    // ------------------------------------------------------------------

    #[test]
    fn list_filters_by_category_and_treats_all_as_everything() {
        let registry = registry(ObjectStorage::Disabled);
        let mut slides = submission();
        slides.category = Some("slides".to_string());
        registry.register(slides, now()).unwrap();
        registry.register(submission(), now()).unwrap();

        assert_eq!(registry.list(None, ResourceSort::Newest).unwrap().len(), 2);
        assert_eq!(
            registry.list(Some("all"), ResourceSort::Newest).unwrap().len(),
            2
        );
        let filtered = registry.list(Some("slides"), ResourceSort::Newest).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].category, "slides");
        assert!(registry
            .list(Some("video"), ResourceSort::Newest)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sort_key_parsing_falls_back_to_newest() {
        assert_eq!(ResourceSort::parse(Some("popular")), ResourceSort::Popular);
        assert_eq!(ResourceSort::parse(Some("download")), ResourceSort::Download);
        assert_eq!(ResourceSort::parse(Some("likes")), ResourceSort::Likes);
        assert_eq!(ResourceSort::parse(Some("newest")), ResourceSort::Newest);
        assert_eq!(ResourceSort::parse(Some("bogus")), ResourceSort::Newest);
        assert_eq!(ResourceSort::parse(None), ResourceSort::Newest);
    }

    // ------------------------------------------------------------------
    // resolve_download
    // ------------------------------------------------------------------

    #[test]
    fn download_with_public_url_redirects_and_increments() {
        let registry = registry(ObjectStorage::Disabled);
        let mut sub = submission();
        sub.public_url = Some("https://x/y".to_string());
        let resource = registry.register(sub, now()).unwrap();

        let url = registry.resolve_download(&resource.id).unwrap();
        assert_eq!(url, "https://x/y");

        let listed = registry.list(None, ResourceSort::Newest).unwrap();
        assert_eq!(listed[0].download_count, 1);
    }

    #[test]
    fn download_mints_url_from_storage_path() {
        let registry = registry(supabase());
        let mut sub = submission();
        sub.storage_path = Some("2026/notes.pdf".to_string());
        let resource = registry.register(sub, now()).unwrap();

        let url = registry.resolve_download(&resource.id).unwrap();
        assert_eq!(
            url,
            "https://example.supabase.co/storage/v1/object/public/user-uploads/2026/notes.pdf"
        );
        let listed = registry.list(None, ResourceSort::Newest).unwrap();
        assert_eq!(listed[0].download_count, 1);
    }

    #[test]
    fn store_failure_degrades_to_not_found() {
        let registry = registry(ObjectStorage::Disabled);
        let mut sub = submission();
        sub.storage_path = Some("2026/notes.pdf".to_string());
        let resource = registry.register(sub, now()).unwrap();

        let err = registry.resolve_download(&resource.id).unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
        // No increment on a failed resolution.
        let listed = registry.list(None, ResourceSort::Newest).unwrap();
        assert_eq!(listed[0].download_count, 0);
    }

    #[test]
    fn record_without_any_location_is_not_found() {
        let registry = registry(supabase());
        let resource = registry.register(submission(), now()).unwrap();
        let err = registry.resolve_download(&resource.id).unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = registry(ObjectStorage::Disabled);
        let err = registry.resolve_download("nope").unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }
}
