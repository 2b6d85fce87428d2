// Object-store collaborator: public URL resolution for uploaded files.
//
// File bytes never pass through this process; uploads go straight from the
// browser to the store. This module only mints the public URL for a stored
// object path when a resource record lacks one.

use crate::config::StorageConfig;
use crate::error::HubError;

/// Handle to the external object store. `Disabled` when no store is
/// configured, in which case URL resolution fails and download requests
/// degrade to not-found at the registry boundary.
#[derive(Debug, Clone)]
pub enum ObjectStorage {
    Supabase(SupabaseStorage),
    Disabled,
}

/// Supabase-style storage: public objects are addressable under
/// `{base}/storage/v1/object/public/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    base_url: String,
    bucket: String,
}

impl ObjectStorage {
    /// Build the store handle from config. An empty `supabase_url` disables
    /// the store.
    pub fn from_config(config: &StorageConfig) -> Self {
        if config.supabase_url.trim().is_empty() {
            ObjectStorage::Disabled
        } else {
            ObjectStorage::Supabase(SupabaseStorage::new(
                config.supabase_url.clone(),
                config.bucket.clone(),
            ))
        }
    }

    /// Mint the public URL for a stored object path.
    pub fn public_url(&self, storage_path: &str) -> Result<String, HubError> {
        match self {
            ObjectStorage::Supabase(storage) => storage.public_url(storage_path),
            ObjectStorage::Disabled => Err(HubError::ExternalService(
                "object storage is not configured".to_string(),
            )),
        }
    }
}

impl SupabaseStorage {
    pub fn new(base_url: String, bucket: String) -> Self {
        SupabaseStorage { base_url, bucket }
    }

    fn public_url(&self, storage_path: &str) -> Result<String, HubError> {
        let path = storage_path.trim_start_matches('/');
        if path.is_empty() {
            return Err(HubError::ExternalService(
                "empty storage path".to_string(),
            ));
        }
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.bucket,
            path
        ))
    }
}
