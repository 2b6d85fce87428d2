// Error kinds surfaced across the service boundary.

use thiserror::Error;

/// Errors returned by hub operations and the resource registry.
///
/// `Validation` and `NotFound` are caller mistakes (4xx-equivalent);
/// `Persistence` means a storage write or read failed and the in-flight
/// operation was aborted with no partial effects. `ExternalService` covers
/// object-store failures and is caught at the download-resolution boundary,
/// where it degrades to `NotFound` instead of leaking provider errors.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Persistence(String),

    #[error("object store failure: {0}")]
    ExternalService(String),
}

impl HubError {
    pub fn validation(message: impl Into<String>) -> Self {
        HubError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HubError::NotFound(message.into())
    }
}

impl From<anyhow::Error> for HubError {
    /// Collapse a database-layer context chain into a `Persistence` error.
    fn from(err: anyhow::Error) -> Self {
        HubError::Persistence(format!("{err:#}"))
    }
}
