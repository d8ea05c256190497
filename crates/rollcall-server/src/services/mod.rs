//! Cache-fronted operations over the collaborators.
//!
//! Each service owns the read-through logic for one concern: consult the
//! cache, fall through to the collaborator on a miss, populate the cache
//! with the answer. Collaborator errors are propagated and never cached.

pub mod auth;
pub mod guest;
pub mod phone;

pub use auth::{AuthSession, LogoutOutcome};
pub use guest::{AsyncCreation, GuestCreation, GuestService, guest_key};
pub use phone::{PhoneCheck, PhoneLookup, normalize_phone};

use rollcall_directory::DirectoryError;

use crate::error::ApiError;
use crate::processing::ProcessingError;

/// Errors from service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ServiceError::Directory(e) => ApiError::from(e),
            ServiceError::Processing(e) => ApiError::Internal(e.to_string()),
        }
    }
}
