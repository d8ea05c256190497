//! Collaborator traits consumed by the server core.
//!
//! The server only needs two things from the outside world: a keyed lookup
//! that can fail, and a write/RPC that produces a row. Authentication is a
//! separate collaborator so the session cache can be exercised on its own.

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::types::{ClientRecord, GuestRecord, NewGuest, Principal};

/// Database collaborator.
///
/// Implementations must be thread-safe (`Send + Sync`). Lookups return
/// `Ok(None)` for missing rows and `Err` only for infrastructure faults.
///
/// # Example
///
/// ```ignore
/// use rollcall_directory::{Directory, DirectoryError};
///
/// async fn is_registered(dir: &dyn Directory, phone: &str) -> Result<bool, DirectoryError> {
///     Ok(dir.find_client_by_phone(phone).await?.is_some())
/// }
/// ```
#[async_trait]
pub trait Directory: Send + Sync {
    /// Looks up a client by normalised phone number.
    async fn find_client_by_phone(&self, phone: &str)
    -> Result<Option<ClientRecord>, DirectoryError>;

    /// Looks up the guest entry for a client on an event.
    async fn find_guest(
        &self,
        event_id: &str,
        client_user_id: &str,
    ) -> Result<Option<GuestRecord>, DirectoryError>;

    /// Creates a guest entry and its QR code.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::Conflict` if the client is already on the
    /// event's guest list.
    async fn create_guest(&self, guest: &NewGuest) -> Result<GuestRecord, DirectoryError>;
}

/// Authentication collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the currently signed-in principal, if any.
    async fn current_principal(&self) -> Result<Option<Principal>, DirectoryError>;

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::InvalidCredentials` on a rejected login.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, DirectoryError>;

    /// Ends the remote session.
    async fn sign_out(&self) -> Result<(), DirectoryError>;
}
