//! Row types exchanged with the collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client (end-customer) account as known to the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub user_id: String,
    /// Normalised phone number.
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A guest-list entry: one client on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestRecord {
    pub id: String,
    pub event_id: String,
    pub client_user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque token encoded into the guest's entry QR code.
    pub qr_code: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for the guest-creation RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGuest {
    pub event_id: String,
    pub client_user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl NewGuest {
    /// Creates guest parameters for the given event and client.
    #[must_use]
    pub fn new(event_id: impl Into<String>, client_user_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            client_user_id: client_user_id.into(),
            name: None,
            phone: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    TeamLeader,
    Promoter,
    Customer,
}

/// Public profile fields of the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
}
