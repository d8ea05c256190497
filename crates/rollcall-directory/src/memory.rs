//! In-memory collaborators for development and tests.
//!
//! Both backends support fault injection and artificial latency so callers
//! can exercise their failure and slow-path handling without a database.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::DirectoryError;
use crate::traits::{AuthProvider, Directory};
use crate::types::{ClientRecord, GuestRecord, NewGuest, Principal};

fn guest_key(event_id: &str, client_user_id: &str) -> String {
    format!("{event_id}:{client_user_id}")
}

/// In-memory [`Directory`] backed by `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    clients: DashMap<String, ClientRecord>,
    guests: DashMap<String, GuestRecord>,
    latency: RwLock<Duration>,
    failure: Mutex<Option<DirectoryError>>,
    lookups: AtomicU64,
    creates: AtomicU64,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a client, keyed by its phone number.
    pub fn insert_client(&self, client: ClientRecord) {
        self.clients.insert(client.phone.clone(), client);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<DirectoryError>) {
        *self.failure.lock() = error;
    }

    /// Number of lookup calls served (including failed ones).
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of create calls served (including failed ones).
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    async fn simulate(&self) -> Result<(), DirectoryError> {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_client_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ClientRecord>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        Ok(self.clients.get(phone).map(|c| c.clone()))
    }

    async fn find_guest(
        &self,
        event_id: &str,
        client_user_id: &str,
    ) -> Result<Option<GuestRecord>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        Ok(self
            .guests
            .get(&guest_key(event_id, client_user_id))
            .map(|g| g.clone()))
    }

    async fn create_guest(&self, guest: &NewGuest) -> Result<GuestRecord, DirectoryError> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;

        match self
            .guests
            .entry(guest_key(&guest.event_id, &guest.client_user_id))
        {
            Entry::Occupied(_) => Err(DirectoryError::conflict(format!(
                "client {} is already on the guest list of event {}",
                guest.client_user_id, guest.event_id
            ))),
            Entry::Vacant(slot) => {
                let record = GuestRecord {
                    id: Uuid::new_v4().to_string(),
                    event_id: guest.event_id.clone(),
                    client_user_id: guest.client_user_id.clone(),
                    name: guest.name.clone(),
                    qr_code: Uuid::new_v4().simple().to_string(),
                    created_at: Utc::now(),
                };
                slot.insert(record.clone());
                tracing::debug!(
                    guest_id = %record.id,
                    event_id = %record.event_id,
                    "guest created"
                );
                Ok(record)
            }
        }
    }
}

/// In-memory [`AuthProvider`] with a fixed set of accounts.
#[derive(Debug, Default)]
pub struct MemoryAuthProvider {
    accounts: DashMap<String, (String, Principal)>,
    current: Mutex<Option<Principal>>,
    fail_sign_out: AtomicBool,
    principal_lookups: AtomicU64,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account that `sign_in` will accept.
    pub fn add_account(&self, password: impl Into<String>, principal: Principal) {
        self.accounts
            .insert(principal.email.clone(), (password.into(), principal));
    }

    /// Makes `sign_out` fail with a connection error.
    pub fn set_sign_out_failure(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::Relaxed);
    }

    /// Number of `current_principal` calls served.
    pub fn principal_lookup_count(&self) -> u64 {
        self.principal_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn current_principal(&self) -> Result<Option<Principal>, DirectoryError> {
        self.principal_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.current.lock().clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, DirectoryError> {
        let principal = match self.accounts.get(email) {
            Some(account) if account.0 == password => account.1.clone(),
            _ => return Err(DirectoryError::InvalidCredentials),
        };
        *self.current.lock() = Some(principal.clone());
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), DirectoryError> {
        if self.fail_sign_out.load(Ordering::Relaxed) {
            return Err(DirectoryError::connection("auth service unreachable"));
        }
        *self.current.lock() = None;
        Ok(())
    }
}
