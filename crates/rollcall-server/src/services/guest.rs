//! Guest creation, synchronous and background.
//!
//! The duplicate cache is keyed by `event_id:client_user_id` and holds both
//! positive (`Some(guest)`) and negative (`None`) answers. A background
//! creation is tracked in the processing registry; at most one is in flight
//! per pair, and a second request for the same pair gets the same key back.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rollcall_directory::{Directory, DirectoryError, GuestRecord, NewGuest};
use serde_json::Value;

use super::ServiceError;
use crate::cache::BoundedTtlCache;
use crate::processing::{ProcessingRegistry, new_processing_key};

/// Duplicate-cache key for a client on an event.
pub fn guest_key(event_id: &str, client_user_id: &str) -> String {
    format!("{event_id}:{client_user_id}")
}

/// Result of a synchronous create.
#[derive(Debug, Clone)]
pub struct GuestCreation {
    pub guest: GuestRecord,
    /// `false` when the guest already existed.
    pub created: bool,
}

/// Result of a background create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncCreation {
    /// The guest already exists; nothing was submitted.
    Existing(GuestRecord),
    /// A new background creation was started under this key.
    Submitted(String),
    /// A creation for the same pair is already running under this key.
    InFlight(String),
}

pub struct GuestService {
    cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
    directory: Arc<dyn Directory>,
    registry: Arc<ProcessingRegistry<Value>>,
    /// Pair key -> processing key of the running creation
    in_flight: Arc<DashMap<String, String>>,
}

impl GuestService {
    pub fn new(
        cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
        directory: Arc<dyn Directory>,
        registry: Arc<ProcessingRegistry<Value>>,
    ) -> Self {
        Self {
            cache,
            directory,
            registry,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Look up the guest for a pair, cache first.
    pub async fn find_existing(
        &self,
        event_id: &str,
        client_user_id: &str,
    ) -> Result<Option<GuestRecord>, ServiceError> {
        let key = guest_key(event_id, client_user_id);
        let guest = self
            .cache
            .get_or_try_insert_with(&key, || {
                self.directory.find_guest(event_id, client_user_id)
            })
            .await?;
        Ok(guest)
    }

    /// Create the guest inline, or return the existing one.
    pub async fn create(&self, new_guest: NewGuest) -> Result<GuestCreation, ServiceError> {
        validate(&new_guest)?;
        if let Some(guest) = self
            .find_existing(&new_guest.event_id, &new_guest.client_user_id)
            .await?
        {
            return Ok(GuestCreation {
                guest,
                created: false,
            });
        }

        let key = guest_key(&new_guest.event_id, &new_guest.client_user_id);
        match self.directory.create_guest(&new_guest).await {
            Ok(guest) => {
                self.cache.set(key, Some(guest.clone()));
                Ok(GuestCreation {
                    guest,
                    created: true,
                })
            }
            Err(DirectoryError::Conflict { .. }) => {
                // Lost a race with another writer; report theirs
                self.cache.delete(&key);
                match self
                    .find_existing(&new_guest.event_id, &new_guest.client_user_id)
                    .await?
                {
                    Some(guest) => Ok(GuestCreation {
                        guest,
                        created: false,
                    }),
                    None => Err(DirectoryError::query("guest vanished after conflict").into()),
                }
            }
            Err(e) => {
                self.cache.delete(&key);
                Err(e.into())
            }
        }
    }

    /// Start a background creation and return its processing key.
    pub async fn create_async(&self, new_guest: NewGuest) -> Result<AsyncCreation, ServiceError> {
        validate(&new_guest)?;
        if let Some(guest) = self
            .find_existing(&new_guest.event_id, &new_guest.client_user_id)
            .await?
        {
            return Ok(AsyncCreation::Existing(guest));
        }

        let pair = guest_key(&new_guest.event_id, &new_guest.client_user_id);
        // The marker lives exactly as long as the worker, even when its
        // registry entry has already expired on a poll.
        let mut slot = match self.in_flight.entry(pair.clone()) {
            Entry::Occupied(slot) => {
                tracing::debug!(
                    pair = %pair,
                    processing_key = %slot.get(),
                    "guest creation already in flight"
                );
                return Ok(AsyncCreation::InFlight(slot.get().clone()));
            }
            Entry::Vacant(slot) => slot.insert(String::new()),
        };

        let key = new_processing_key("guest", &new_guest.event_id, &new_guest.client_user_id);
        let work = create_in_background(
            Arc::clone(&self.directory),
            Arc::clone(&self.cache),
            Arc::clone(&self.in_flight),
            pair.clone(),
            key.clone(),
            new_guest,
        );
        *slot = key.clone();
        // The worker removes the marker under the same shard lock, so it
        // cannot run that step before the guard is released here.
        let spawned = self.registry.spawn(key.clone(), work);
        drop(slot);

        match spawned {
            Ok((key, _handle)) => Ok(AsyncCreation::Submitted(key)),
            Err(e) => {
                // The worker never ran, so nothing else clears the marker
                self.in_flight.remove_if(&pair, |_, running| running == &key);
                Err(e.into())
            }
        }
    }

    /// Number of background creations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drop the cached answer for a pair.
    pub fn invalidate(&self, event_id: &str, client_user_id: &str) -> bool {
        self.cache.delete(&guest_key(event_id, client_user_id))
    }
}

fn validate(new_guest: &NewGuest) -> Result<(), ServiceError> {
    if new_guest.event_id.trim().is_empty() || new_guest.client_user_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "eventId and clientUserId are required".into(),
        ));
    }
    Ok(())
}

async fn create_in_background(
    directory: Arc<dyn Directory>,
    cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
    in_flight: Arc<DashMap<String, String>>,
    pair: String,
    key: String,
    new_guest: NewGuest,
) -> Result<Value, String> {
    let _marker = InFlightMarker {
        in_flight,
        pair: pair.clone(),
        key,
    };
    match directory.create_guest(&new_guest).await {
        Ok(guest) => match serde_json::to_value(&guest) {
            Ok(value) => {
                cache.set(pair.clone(), Some(guest));
                Ok(value)
            }
            Err(e) => Err(format!("failed to encode guest: {e}")),
        },
        Err(e) => {
            cache.delete(&pair);
            Err(e.to_string())
        }
    }
}

/// Clears a pair's in-flight marker when the worker finishes or unwinds.
struct InFlightMarker {
    in_flight: Arc<DashMap<String, String>>,
    pair: String,
    key: String,
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.pair, |_, running| running == &self.key);
    }
}
