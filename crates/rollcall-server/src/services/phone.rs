//! Phone number lookups.

use std::sync::Arc;

use rollcall_directory::{ClientRecord, Directory};
use serde::Serialize;

use super::ServiceError;
use crate::cache::BoundedTtlCache;

/// Strip everything but digits, keeping one leading `+`.
///
/// Returns `None` when no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));

    if normalized.trim_start_matches('+').is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Answer to "is this phone registered?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneCheck {
    pub exists: bool,
    pub user_id: Option<String>,
}

impl From<Option<ClientRecord>> for PhoneCheck {
    fn from(client: Option<ClientRecord>) -> Self {
        Self {
            exists: client.is_some(),
            user_id: client.map(|c| c.user_id),
        }
    }
}

/// Read-through phone lookup. Both "found" and "not found" are cached.
pub struct PhoneLookup {
    cache: Arc<BoundedTtlCache<Option<ClientRecord>>>,
    directory: Arc<dyn Directory>,
}

impl PhoneLookup {
    pub fn new(
        cache: Arc<BoundedTtlCache<Option<ClientRecord>>>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self { cache, directory }
    }

    pub async fn check(&self, raw_phone: &str) -> Result<PhoneCheck, ServiceError> {
        let phone = normalize_phone(raw_phone)
            .ok_or_else(|| ServiceError::InvalidInput("phone number is required".into()))?;

        let client = self
            .cache
            .get_or_try_insert_with(&phone, || self.directory.find_client_by_phone(&phone))
            .await?;

        Ok(PhoneCheck::from(client))
    }

    /// Invalidate after a client record for `raw_phone` is created or
    /// changed.
    pub fn forget(&self, raw_phone: &str) -> bool {
        normalize_phone(raw_phone).is_some_and(|phone| self.cache.delete(&phone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_directory::{DirectoryError, MemoryDirectory};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryDirectory>, PhoneLookup) {
        let dir = Arc::new(MemoryDirectory::new());
        dir.insert_client(ClientRecord {
            user_id: "c-1".to_string(),
            phone: "+15551234567".to_string(),
            name: Some("Ada".to_string()),
        });
        let cache = Arc::new(BoundedTtlCache::new("phone", 16, Duration::from_secs(300)));
        let lookup = PhoneLookup::new(cache, dir.clone());
        (dir, lookup)
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone(" +1 (555) 123-4567 ").as_deref(),
            Some("+15551234567")
        );
        assert_eq!(normalize_phone("555.123").as_deref(), Some("555123"));
        assert_eq!(normalize_phone("+"), None);
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[tokio::test]
    async fn test_positive_result_cached() {
        let (dir, lookup) = setup();
        let first = lookup.check("+1 555 123 4567").await.unwrap();
        assert!(first.exists);
        assert_eq!(first.user_id.as_deref(), Some("c-1"));

        let second = lookup.check("+15551234567").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(dir.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_negative_result_cached() {
        let (dir, lookup) = setup();
        assert!(!lookup.check("999").await.unwrap().exists);
        assert!(!lookup.check("999").await.unwrap().exists);
        assert_eq!(dir.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_not_cached() {
        let (dir, lookup) = setup();
        dir.set_failure(Some(DirectoryError::connection("db down")));
        let err = lookup.check("+15551234567").await.unwrap_err();
        assert!(matches!(err, ServiceError::Directory(_)));

        dir.set_failure(None);
        assert!(lookup.check("+15551234567").await.unwrap().exists);
        assert_eq!(dir.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_forget_and_invalid_input() {
        let (dir, lookup) = setup();
        lookup.check("+15551234567").await.unwrap();
        assert!(lookup.forget("+1-555-123-4567"));
        lookup.check("+15551234567").await.unwrap();
        assert_eq!(dir.lookup_count(), 2);

        assert!(matches!(
            lookup.check("   ").await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
