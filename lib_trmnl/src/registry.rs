//! # Screen Registry
//!
//! Process-lifetime map from screen id to `ScreenRecord`. Every id is
//! lower-cased before lookup so `AA:BB:CC` and `aa:bb:cc` share one record.
//! Records are never evicted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Lower-cases a device id into the screen id used as registry/storage key.
pub fn normalize_screen_id(device_id: &str) -> String {
    device_id.to_lowercase()
}

/// Display state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRecord {
    /// Normalized (lower-case) screen id.
    pub id: String,
    pub display_name: String,
    /// Model/firmware info captured at setup time.
    pub description: Option<String>,
    /// Time of the last image upload; `None` means never updated.
    pub last_updated: Option<DateTime<Utc>>,
    /// `/screens/{id}.{ext}` once an image has been uploaded.
    pub image_path: Option<String>,
}

impl ScreenRecord {
    /// Fresh record with no image and the "never updated" sentinel.
    pub fn new(screen_id: &str) -> Self {
        Self {
            id: screen_id.to_string(),
            display_name: format!("Screen {}", screen_id),
            description: None,
            last_updated: None,
            image_path: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Copy of this record pointing at a newly stored image.
    pub fn with_image(self, image_path: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            last_updated: Some(at),
            image_path: Some(image_path.into()),
            ..self
        }
    }
}

/// # Screen Registry
///
/// Shared by every request handler through an `Arc`. A single mutex guards
/// the map, and `update` runs its mutation under that same lock, so
/// concurrent setup/upload calls for one id cannot lose updates.
#[derive(Debug, Default)]
pub struct ScreenRegistry {
    screens: Mutex<HashMap<String, ScreenRecord>>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `device_id`, creating a fresh one if absent.
    pub async fn get_or_create(&self, device_id: &str) -> ScreenRecord {
        self.get_or_create_with(device_id, ScreenRecord::new).await
    }

    /// Like `get_or_create`, but `init` builds the record when the id is unseen.
    /// `init` receives the normalized screen id.
    pub async fn get_or_create_with<F>(&self, device_id: &str, init: F) -> ScreenRecord
    where
        F: FnOnce(&str) -> ScreenRecord,
    {
        let screen_id = normalize_screen_id(device_id);
        let mut screens = self.screens.lock().await;
        screens
            .entry(screen_id)
            .or_insert_with_key(|key| {
                debug!(screen_id = %key, "Registering new screen");
                init(key)
            })
            .clone()
    }

    /// Replaces the record for `device_id` with `mutation(old)` and returns it.
    /// An unseen id starts from a fresh record.
    pub async fn update<F>(&self, device_id: &str, mutation: F) -> ScreenRecord
    where
        F: FnOnce(ScreenRecord) -> ScreenRecord,
    {
        let screen_id = normalize_screen_id(device_id);
        let mut screens = self.screens.lock().await;
        let current = screens
            .remove(&screen_id)
            .unwrap_or_else(|| ScreenRecord::new(&screen_id));
        let mut updated = mutation(current);
        // The key is fixed by the lookup; the mutation cannot move a record.
        updated.id = screen_id.clone();
        screens.insert(screen_id, updated.clone());
        updated
    }

    pub async fn get(&self, device_id: &str) -> Option<ScreenRecord> {
        let screens = self.screens.lock().await;
        screens.get(&normalize_screen_id(device_id)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.screens.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_normalize_lowercases() {
        assert_eq!(normalize_screen_id("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_screen_id("already-lower"), "already-lower");
    }

    #[tokio::test]
    async fn test_get_or_create_is_case_insensitive() {
        let registry = ScreenRegistry::new();
        let first = registry.get_or_create("AA:BB:CC").await;
        let second = registry.get_or_create("aa:bb:cc").await;

        assert_eq!(first.id, "aa:bb:cc");
        assert_eq!(first, second);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_fresh_record_has_no_image() {
        let registry = ScreenRegistry::new();
        let record = registry.get_or_create("Device-1").await;

        assert_eq!(record.display_name, "Screen device-1");
        assert!(record.image_path.is_none());
        assert!(record.last_updated.is_none());
        assert!(record.description.is_none());
    }

    #[tokio::test]
    async fn test_init_only_runs_for_unseen_ids() {
        let registry = ScreenRegistry::new();
        registry
            .get_or_create_with("dev", |id| ScreenRecord::new(id).with_description("first"))
            .await;
        let again = registry
            .get_or_create_with("DEV", |id| ScreenRecord::new(id).with_description("second"))
            .await;

        assert_eq!(again.description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let registry = ScreenRegistry::new();
        registry.get_or_create("dev").await;
        let now = Utc::now();

        let updated = registry
            .update("DEV", |old| old.with_image("/screens/dev.png", now))
            .await;

        assert_eq!(updated.image_path.as_deref(), Some("/screens/dev.png"));
        assert_eq!(updated.last_updated, Some(now));
        assert_eq!(registry.get("dev").await, Some(updated));
    }

    #[tokio::test]
    async fn test_update_creates_missing_record() {
        let registry = ScreenRegistry::new();
        let updated = registry
            .update("New", |old| old.with_image("/screens/new.jpg", Utc::now()))
            .await;

        assert_eq!(updated.id, "new");
        assert_eq!(updated.display_name, "Screen new");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_cannot_rekey_record() {
        let registry = ScreenRegistry::new();
        let updated = registry
            .update("dev", |mut old| {
                old.id = "other".to_string();
                old
            })
            .await;

        assert_eq!(updated.id, "dev");
        assert!(registry.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_yields_one_record() {
        let registry = Arc::new(ScreenRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            let id = if i % 2 == 0 { "AA:BB" } else { "aa:bb" };
            handles.push(tokio::spawn(async move { registry.get_or_create(id).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().id, "aa:bb");
        }
        assert_eq!(registry.len().await, 1);
    }
}
