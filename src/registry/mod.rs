use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Leading characters of a device token, for logs and listings. Tokens are
/// opaque caller-supplied strings, so truncation has to respect char
/// boundaries rather than byte offsets.
pub fn short_token(token: &str) -> String {
    token.chars().take(8).collect()
}

/// One registered push destination. The registry is the only owner; the
/// scheduler and the HTTP handlers go through its methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_token: String,
    pub activity_id: String,
    pub user_id: Option<String>,
    pub rotation_index: u64,
    pub registered_at: i64,
    pub last_update: Option<i64>,
}

/// In-memory device registry. Process-lifetime only: a restart means every
/// device has to register again.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRegistration>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `device_token`, resetting rotation.
    pub async fn register(&self, device_token: &str, activity_id: &str, user_id: Option<String>) {
        let entry = DeviceRegistration {
            device_token: device_token.to_string(),
            activity_id: activity_id.to_string(),
            user_id,
            rotation_index: 0,
            registered_at: chrono::Utc::now().timestamp(),
            last_update: None,
        };
        self.devices
            .lock()
            .await
            .insert(device_token.to_string(), entry);
    }

    /// Returns true if the device was known. Unregistering twice is a no-op.
    pub async fn unregister(&self, device_token: &str) -> bool {
        self.devices.lock().await.remove(device_token).is_some()
    }

    pub async fn list(&self) -> Vec<DeviceRegistration> {
        self.devices.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, device_token: &str) -> Option<DeviceRegistration> {
        self.devices.lock().await.get(device_token).cloned()
    }

    /// Increment and return the new rotation index; `None` if the device was
    /// unregistered in the meantime.
    pub async fn advance_rotation(&self, device_token: &str) -> Option<u64> {
        let mut devices = self.devices.lock().await;
        let entry = devices.get_mut(device_token)?;
        entry.rotation_index += 1;
        Some(entry.rotation_index)
    }

    /// Record a successful dispatch.
    pub async fn touch(&self, device_token: &str) {
        if let Some(entry) = self.devices.lock().await.get_mut(device_token) {
            entry.last_update = Some(chrono::Utc::now().timestamp());
        }
    }

    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    /// Count of distinct users with a feed association, for /health.
    pub async fn monitored_users(&self) -> usize {
        self.user_ids().await.len()
    }

    /// Distinct user ids with a feed association, for per-user feed refresh.
    pub async fn user_ids(&self) -> Vec<String> {
        self.devices
            .lock()
            .await
            .values()
            .filter_map(|d| d.user_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "aaaabbbbccccddddeeeeffff0000111122223333";

    #[tokio::test]
    async fn register_resets_rotation_and_lists_once() {
        let registry = DeviceRegistry::new();
        registry.register(TOKEN, "activity-1", None).await;
        registry.advance_rotation(TOKEN).await;
        registry.register(TOKEN, "activity-2", None).await;

        let devices = registry.list().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rotation_index, 0);
        assert_eq!(devices[0].activity_id, "activity-2");
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = DeviceRegistry::new();
        registry.register(TOKEN, "activity-1", None).await;

        assert!(registry.unregister(TOKEN).await);
        assert!(registry.list().await.is_empty());
        assert!(!registry.unregister(TOKEN).await);
    }

    #[tokio::test]
    async fn advance_rotation_is_monotonic() {
        let registry = DeviceRegistry::new();
        registry.register(TOKEN, "activity-1", None).await;

        assert_eq!(registry.advance_rotation(TOKEN).await, Some(1));
        assert_eq!(registry.advance_rotation(TOKEN).await, Some(2));
        assert_eq!(registry.advance_rotation("unknown").await, None);
    }

    #[tokio::test]
    async fn monitored_users_counts_distinct_user_ids() {
        let registry = DeviceRegistry::new();
        registry
            .register(TOKEN, "a1", Some("user-1".into()))
            .await;
        registry
            .register("bbbbccccddddeeeeffff0000111122223333aaaa", "a2", Some("user-1".into()))
            .await;
        registry
            .register("ccccddddeeeeffff0000111122223333aaaabbbb", "a3", None)
            .await;

        assert_eq!(registry.len().await, 3);
        assert_eq!(registry.monitored_users().await, 1);
        assert_eq!(registry.user_ids().await, vec!["user-1".to_string()]);
    }

    #[test]
    fn short_token_respects_char_boundaries() {
        assert_eq!(short_token("aaaabbbbccccdddd"), "aaaabbbb");
        // 12 three-byte chars; a byte-indexed slice at 8 would land mid-char.
        assert_eq!(short_token(&"€".repeat(12)), "€€€€€€€€");
        assert_eq!(short_token("ab"), "ab");
    }
}
