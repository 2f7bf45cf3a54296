use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::registry::DeviceRegistry;

/// Snapshot of the external calendar/mail feed, as served by the feed's
/// `/snapshot` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSnapshot {
    pub next_event: Option<FeedEvent>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub recent_emails: Vec<FeedEmail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEvent {
    pub title: String,
    pub time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEmail {
    pub sender: String,
    pub subject: String,
    pub time: String,
}

/// Feed data is per user; devices registered without a user fall back to the
/// anonymous snapshot.
#[derive(Default)]
struct FeedCache {
    anonymous: Option<FeedSnapshot>,
    by_user: HashMap<String, FeedSnapshot>,
}

/// Pulls calendar/mail data from the configured feed on its own cadence and
/// caches it, one snapshot per monitored user. The dispatch loop only ever
/// reads the cache; a dead feed degrades content to placeholders, it never
/// stalls a tick.
pub struct FeedService {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<FeedCache>,
}

impl FeedService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            cache: Mutex::new(FeedCache::default()),
        }
    }

    /// Fetch a fresh snapshot for one user and replace their cache entry. On
    /// failure the previous entry stays in place.
    pub async fn refresh(&self, user_id: Option<&str>) -> Result<()> {
        let snapshot = self.fetch_snapshot(user_id).await?;

        let mut cache = self.cache.lock().await;
        match user_id {
            Some(user_id) => {
                cache.by_user.insert(user_id.to_string(), snapshot);
            }
            None => cache.anonymous = Some(snapshot),
        }
        Ok(())
    }

    async fn fetch_snapshot(&self, user_id: Option<&str>) -> Result<FeedSnapshot> {
        let mut request = self
            .client
            .get(format!("{}/snapshot", self.base_url))
            .timeout(Duration::from_secs(10));
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }

        let response = request.send().await.context("feed unreachable")?;
        if !response.status().is_success() {
            anyhow::bail!("feed returned {}", response.status());
        }
        response.json().await.context("feed returned invalid JSON")
    }

    /// Non-blocking cache read for one user; a user without their own entry
    /// yet falls back to the anonymous snapshot. `None` until the first
    /// successful refresh.
    pub async fn snapshot(&self, user_id: Option<&str>) -> Option<FeedSnapshot> {
        let cache = self.cache.lock().await;
        user_id
            .and_then(|user_id| cache.by_user.get(user_id).cloned())
            .or_else(|| cache.anonymous.clone())
    }

    /// Recurring refresh task; runs until the process exits. Every pass
    /// refreshes the anonymous snapshot plus one per user the registry
    /// currently monitors. The first tick fires immediately, so this also
    /// covers the startup fetch.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        refresh_secs: u64,
        registry: Arc<DeviceRegistry>,
    ) -> tokio::task::JoinHandle<()> {
        let feed = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(refresh_secs));
            loop {
                interval.tick().await;

                let mut targets: Vec<Option<String>> = vec![None];
                targets.extend(registry.user_ids().await.into_iter().map(Some));
                for user_id in targets {
                    match feed.refresh(user_id.as_deref()).await {
                        Ok(()) => info!(
                            "feed snapshot refreshed for {}",
                            user_id.as_deref().unwrap_or("anonymous")
                        ),
                        // Keep serving the stale cache; content falls back to
                        // placeholders when there is none yet.
                        Err(err) => warn!("feed unavailable: {err:#}"),
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, user_id: Option<&str>, snapshot: FeedSnapshot) {
        let mut cache = self.cache.lock().await;
        match user_id {
            Some(user_id) => {
                cache.by_user.insert(user_id.to_string(), snapshot);
            }
            None => cache.anonymous = Some(snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_feed_leaves_cache_empty() {
        // Nothing listens on this port; refresh must fail without panicking.
        let feed = FeedService::new("http://127.0.0.1:9".to_string());
        assert!(feed.refresh(None).await.is_err());
        assert!(feed.snapshot(None).await.is_none());
    }

    #[tokio::test]
    async fn snapshots_are_kept_per_user() {
        let feed = FeedService::new("http://127.0.0.1:9".to_string());
        feed.seed(
            Some("user-1"),
            FeedSnapshot {
                unread_count: 3,
                ..FeedSnapshot::default()
            },
        )
        .await;
        feed.seed(
            None,
            FeedSnapshot {
                unread_count: 9,
                ..FeedSnapshot::default()
            },
        )
        .await;

        assert_eq!(feed.snapshot(Some("user-1")).await.unwrap().unread_count, 3);
        // A user without their own entry reads the anonymous snapshot.
        assert_eq!(feed.snapshot(Some("user-2")).await.unwrap().unread_count, 9);
        assert_eq!(feed.snapshot(None).await.unwrap().unread_count, 9);
    }

    #[test]
    fn snapshot_deserializes_partial_payload() {
        let snapshot: FeedSnapshot =
            serde_json::from_str(r#"{"next_event": {"title": "Standup", "time": "9:30 AM"}}"#)
                .unwrap();
        assert_eq!(snapshot.next_event.unwrap().title, "Standup");
        assert_eq!(snapshot.unread_count, 0);
        assert!(snapshot.recent_emails.is_empty());
    }
}
