use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::FeedService;

/// Fixed rotation cycle, in dispatch order. A device's rotation index maps
/// onto this cycle modulo `CYCLE_LEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSlot {
    Dashboard,
    News,
    Weather,
    Calendar,
    Email,
}

impl RotationSlot {
    pub const CYCLE_LEN: u64 = 5;

    pub fn from_index(index: u64) -> Self {
        match index % Self::CYCLE_LEN {
            0 => Self::Dashboard,
            1 => Self::News,
            2 => Self::Weather,
            3 => Self::Calendar,
            _ => Self::Email,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::News => "news",
            Self::Weather => "weather",
            Self::Calendar => "calendar",
            Self::Email => "email",
        }
    }
}

/// Display fields for one live-activity update. Field names are the widget's
/// wire contract, hence the camelCase rename.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentState {
    pub call_status: String,
    pub duration: u32,
    pub transcript: String,
    pub is_speaking: bool,
    pub companion_mode: String,
    pub is_idle_mode: bool,
    pub is_dark_mode: bool,
    pub current_date: String,
    pub island_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion_icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_event_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_event_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_email_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_email_senders: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_email_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_email_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_icon: Option<String>,
}

impl ContentState {
    fn base(slot: RotationSlot, now: DateTime<Utc>) -> Self {
        let hour = now.hour();
        Self {
            call_status: "Ready".to_string(),
            duration: 0,
            transcript: format!("Updated at {}", now.format("%H:%M")),
            is_speaking: false,
            companion_mode: "idle".to_string(),
            is_idle_mode: true,
            is_dark_mode: !(7..19).contains(&hour),
            current_date: now.format("%a, %b %d").to_string(),
            island_type: slot.as_str().to_string(),
            ..Self::default()
        }
    }
}

pub const PLACEHOLDER_EVENT_TITLE: &str = "No upcoming events";
pub const PLACEHOLDER_EMAIL_SUMMARY: &str = "Inbox is quiet";

/// Renders the content for a rotation slot. Calendar and email slots use the
/// feed cache when it is warm; everything else, and a cold or absent feed,
/// yields deterministic placeholder content. Never touches the network.
pub struct ContentSource {
    feed: Option<Arc<FeedService>>,
}

impl ContentSource {
    pub fn new(feed: Option<Arc<FeedService>>) -> Self {
        Self { feed }
    }

    pub async fn content_for(&self, slot: RotationSlot, user_id: Option<&str>) -> ContentState {
        let mut state = ContentState::base(slot, Utc::now());
        let snapshot = match &self.feed {
            Some(feed) => feed.snapshot(user_id).await,
            None => None,
        };

        match slot {
            RotationSlot::Dashboard => {
                state.suggestion = Some("Your day at a glance".to_string());
                state.suggestion_icon = Some("calendar".to_string());
                if let Some(snapshot) = &snapshot {
                    if let Some(event) = &snapshot.next_event {
                        state.next_event_title = Some(event.title.clone());
                        state.next_event_time = Some(event.time.clone());
                    }
                    if snapshot.unread_count > 0 {
                        state.unread_email_count = Some(snapshot.unread_count);
                    }
                }
            }
            RotationSlot::News => {
                state.suggestion = Some("Check latest updates".to_string());
                state.suggestion_icon = Some("newspaper.fill".to_string());
            }
            RotationSlot::Weather => {
                state.suggestion = Some("Weather at a glance".to_string());
                state.suggestion_icon = Some("sun.max.fill".to_string());
                state.weather_condition = Some("Clear".to_string());
                state.weather_icon = Some("sun.max.fill".to_string());
            }
            RotationSlot::Calendar => {
                state.suggestion_icon = Some("calendar.badge.clock".to_string());
                match snapshot.as_ref().and_then(|s| s.next_event.as_ref()) {
                    Some(event) => {
                        state.suggestion = Some("Next up".to_string());
                        state.next_event_title = Some(event.title.clone());
                        state.next_event_time = Some(event.time.clone());
                    }
                    None => {
                        state.suggestion = Some(PLACEHOLDER_EVENT_TITLE.to_string());
                    }
                }
            }
            RotationSlot::Email => {
                state.suggestion_icon = Some("envelope.fill".to_string());
                match snapshot.as_ref().filter(|s| !s.recent_emails.is_empty()) {
                    Some(snapshot) => {
                        let top = &snapshot.recent_emails[0];
                        state.suggestion = Some(format!("{} unread", snapshot.unread_count));
                        state.unread_email_count = Some(snapshot.unread_count);
                        state.top_email_senders = Some(top.sender.clone());
                        state.top_email_subject = Some(top.subject.clone());
                        state.top_email_time = Some(top.time.clone());
                    }
                    None => {
                        state.suggestion = Some(PLACEHOLDER_EMAIL_SUMMARY.to_string());
                    }
                }
            }
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedEvent, FeedSnapshot};

    #[test]
    fn slot_cycle_wraps_modulo_five() {
        assert_eq!(RotationSlot::from_index(0), RotationSlot::Dashboard);
        assert_eq!(RotationSlot::from_index(1), RotationSlot::News);
        assert_eq!(RotationSlot::from_index(2), RotationSlot::Weather);
        assert_eq!(RotationSlot::from_index(3), RotationSlot::Calendar);
        assert_eq!(RotationSlot::from_index(4), RotationSlot::Email);
        assert_eq!(RotationSlot::from_index(5), RotationSlot::Dashboard);
        assert_eq!(RotationSlot::from_index(7), RotationSlot::Weather);
    }

    #[tokio::test]
    async fn calendar_slot_without_feed_yields_placeholder() {
        let source = ContentSource::new(None);
        let state = source.content_for(RotationSlot::Calendar, None).await;
        assert_eq!(state.island_type, "calendar");
        assert_eq!(state.suggestion.as_deref(), Some(PLACEHOLDER_EVENT_TITLE));
        assert!(state.next_event_title.is_none());
    }

    #[tokio::test]
    async fn calendar_slot_with_unreachable_feed_yields_placeholder() {
        let feed = Arc::new(crate::feed::FeedService::new(
            "http://127.0.0.1:9".to_string(),
        ));
        let _ = feed.refresh(None).await;

        let source = ContentSource::new(Some(feed));
        let state = source.content_for(RotationSlot::Calendar, None).await;
        assert_eq!(state.suggestion.as_deref(), Some(PLACEHOLDER_EVENT_TITLE));
    }

    #[tokio::test]
    async fn calendar_slot_renders_the_requesting_users_feed() {
        let feed = Arc::new(crate::feed::FeedService::new(
            "http://127.0.0.1:9".to_string(),
        ));
        feed.seed(
            Some("user-1"),
            FeedSnapshot {
                next_event: Some(FeedEvent {
                    title: "Design review".to_string(),
                    time: "2:00 PM".to_string(),
                }),
                ..FeedSnapshot::default()
            },
        )
        .await;
        feed.seed(
            Some("user-2"),
            FeedSnapshot {
                next_event: Some(FeedEvent {
                    title: "Dentist".to_string(),
                    time: "4:30 PM".to_string(),
                }),
                ..FeedSnapshot::default()
            },
        )
        .await;

        let source = ContentSource::new(Some(feed));
        let first = source
            .content_for(RotationSlot::Calendar, Some("user-1"))
            .await;
        let second = source
            .content_for(RotationSlot::Calendar, Some("user-2"))
            .await;

        assert_eq!(first.next_event_title.as_deref(), Some("Design review"));
        assert_eq!(second.next_event_title.as_deref(), Some("Dentist"));
    }

    #[tokio::test]
    async fn email_slot_without_feed_yields_placeholder() {
        let source = ContentSource::new(None);
        let state = source.content_for(RotationSlot::Email, None).await;
        assert_eq!(state.suggestion.as_deref(), Some(PLACEHOLDER_EMAIL_SUMMARY));
        assert!(state.unread_email_count.is_none());
    }

    #[test]
    fn content_state_serializes_camel_case_and_skips_empty_optionals() {
        let state = ContentState::base(RotationSlot::News, Utc::now());
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["callStatus"], "Ready");
        assert_eq!(value["islandType"], "news");
        assert!(value.get("nextEventTitle").is_none());
    }
}
