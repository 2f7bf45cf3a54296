use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::apns::{ApnsTokenProvider, DispatchResult, Gateway};
use crate::config::AppConfig;
use crate::content::ContentState;
use crate::registry::short_token;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the push gateway's per-device endpoint.
pub struct ApnsClient {
    client: reqwest::Client,
    base_url: String,
    bundle_id: String,
    tokens: ApnsTokenProvider,
}

impl ApnsClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let tokens = ApnsTokenProvider::new(
            &config.apns_signing_key,
            &config.apns_key_id,
            &config.apns_team_id,
        )?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.apns_url().to_string(),
            bundle_id: config.apns_bundle_id.clone(),
            tokens,
        })
    }
}

impl Gateway for ApnsClient {
    async fn send_update(
        &self,
        device_token: &str,
        activity_id: &str,
        content_state: &ContentState,
        event: &str,
    ) -> DispatchResult {
        let bearer = match self.tokens.bearer().await {
            Ok(token) => token,
            Err(err) => {
                // Key material was validated at startup; failure here means
                // something is badly wrong, but one device must not crash the
                // tick. Retry next cycle.
                error!("cannot sign gateway token: {err:#}");
                return DispatchResult::TransientFailure;
            }
        };

        let payload = build_payload(content_state, activity_id, event, chrono::Utc::now().timestamp());
        let url = format!("{}/3/device/{}", self.base_url, device_token);

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("bearer {bearer}"))
            .header("apns-push-type", "liveactivity")
            .header(
                "apns-topic",
                format!("{}.push-type.liveactivity", self.bundle_id),
            )
            .header("apns-priority", "10")
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!("push gateway unreachable: {err}");
                return DispatchResult::TransientFailure;
            }
        };

        let status = response.status();
        let result = classify_status(status);
        match result {
            DispatchResult::Delivered => {
                debug!("delivered update to {}...", short_token(device_token));
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "push to {}... failed: {status} {body}",
                    short_token(device_token)
                );
            }
        }
        result
    }
}

/// Maps the gateway's response codes onto dispatch outcomes. 403/410 mean the
/// device token is dead and the device must be evicted; 429 and 5xx are worth
/// retrying on a later tick.
pub fn classify_status(status: StatusCode) -> DispatchResult {
    match status.as_u16() {
        200..=299 => DispatchResult::Delivered,
        403 | 410 => DispatchResult::PermanentFailure { evict: true },
        429 => DispatchResult::TransientFailure,
        400..=499 => DispatchResult::PermanentFailure { evict: false },
        _ => DispatchResult::TransientFailure,
    }
}

/// Payload envelope the widget expects: delivery timestamp, event marker, and
/// the content-state mapping.
pub fn build_payload(
    content_state: &ContentState,
    activity_id: &str,
    event: &str,
    timestamp: i64,
) -> serde_json::Value {
    json!({
        "aps": {
            "timestamp": timestamp,
            "event": event,
            "content-state": content_state,
            "activity-id": activity_id,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentSource, RotationSlot};

    #[test]
    fn status_codes_map_to_dispatch_results() {
        assert_eq!(
            classify_status(StatusCode::OK),
            DispatchResult::Delivered
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            DispatchResult::PermanentFailure { evict: false }
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            DispatchResult::PermanentFailure { evict: true }
        );
        assert_eq!(
            classify_status(StatusCode::GONE),
            DispatchResult::PermanentFailure { evict: true }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            DispatchResult::TransientFailure
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            DispatchResult::TransientFailure
        );
    }

    #[test]
    fn evict_flag_only_set_for_dead_tokens() {
        assert!(classify_status(StatusCode::GONE).should_evict());
        assert!(!classify_status(StatusCode::BAD_REQUEST).should_evict());
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS).should_evict());
    }

    #[tokio::test]
    async fn payload_envelope_carries_event_and_content_state() {
        let source = ContentSource::new(None);
        let state = source.content_for(RotationSlot::News, None).await;
        let payload = build_payload(&state, "activity-1", "update", 1_700_000_000);

        assert_eq!(payload["aps"]["timestamp"], 1_700_000_000);
        assert_eq!(payload["aps"]["event"], "update");
        assert_eq!(payload["aps"]["activity-id"], "activity-1");
        assert_eq!(payload["aps"]["content-state"]["islandType"], "news");
        assert_eq!(payload["aps"]["content-state"]["callStatus"], "Ready");
    }
}
