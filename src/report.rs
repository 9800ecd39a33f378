use crate::config::MixpanelConfig;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

// ============================================================================
// Event catalog
// ============================================================================

/// Analytics event names. The `[Marketing]` prefix groups the whole page
/// under one dashboard namespace.
pub mod events {
    pub const PAGE_VIEWED: &str = "[Marketing] Unsubscribe Page Viewed";
    pub const PAGE_LOAD_FAILED: &str = "[Marketing] Unsubscribe Page Load Failed";
    pub const FEEDBACK_REASON_TOGGLED: &str = "[Marketing] Feedback Reason Toggled";
    pub const UNSUBSCRIBE_CLICKED: &str = "[Marketing] Unsubscribe Clicked";
    pub const UNSUBSCRIBE_COMPLETED: &str = "[Marketing] Unsubscribe Completed";
    pub const UNSUBSCRIBE_FAILED: &str = "[Marketing] Unsubscribe Failed";
    pub const UNDO_CLICKED: &str = "[Marketing] Undo Unsubscribe Clicked";
    pub const RESUBSCRIBE_CLICKED: &str = "[Marketing] Resubscribe Clicked";
    pub const RESUBSCRIBE_COMPLETED: &str = "[Marketing] Resubscribe Completed";
    pub const RESUBSCRIBE_FAILED: &str = "[Marketing] Resubscribe Failed";
    pub const ALT_CHANNEL_CLICKED: &str = "[Marketing] Alternative Channel Clicked";
}

// ============================================================================
// Reporter trait
// ============================================================================

/// Fire-and-forget analytics sink. Implementations must never fail into the
/// caller: delivery problems are logged and dropped, and nothing here may
/// block or back-pressure the page.
pub trait Reporter: Send + Sync {
    fn identify(&self, subscriber_id: &str);

    fn track(&self, distinct_id: &str, event: &str, properties: Map<String, Value>);
}

// ============================================================================
// MixpanelReporter — ingestion API implementation
// ============================================================================

/// Reporter backed by the Mixpanel ingestion API.
///
/// Constructed explicitly at process startup. When no token is configured
/// the reporter runs in no-op mode instead of failing, so unconfigured
/// environments (local dev, tests) keep working.
pub struct MixpanelReporter {
    inner: Option<Inner>,
}

struct Inner {
    client: reqwest::Client,
    token: String,
    api_host: String,
}

impl MixpanelReporter {
    pub fn from_config(config: Option<MixpanelConfig>) -> Self {
        match config {
            Some(config) => MixpanelReporter {
                inner: Some(Inner {
                    client: reqwest::Client::new(),
                    token: config.token,
                    api_host: config.api_host.trim_end_matches('/').to_string(),
                }),
            },
            None => {
                info!("Analytics reporting disabled: no Mixpanel token configured");
                MixpanelReporter { inner: None }
            }
        }
    }

    fn send(&self, path: &str, payload: Value) {
        let Some(inner) = &self.inner else {
            return;
        };
        let client = inner.client.clone();
        let url = format!("{}{}", inner.api_host, path);
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "Analytics event rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to deliver analytics event");
                }
            }
        });
    }
}

impl Reporter for MixpanelReporter {
    fn identify(&self, subscriber_id: &str) {
        let Some(inner) = &self.inner else {
            return;
        };
        let payload = json!([{
            "$token": inner.token,
            "$distinct_id": subscriber_id,
            "$set": { "subscriber_id": subscriber_id },
        }]);
        self.send("/engage", payload);
    }

    fn track(&self, distinct_id: &str, event: &str, properties: Map<String, Value>) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut properties = properties;
        properties.insert("token".to_string(), json!(inner.token));
        properties.insert("distinct_id".to_string(), json!(distinct_id));
        properties.insert("time".to_string(), json!(Utc::now().timestamp_millis()));
        properties.insert(
            "$insert_id".to_string(),
            json!(uuid::Uuid::new_v4().to_string()),
        );
        let payload = json!([{ "event": event, "properties": properties }]);
        self.send("/track", payload);
    }
}

// ============================================================================
// Test utilities
// ============================================================================
