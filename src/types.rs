use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a subscriber in the notification backend.
///
/// Arrives URL-encoded in the page path (ids routinely contain `:` from
/// upstream identity systems) and is decoded exactly once at request
/// dispatch, so the value held here is always the raw identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SubscriberId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            bail!("Subscriber id must not be empty");
        }
        Ok(SubscriberId(s.to_string()))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An active topic subscription as returned by the backend.
///
/// `id` is the opaque handle required to remove the subscription;
/// `identifier` is the external identifier the subscription was created
/// under, kept so an undo can re-create the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub topic_key: String,
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Reference to a workflow inside a preference record. The backend is
/// inconsistent about which of `id` / `identifier` a caller holds, so
/// lookups match either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub id: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-channel delivery toggles of a workflow preference.
///
/// Fields are optional both ways: the backend omits channels it has no
/// opinion on, and update payloads carry only the channels being changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<bool>,
}

impl ChannelSettings {
    /// Partial update payload that only touches the email channel.
    pub fn email_only(enabled: bool) -> Self {
        ChannelSettings {
            email: Some(enabled),
            ..ChannelSettings::default()
        }
    }

    /// A subscriber counts as subscribed unless email is explicitly off.
    pub fn email_enabled(&self) -> bool {
        self.email != Some(false)
    }
}

/// A subscriber's preference record for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPreference {
    pub workflow: WorkflowRef,
    #[serde(default)]
    pub channels: ChannelSettings,
}

impl WorkflowPreference {
    pub fn matches_key(&self, key: &str) -> bool {
        self.workflow.id == key || self.workflow.identifier.as_deref() == Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_id_rejects_empty() {
        assert!(SubscriberId::from_str("").is_err());
        assert!(SubscriberId::from_str("   ").is_err());
        assert!(SubscriberId::from_str("user:123").is_ok());
    }

    #[test]
    fn email_enabled_defaults_to_true() {
        assert!(ChannelSettings::default().email_enabled());
        assert!(ChannelSettings::email_only(true).email_enabled());
        assert!(!ChannelSettings::email_only(false).email_enabled());
    }

    #[test]
    fn email_only_serializes_just_the_email_channel() {
        let json = serde_json::to_value(ChannelSettings::email_only(false)).unwrap();
        assert_eq!(json, serde_json::json!({ "email": false }));
    }

    #[test]
    fn preference_matches_id_or_identifier() {
        let pref = WorkflowPreference {
            workflow: WorkflowRef {
                id: "wf_123".to_string(),
                identifier: Some("weekly-digest".to_string()),
                name: Some("Weekly Digest".to_string()),
            },
            channels: ChannelSettings::default(),
        };
        assert!(pref.matches_key("wf_123"));
        assert!(pref.matches_key("weekly-digest"));
        assert!(!pref.matches_key("other"));
    }

    #[test]
    fn subscription_deserializes_camel_case() {
        let sub: Subscription = serde_json::from_str(
            r#"{"id": "sub_1", "topicKey": "product-updates", "identifier": "user:42"}"#,
        )
        .unwrap();
        assert_eq!(sub.topic_key, "product-updates");
        assert_eq!(sub.identifier.as_deref(), Some("user:42"));
    }
}
