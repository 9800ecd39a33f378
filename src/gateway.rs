use crate::types::{ChannelSettings, SubscriberId, Subscription, WorkflowPreference};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// A gateway call that did not produce a usable answer. Both variants are
/// transient from the page's point of view: the user retries explicitly.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned status {status}")]
    Api { status: u16 },
}

// ============================================================================
// Gateway trait
// ============================================================================

/// Client surface of the notification backend. All durable subscription and
/// preference state lives behind this seam; the page never stores any of it.
#[allow(async_fn_in_trait)]
pub trait Gateway: Send + Sync {
    /// Whether the subscriber exists at all. Gates page reachability:
    /// an unknown subscriber gets the not-found page, a backend outage
    /// is an error the caller may surface differently.
    async fn subscriber_exists(&self, subscriber_id: &SubscriberId)
    -> Result<bool, GatewayError>;

    /// Active subscriptions of one subscriber for one topic.
    async fn fetch_subscriptions(
        &self,
        topic_key: &str,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<Subscription>, GatewayError>;

    /// All workflow preference records of one subscriber.
    async fn fetch_preferences(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<WorkflowPreference>, GatewayError>;

    async fn remove_subscription(&self, subscription: &Subscription) -> Result<(), GatewayError>;

    /// Re-create a topic subscription under the given external identifier.
    async fn create_subscription(
        &self,
        topic_key: &str,
        subscriber_id: &SubscriberId,
        identifier: &str,
    ) -> Result<Subscription, GatewayError>;

    /// Partial update of a workflow preference's channel toggles.
    async fn update_preference(
        &self,
        subscriber_id: &SubscriberId,
        preference: &WorkflowPreference,
        channels: &ChannelSettings,
    ) -> Result<(), GatewayError>;
}

// ============================================================================
// HttpGateway — REST implementation
// ============================================================================

/// Responses come wrapped in a `data` envelope.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        HttpGateway {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_value(&self) -> String {
        format!("ApiKey {}", self.api_key)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", self.auth_value())
            .send()
            .await?;
        let response = expect_success(response)?;
        Ok(response.json::<Envelope<T>>().await?.data)
    }
}

fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(GatewayError::Api {
            status: status.as_u16(),
        })
    }
}

impl Gateway for HttpGateway {
    async fn subscriber_exists(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<bool, GatewayError> {
        let path = format!(
            "/v2/subscribers/{}",
            urlencoding::encode(subscriber_id.as_str())
        );
        let response = self
            .client
            .get(self.url(&path))
            .header("Authorization", self.auth_value())
            .send()
            .await?;

        // Only a definitive 404 means "no such subscriber"; any other
        // failure must not masquerade as one.
        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(GatewayError::Api { status: s }),
        }
    }

    async fn fetch_subscriptions(
        &self,
        topic_key: &str,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<Subscription>, GatewayError> {
        let path = format!(
            "/v2/topics/{}/subscriptions?subscriberId={}",
            urlencoding::encode(topic_key),
            urlencoding::encode(subscriber_id.as_str())
        );
        self.get_json(&path).await
    }

    async fn fetch_preferences(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<WorkflowPreference>, GatewayError> {
        let path = format!(
            "/v2/subscribers/{}/preferences",
            urlencoding::encode(subscriber_id.as_str())
        );
        self.get_json(&path).await
    }

    async fn remove_subscription(&self, subscription: &Subscription) -> Result<(), GatewayError> {
        let path = format!(
            "/v2/subscriptions/{}",
            urlencoding::encode(&subscription.id)
        );
        let response = self
            .client
            .delete(self.url(&path))
            .header("Authorization", self.auth_value())
            .send()
            .await?;
        expect_success(response)?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        topic_key: &str,
        subscriber_id: &SubscriberId,
        identifier: &str,
    ) -> Result<Subscription, GatewayError> {
        let path = format!("/v2/topics/{}/subscriptions", urlencoding::encode(topic_key));
        let body = serde_json::json!({
            "subscriberId": subscriber_id.as_str(),
            "identifier": identifier,
        });
        let response = self
            .client
            .post(self.url(&path))
            .header("Authorization", self.auth_value())
            .json(&body)
            .send()
            .await?;
        let response = expect_success(response)?;
        Ok(response.json::<Envelope<Subscription>>().await?.data)
    }

    async fn update_preference(
        &self,
        subscriber_id: &SubscriberId,
        preference: &WorkflowPreference,
        channels: &ChannelSettings,
    ) -> Result<(), GatewayError> {
        let path = format!(
            "/v2/subscribers/{}/preferences/{}",
            urlencoding::encode(subscriber_id.as_str()),
            urlencoding::encode(&preference.workflow.id)
        );
        let body = serde_json::json!({ "channels": channels });
        let response = self
            .client
            .patch(self.url(&path))
            .header("Authorization", self.auth_value())
            .json(&body)
            .send()
            .await?;
        expect_success(response)?;
        Ok(())
    }
}

// ============================================================================
// Test utilities — InMemoryGateway for in-crate tests
// ============================================================================
