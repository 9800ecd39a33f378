//! The page's interaction state machine.
//!
//! One parameterized flow replaces the per-route page variants: a topic page
//! removes and re-creates topic subscriptions and requires exit-interview
//! feedback, a workflow page flips the email channel of a preference record.
//! Every mutating action re-queries the gateway afterwards so the displayed
//! state converges to backend truth, and every action reports its attempt
//! and outcome to the analytics sink.

use crate::feedback::{FeedbackReason, FeedbackSet};
use crate::gateway::{Gateway, GatewayError};
use crate::report::{Reporter, events};
use crate::types::{ChannelSettings, SubscriberId, Subscription, WorkflowPreference};
use crate::undo::UndoWindow;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

// ============================================================================
// Flow configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowKind {
    Topic { topic_key: String },
    Workflow { workflow_id: String },
}

impl FlowKind {
    pub fn key(&self) -> &str {
        match self {
            Self::Topic { topic_key } => topic_key,
            Self::Workflow { workflow_id } => workflow_id,
        }
    }

    /// Human-formatted form of the key, e.g. `product-updates` becomes
    /// `Product Updates`. Shown on the page and attached to every event.
    pub fn label(&self) -> String {
        humanize_key(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    pub kind: FlowKind,
    pub requires_feedback: bool,
}

impl FlowConfig {
    /// Topic unsubscribe page: exit interview required before the action.
    pub fn topic(topic_key: impl Into<String>) -> Self {
        FlowConfig {
            kind: FlowKind::Topic {
                topic_key: topic_key.into(),
            },
            requires_feedback: true,
        }
    }

    /// Workflow preference page: plain toggle, no exit interview.
    pub fn workflow(workflow_id: impl Into<String>) -> Self {
        FlowConfig {
            kind: FlowKind::Workflow {
                workflow_id: workflow_id.into(),
            },
            requires_feedback: false,
        }
    }
}

pub fn humanize_key(key: &str) -> String {
    key.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Status, notices, outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Loading,
    Error,
    Subscribed,
    Unsubscribed,
    JustUnsubscribed,
}

/// Short user-visible notice attached to an action outcome. Carried across
/// the POST/redirect/GET boundary by its stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Unsubscribed,
    Resubscribed,
    UnsubscribeFailed,
    ResubscribeFailed,
    NoActiveSubscription,
    FeedbackRequired,
    UndoUnavailable,
    AlreadySubscribed,
}

impl Notice {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Resubscribed => "resubscribed",
            Self::UnsubscribeFailed => "unsubscribe-failed",
            Self::ResubscribeFailed => "resubscribe-failed",
            Self::NoActiveSubscription => "no-active-subscription",
            Self::FeedbackRequired => "feedback-required",
            Self::UndoUnavailable => "undo-unavailable",
            Self::AlreadySubscribed => "already-subscribed",
        }
    }

    pub fn from_code(code: &str) -> Option<Notice> {
        [
            Self::Unsubscribed,
            Self::Resubscribed,
            Self::UnsubscribeFailed,
            Self::ResubscribeFailed,
            Self::NoActiveSubscription,
            Self::FeedbackRequired,
            Self::UndoUnavailable,
            Self::AlreadySubscribed,
        ]
        .into_iter()
        .find(|n| n.code() == code)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "Successfully unsubscribed",
            Self::Resubscribed => "Successfully resubscribed",
            Self::UnsubscribeFailed => "Failed to unsubscribe. Please try again.",
            Self::ResubscribeFailed => "Failed to resubscribe. Please try again.",
            Self::NoActiveSubscription => "No active subscription found for this page.",
            Self::FeedbackRequired => "Please select at least one reason first.",
            Self::UndoUnavailable => "The undo window has closed.",
            Self::AlreadySubscribed => "You're already subscribed.",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Unsubscribed | Self::Resubscribed)
    }
}

/// Explicit result of a state-machine action. The rendering layer derives
/// everything from the flow's state plus this notice; it never re-derives
/// outcomes from control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Success(Notice),
    Failure(Notice),
}

impl ActionOutcome {
    pub fn notice(&self) -> Notice {
        match self {
            Self::Success(n) | Self::Failure(n) => *n,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

const SOURCE_UNDO: &str = "undo";
const SOURCE_ALREADY_UNSUBSCRIBED: &str = "already_unsubscribed";

fn source_props(source: &str) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("source".to_string(), json!(source));
    props
}

// ============================================================================
// Flow
// ============================================================================

/// What a load fetched from the gateway, in the shape the flow's kind cares
/// about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSnapshot {
    pub subscription: Option<Subscription>,
    pub preference: Option<WorkflowPreference>,
}

/// One page load's state machine. Created fresh per page load, discarded on
/// navigation away; the gateway remains the source of truth throughout.
#[derive(Debug)]
pub struct Flow {
    config: FlowConfig,
    subscriber_id: SubscriberId,
    status: FlowStatus,
    subscription: Option<Subscription>,
    preference: Option<WorkflowPreference>,
    feedback: FeedbackSet,
    undo: Option<UndoWindow>,
    load_epoch: u64,
    page_view_reported: bool,
}

impl Flow {
    pub fn new(config: FlowConfig, subscriber_id: SubscriberId) -> Self {
        Flow {
            config,
            subscriber_id,
            status: FlowStatus::Loading,
            subscription: None,
            preference: None,
            feedback: FeedbackSet::new(),
            undo: None,
            load_epoch: 0,
            page_view_reported: false,
        }
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn kind(&self) -> &FlowKind {
        &self.config.kind
    }

    pub fn label(&self) -> String {
        self.config.kind.label()
    }

    pub fn requires_feedback(&self) -> bool {
        self.config.requires_feedback
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    pub fn feedback(&self) -> &FeedbackSet {
        &self.feedback
    }

    /// Whether an unsubscribe would have something to act on.
    pub fn has_unsubscribe_target(&self) -> bool {
        match &self.config.kind {
            FlowKind::Topic { .. } => self.subscription.is_some(),
            FlowKind::Workflow { .. } => self.preference.is_some(),
        }
    }

    pub fn undo_seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        self.undo
            .as_ref()
            .map(|w| w.seconds_remaining(now))
            .unwrap_or(0)
    }

    pub fn undo_available(&self, now: DateTime<Utc>) -> bool {
        self.status == FlowStatus::JustUnsubscribed
            && self.undo.as_ref().is_some_and(|w| !w.is_expired(now))
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Start a load generation. Any in-flight result from an earlier
    /// generation is dropped when it arrives.
    pub fn begin_load(&mut self) -> u64 {
        self.load_epoch += 1;
        self.status = FlowStatus::Loading;
        self.subscription = None;
        self.preference = None;
        self.undo = None;
        self.feedback.clear();
        self.load_epoch
    }

    pub async fn fetch_current<G: Gateway>(
        &self,
        gateway: &G,
    ) -> Result<LoadSnapshot, GatewayError> {
        match &self.config.kind {
            FlowKind::Topic { topic_key } => {
                let subscriptions = gateway
                    .fetch_subscriptions(topic_key, &self.subscriber_id)
                    .await?;
                Ok(LoadSnapshot {
                    subscription: subscriptions.into_iter().next(),
                    preference: None,
                })
            }
            FlowKind::Workflow { workflow_id } => {
                let preferences = gateway.fetch_preferences(&self.subscriber_id).await?;
                Ok(LoadSnapshot {
                    subscription: None,
                    preference: preferences.into_iter().find(|p| p.matches_key(workflow_id)),
                })
            }
        }
    }

    pub fn resolve_load<R: Reporter>(
        &mut self,
        epoch: u64,
        result: Result<LoadSnapshot, GatewayError>,
        reporter: &R,
    ) {
        if epoch != self.load_epoch {
            debug!(epoch, current = self.load_epoch, "Dropping stale load result");
            return;
        }
        match result {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);
                self.status = if self.currently_subscribed() {
                    FlowStatus::Subscribed
                } else {
                    FlowStatus::Unsubscribed
                };
                if !self.page_view_reported {
                    self.page_view_reported = true;
                    let mut props = Map::new();
                    props.insert(
                        "is_currently_subscribed".to_string(),
                        json!(self.status == FlowStatus::Subscribed),
                    );
                    self.track(reporter, events::PAGE_VIEWED, props);
                }
            }
            Err(e) => {
                warn!(error = %e, key = self.config.kind.key(), "Failed to load subscription state");
                self.status = FlowStatus::Error;
                self.track(reporter, events::PAGE_LOAD_FAILED, Map::new());
            }
        }
    }

    pub async fn load<G: Gateway, R: Reporter>(&mut self, gateway: &G, reporter: &R) {
        let epoch = self.begin_load();
        let result = self.fetch_current(gateway).await;
        self.resolve_load(epoch, result, reporter);
    }

    fn apply_snapshot(&mut self, snapshot: LoadSnapshot) {
        self.subscription = snapshot.subscription;
        self.preference = snapshot.preference;
    }

    fn currently_subscribed(&self) -> bool {
        match &self.config.kind {
            FlowKind::Topic { .. } => self.subscription.is_some(),
            // A missing preference record renders the unsubscribe view with
            // the action guarded rather than claiming "already unsubscribed".
            FlowKind::Workflow { .. } => match &self.preference {
                Some(preference) => preference.channels.email_enabled(),
                None => true,
            },
        }
    }

    /// Re-query the gateway after a mutation. The mutation's own result is
    /// authoritative for the transition; a failed refetch keeps the
    /// locally-known state and logs.
    async fn refresh<G: Gateway>(&mut self, gateway: &G) {
        match self.fetch_current(gateway).await {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(e) => {
                warn!(error = %e, key = self.config.kind.key(), "Refetch after mutation failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    pub async fn unsubscribe<G: Gateway, R: Reporter>(
        &mut self,
        gateway: &G,
        reporter: &R,
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        if self.status != FlowStatus::Subscribed {
            return ActionOutcome::Failure(Notice::NoActiveSubscription);
        }
        if self.config.requires_feedback && self.feedback.is_empty() {
            return ActionOutcome::Failure(Notice::FeedbackRequired);
        }

        match self.config.kind.clone() {
            FlowKind::Topic { topic_key } => {
                let Some(subscription) = self.subscription.clone() else {
                    return ActionOutcome::Failure(Notice::NoActiveSubscription);
                };
                self.track(reporter, events::UNSUBSCRIBE_CLICKED, self.feedback_props());
                match gateway.remove_subscription(&subscription).await {
                    Ok(()) => {
                        self.subscription = None;
                        self.refresh(gateway).await;
                        self.complete_unsubscribe(reporter, now, subscription.identifier)
                    }
                    Err(e) => self.fail_unsubscribe(reporter, &e, &topic_key),
                }
            }
            FlowKind::Workflow { workflow_id } => {
                let Some(preference) = self.preference.clone() else {
                    return ActionOutcome::Failure(Notice::NoActiveSubscription);
                };
                self.track(reporter, events::UNSUBSCRIBE_CLICKED, self.feedback_props());
                let result = gateway
                    .update_preference(
                        &self.subscriber_id,
                        &preference,
                        &ChannelSettings::email_only(false),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        if let Some(p) = self.preference.as_mut() {
                            p.channels.email = Some(false);
                        }
                        self.refresh(gateway).await;
                        self.complete_unsubscribe(reporter, now, None)
                    }
                    Err(e) => self.fail_unsubscribe(reporter, &e, &workflow_id),
                }
            }
        }
    }

    fn complete_unsubscribe<R: Reporter>(
        &mut self,
        reporter: &R,
        now: DateTime<Utc>,
        removed_identifier: Option<String>,
    ) -> ActionOutcome {
        self.undo = Some(UndoWindow::start(now, removed_identifier));
        self.status = FlowStatus::JustUnsubscribed;
        self.track(
            reporter,
            events::UNSUBSCRIBE_COMPLETED,
            self.feedback_props(),
        );
        self.feedback.clear();
        ActionOutcome::Success(Notice::Unsubscribed)
    }

    fn fail_unsubscribe<R: Reporter>(
        &self,
        reporter: &R,
        error: &GatewayError,
        key: &str,
    ) -> ActionOutcome {
        warn!(error = %error, key, "Unsubscribe failed");
        self.track(reporter, events::UNSUBSCRIBE_FAILED, Map::new());
        ActionOutcome::Failure(Notice::UnsubscribeFailed)
    }

    pub async fn undo<G: Gateway, R: Reporter>(
        &mut self,
        gateway: &G,
        reporter: &R,
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        if self.status != FlowStatus::JustUnsubscribed {
            return ActionOutcome::Failure(Notice::UndoUnavailable);
        }
        let Some(window) = self.undo.clone() else {
            return ActionOutcome::Failure(Notice::UndoUnavailable);
        };
        if window.is_expired(now) {
            return ActionOutcome::Failure(Notice::UndoUnavailable);
        }

        self.track(reporter, events::UNDO_CLICKED, Map::new());
        let result = self.recreate(gateway, window.removed_identifier()).await;
        match result {
            Ok(()) => {
                self.refresh(gateway).await;
                self.status = FlowStatus::Subscribed;
                self.undo = None;
                self.feedback.clear();
                self.track(
                    reporter,
                    events::RESUBSCRIBE_COMPLETED,
                    source_props(SOURCE_UNDO),
                );
                ActionOutcome::Success(Notice::Resubscribed)
            }
            Err(RecreateError::Gateway(e)) => {
                warn!(error = %e, key = self.config.kind.key(), "Undo resubscribe failed");
                self.track(
                    reporter,
                    events::RESUBSCRIBE_FAILED,
                    source_props(SOURCE_UNDO),
                );
                ActionOutcome::Failure(Notice::ResubscribeFailed)
            }
            Err(RecreateError::NoTarget) => ActionOutcome::Failure(Notice::NoActiveSubscription),
        }
    }

    pub async fn subscribe<G: Gateway, R: Reporter>(
        &mut self,
        gateway: &G,
        reporter: &R,
    ) -> ActionOutcome {
        if self.status != FlowStatus::Unsubscribed {
            return ActionOutcome::Failure(Notice::AlreadySubscribed);
        }

        self.track(
            reporter,
            events::RESUBSCRIBE_CLICKED,
            source_props(SOURCE_ALREADY_UNSUBSCRIBED),
        );
        let result = self.recreate(gateway, None).await;
        match result {
            Ok(()) => {
                self.refresh(gateway).await;
                self.status = FlowStatus::Subscribed;
                self.track(
                    reporter,
                    events::RESUBSCRIBE_COMPLETED,
                    source_props(SOURCE_ALREADY_UNSUBSCRIBED),
                );
                ActionOutcome::Success(Notice::Resubscribed)
            }
            Err(RecreateError::Gateway(e)) => {
                warn!(error = %e, key = self.config.kind.key(), "Resubscribe failed");
                self.track(
                    reporter,
                    events::RESUBSCRIBE_FAILED,
                    source_props(SOURCE_ALREADY_UNSUBSCRIBED),
                );
                ActionOutcome::Failure(Notice::ResubscribeFailed)
            }
            Err(RecreateError::NoTarget) => ActionOutcome::Failure(Notice::NoActiveSubscription),
        }
    }

    /// Re-establish the subscription, preferring the identifier the removed
    /// record was created under and falling back to the topic key itself.
    async fn recreate<G: Gateway>(
        &mut self,
        gateway: &G,
        removed_identifier: Option<&str>,
    ) -> Result<(), RecreateError> {
        match self.config.kind.clone() {
            FlowKind::Topic { topic_key } => {
                let identifier = removed_identifier.unwrap_or(&topic_key).to_string();
                let created = gateway
                    .create_subscription(&topic_key, &self.subscriber_id, &identifier)
                    .await?;
                self.subscription = Some(created);
                Ok(())
            }
            FlowKind::Workflow { .. } => {
                let Some(preference) = self.preference.clone() else {
                    return Err(RecreateError::NoTarget);
                };
                gateway
                    .update_preference(
                        &self.subscriber_id,
                        &preference,
                        &ChannelSettings::email_only(true),
                    )
                    .await?;
                if let Some(p) = self.preference.as_mut() {
                    p.channels.email = Some(true);
                }
                Ok(())
            }
        }
    }

    pub async fn retry<G: Gateway, R: Reporter>(&mut self, gateway: &G, reporter: &R) {
        if self.status != FlowStatus::Error {
            return;
        }
        self.load(gateway, reporter).await;
    }

    // ------------------------------------------------------------------
    // Feedback and reporting
    // ------------------------------------------------------------------

    pub fn toggle_reason<R: Reporter>(&mut self, reason: FeedbackReason, reporter: &R) {
        if self.status != FlowStatus::Subscribed {
            return;
        }
        let change = self.feedback.toggle(reason);
        let mut props = Map::new();
        props.insert("reason".to_string(), json!(change.reason.code()));
        props.insert("action".to_string(), json!(change.action.as_str()));
        props.insert(
            "selected_reasons".to_string(),
            json!(
                change
                    .selected
                    .iter()
                    .map(|r| r.code())
                    .collect::<Vec<_>>()
            ),
        );
        props.insert("selected_count".to_string(), json!(change.selected.len()));
        self.track(reporter, events::FEEDBACK_REASON_TOGGLED, props);
    }

    pub fn report_channel_click<R: Reporter>(&self, reporter: &R, channel: &str) {
        let mut props = Map::new();
        props.insert("channel".to_string(), json!(channel));
        self.track(reporter, events::ALT_CHANNEL_CLICKED, props);
    }

    fn feedback_props(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("feedback_reasons".to_string(), json!(self.feedback.codes()));
        props.insert("feedback_reason_count".to_string(), json!(self.feedback.len()));
        props
    }

    fn base_props(&self) -> Map<String, Value> {
        let mut props = Map::new();
        match &self.config.kind {
            FlowKind::Topic { topic_key } => {
                props.insert("topic".to_string(), json!(topic_key));
                props.insert("topic_formatted".to_string(), json!(self.config.kind.label()));
            }
            FlowKind::Workflow { workflow_id } => {
                props.insert("workflow_id".to_string(), json!(workflow_id));
                props.insert(
                    "workflow_formatted".to_string(),
                    json!(self.config.kind.label()),
                );
            }
        }
        props
    }

    fn track<R: Reporter>(&self, reporter: &R, event: &str, extra: Map<String, Value>) {
        let mut props = self.base_props();
        props.extend(extra);
        reporter.track(self.subscriber_id.as_str(), event, props);
    }
}

#[derive(Debug)]
enum RecreateError {
    Gateway(GatewayError),
    NoTarget,
}

impl From<GatewayError> for RecreateError {
    fn from(e: GatewayError) -> Self {
        RecreateError::Gateway(e)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_utils::InMemoryGateway;
    use crate::report::test_utils::SpyReporter;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn topic_flow() -> Flow {
        Flow::new(FlowConfig::topic("product-updates"), "user:42".parse().unwrap())
    }

    fn workflow_flow() -> Flow {
        Flow::new(FlowConfig::workflow("weekly-digest"), "user:42".parse().unwrap())
    }

    fn subscribed_gateway() -> InMemoryGateway {
        InMemoryGateway::new()
            .with_subscriber("user:42")
            .with_subscription("product-updates", "user:42")
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn load_with_subscription_resolves_subscribed() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();

        flow.load(&gateway, &reporter).await;

        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(flow.has_unsubscribe_target());
        let views = reporter.events_named(events::PAGE_VIEWED);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].properties["is_currently_subscribed"], true);
        assert_eq!(views[0].properties["topic"], "product-updates");
        assert_eq!(views[0].properties["topic_formatted"], "Product Updates");
        assert_eq!(views[0].distinct_id, "user:42");
    }

    #[tokio::test]
    async fn load_without_subscription_resolves_unsubscribed() {
        let gateway = InMemoryGateway::new().with_subscriber("user:42");
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();

        flow.load(&gateway, &reporter).await;

        assert_eq!(flow.status(), FlowStatus::Unsubscribed);
        assert!(!flow.has_unsubscribe_target());
        let views = reporter.events_named(events::PAGE_VIEWED);
        assert_eq!(views[0].properties["is_currently_subscribed"], false);
    }

    #[tokio::test]
    async fn load_failure_resolves_error_and_reports() {
        let gateway = subscribed_gateway();
        gateway.set_fail_fetches(true);
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();

        flow.load(&gateway, &reporter).await;

        assert_eq!(flow.status(), FlowStatus::Error);
        assert_eq!(reporter.count_of(events::PAGE_LOAD_FAILED), 1);
        assert_eq!(reporter.count_of(events::PAGE_VIEWED), 0);
    }

    #[tokio::test]
    async fn retry_reissues_the_fetch() {
        let gateway = subscribed_gateway();
        gateway.set_fail_fetches(true);
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        assert_eq!(flow.status(), FlowStatus::Error);

        gateway.set_fail_fetches(false);
        flow.retry(&gateway, &reporter).await;

        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert_eq!(reporter.count_of(events::PAGE_VIEWED), 1);
    }

    #[tokio::test]
    async fn page_view_is_reported_once_across_reloads() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();

        flow.load(&gateway, &reporter).await;
        flow.load(&gateway, &reporter).await;
        flow.load(&gateway, &reporter).await;

        assert_eq!(reporter.count_of(events::PAGE_VIEWED), 1);
    }

    #[tokio::test]
    async fn stale_load_result_is_dropped() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();

        let old_epoch = flow.begin_load();
        let old_result = flow.fetch_current(&gateway).await;
        // A newer load supersedes the one above before its result lands.
        let new_epoch = flow.begin_load();

        flow.resolve_load(old_epoch, old_result, &reporter);
        assert_eq!(flow.status(), FlowStatus::Loading);
        assert_eq!(reporter.count_of(events::PAGE_VIEWED), 0);

        let new_result = flow.fetch_current(&gateway).await;
        flow.resolve_load(new_epoch, new_result, &reporter);
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert_eq!(reporter.count_of(events::PAGE_VIEWED), 1);
    }

    // -----------------------------------------------------------------------
    // Unsubscribe
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unsubscribe_completes_and_opens_undo_window() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);

        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Success(Notice::Unsubscribed));
        assert_eq!(flow.status(), FlowStatus::JustUnsubscribed);
        assert_eq!(gateway.removed_subscriptions().len(), 1);
        assert_eq!(flow.undo_seconds_remaining(t0()), 10);

        let completed = reporter.events_named(events::UNSUBSCRIBE_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].properties["feedback_reasons"],
            serde_json::json!(["no-time"])
        );
        assert_eq!(completed[0].properties["feedback_reason_count"], 1);
        assert_eq!(reporter.count_of(events::UNSUBSCRIBE_CLICKED), 1);
    }

    #[tokio::test]
    async fn unsubscribe_requires_feedback_when_configured() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;

        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::FeedbackRequired));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(gateway.removed_subscriptions().is_empty());
        assert_eq!(reporter.count_of(events::UNSUBSCRIBE_CLICKED), 0);
    }

    #[tokio::test]
    async fn unsubscribe_without_target_is_a_guarded_noop() {
        // Workflow page whose preference record is missing entirely.
        let gateway = InMemoryGateway::new().with_subscriber("user:42");
        let reporter = SpyReporter::new();
        let mut flow = workflow_flow();
        flow.load(&gateway, &reporter).await;
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(!flow.has_unsubscribe_target());

        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::NoActiveSubscription));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(gateway.updated_preferences().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_from_wrong_state_is_rejected() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::Other, &reporter);
        flow.unsubscribe(&gateway, &reporter, t0()).await;
        assert_eq!(flow.status(), FlowStatus::JustUnsubscribed);

        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::NoActiveSubscription));
        assert_eq!(gateway.removed_subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_gateway_failure_leaves_state_unchanged() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::TooFrequent, &reporter);

        gateway.set_fail_mutations(true);
        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::UnsubscribeFailed));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(flow.has_unsubscribe_target());
        // Feedback is kept so the user can retry without re-entering it.
        assert_eq!(flow.feedback().len(), 1);
        assert_eq!(reporter.count_of(events::UNSUBSCRIBE_FAILED), 1);
    }

    // -----------------------------------------------------------------------
    // Undo
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn undo_before_expiry_resubscribes_with_removed_identifier() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);
        flow.unsubscribe(&gateway, &reporter, t0()).await;

        // Three seconds in: countdown shows 7, undo still available.
        let at = t0() + Duration::seconds(3);
        assert_eq!(flow.undo_seconds_remaining(at), 7);
        let outcome = flow.undo(&gateway, &reporter, at).await;

        assert_eq!(outcome, ActionOutcome::Success(Notice::Resubscribed));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(flow.feedback().is_empty());
        assert!(!flow.undo_available(at));
        assert_eq!(
            gateway.created_subscriptions(),
            vec![("product-updates".to_string(), "user:42".to_string())]
        );
        let completed = reporter.events_named(events::RESUBSCRIBE_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].properties["source"], "undo");
    }

    #[tokio::test]
    async fn undo_after_expiry_is_rejected() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);
        flow.unsubscribe(&gateway, &reporter, t0()).await;

        let late = t0() + Duration::seconds(10);
        assert!(!flow.undo_available(late));
        let outcome = flow.undo(&gateway, &reporter, late).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::UndoUnavailable));
        // The unsubscribe stays final; only the option to undo is gone.
        assert_eq!(flow.status(), FlowStatus::JustUnsubscribed);
        assert!(gateway.created_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn undo_failure_keeps_the_window_open() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);
        flow.unsubscribe(&gateway, &reporter, t0()).await;

        gateway.set_fail_mutations(true);
        let at = t0() + Duration::seconds(2);
        let outcome = flow.undo(&gateway, &reporter, at).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::ResubscribeFailed));
        assert_eq!(flow.status(), FlowStatus::JustUnsubscribed);
        assert!(flow.undo_available(at));
        let failed = reporter.events_named(events::RESUBSCRIBE_FAILED);
        assert_eq!(failed[0].properties["source"], "undo");

        // The same window still honors a later retry inside the 10 seconds.
        gateway.set_fail_mutations(false);
        let outcome = flow.undo(&gateway, &reporter, t0() + Duration::seconds(5)).await;
        assert_eq!(outcome, ActionOutcome::Success(Notice::Resubscribed));
    }

    #[tokio::test]
    async fn reentering_just_unsubscribed_restarts_the_window() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);
        flow.unsubscribe(&gateway, &reporter, t0()).await;
        flow.undo(&gateway, &reporter, t0() + Duration::seconds(3)).await;

        // Around again: the second unsubscribe gets a fresh 10 seconds.
        flow.toggle_reason(FeedbackReason::Other, &reporter);
        let later = t0() + Duration::seconds(60);
        flow.unsubscribe(&gateway, &reporter, later).await;

        assert_eq!(flow.undo_seconds_remaining(later), 10);
        assert!(flow.undo_available(later + Duration::seconds(9)));
    }

    // -----------------------------------------------------------------------
    // Subscribe from the already-unsubscribed state
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscribe_from_unsubscribed_uses_topic_as_identifier() {
        let gateway = InMemoryGateway::new().with_subscriber("user:42");
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        assert_eq!(flow.status(), FlowStatus::Unsubscribed);

        let outcome = flow.subscribe(&gateway, &reporter).await;

        assert_eq!(outcome, ActionOutcome::Success(Notice::Resubscribed));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert!(flow.has_unsubscribe_target());
        assert_eq!(
            gateway.created_subscriptions(),
            vec![("product-updates".to_string(), "product-updates".to_string())]
        );
        let completed = reporter.events_named(events::RESUBSCRIBE_COMPLETED);
        assert_eq!(completed[0].properties["source"], "already_unsubscribed");
    }

    #[tokio::test]
    async fn subscribe_failure_stays_unsubscribed() {
        let gateway = InMemoryGateway::new().with_subscriber("user:42");
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;

        gateway.set_fail_mutations(true);
        let outcome = flow.subscribe(&gateway, &reporter).await;

        assert_eq!(outcome, ActionOutcome::Failure(Notice::ResubscribeFailed));
        assert_eq!(flow.status(), FlowStatus::Unsubscribed);
    }

    // -----------------------------------------------------------------------
    // Workflow preference variant
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn workflow_load_with_email_disabled_is_unsubscribed() {
        let gateway = InMemoryGateway::new()
            .with_subscriber("user:42")
            .with_preference("weekly-digest", false);
        let reporter = SpyReporter::new();
        let mut flow = workflow_flow();

        flow.load(&gateway, &reporter).await;

        assert_eq!(flow.status(), FlowStatus::Unsubscribed);
        let views = reporter.events_named(events::PAGE_VIEWED);
        assert_eq!(views[0].properties["workflow_id"], "weekly-digest");
        assert_eq!(views[0].properties["workflow_formatted"], "Weekly Digest");
    }

    #[tokio::test]
    async fn workflow_unsubscribe_flips_the_email_channel() {
        let gateway = InMemoryGateway::new()
            .with_subscriber("user:42")
            .with_preference("weekly-digest", true);
        let reporter = SpyReporter::new();
        let mut flow = workflow_flow();
        flow.load(&gateway, &reporter).await;
        assert_eq!(flow.status(), FlowStatus::Subscribed);

        // No exit interview on workflow pages.
        assert!(!flow.requires_feedback());
        let outcome = flow.unsubscribe(&gateway, &reporter, t0()).await;

        assert_eq!(outcome, ActionOutcome::Success(Notice::Unsubscribed));
        assert_eq!(flow.status(), FlowStatus::JustUnsubscribed);
        let updates = gateway.updated_preferences();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "weekly-digest");
        assert_eq!(updates[0].1.email, Some(false));

        // Undo within the window re-enables the channel.
        let outcome = flow.undo(&gateway, &reporter, t0() + Duration::seconds(4)).await;
        assert_eq!(outcome, ActionOutcome::Success(Notice::Resubscribed));
        assert_eq!(flow.status(), FlowStatus::Subscribed);
        assert_eq!(gateway.updated_preferences()[1].1.email, Some(true));
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn feedback_toggles_are_reported_with_the_full_set() {
        let gateway = subscribed_gateway();
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;

        flow.toggle_reason(FeedbackReason::NoTime, &reporter);
        flow.toggle_reason(FeedbackReason::Other, &reporter);
        flow.toggle_reason(FeedbackReason::NoTime, &reporter);

        let toggles = reporter.events_named(events::FEEDBACK_REASON_TOGGLED);
        assert_eq!(toggles.len(), 3);
        assert_eq!(toggles[0].properties["action"], "selected");
        assert_eq!(toggles[2].properties["action"], "deselected");
        assert_eq!(toggles[2].properties["reason"], "no-time");
        assert_eq!(
            toggles[2].properties["selected_reasons"],
            serde_json::json!(["other"])
        );
        assert_eq!(toggles[2].properties["selected_count"], 1);
        assert_eq!(flow.feedback().codes(), vec!["other"]);
    }

    #[tokio::test]
    async fn feedback_is_ignored_outside_the_subscribed_state() {
        let gateway = InMemoryGateway::new().with_subscriber("user:42");
        let reporter = SpyReporter::new();
        let mut flow = topic_flow();
        flow.load(&gateway, &reporter).await;
        assert_eq!(flow.status(), FlowStatus::Unsubscribed);

        flow.toggle_reason(FeedbackReason::NoTime, &reporter);

        assert!(flow.feedback().is_empty());
        assert_eq!(reporter.count_of(events::FEEDBACK_REASON_TOGGLED), 0);
    }

    // -----------------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------------

    #[test]
    fn humanize_key_title_cases_hyphenated_keys() {
        assert_eq!(humanize_key("product-updates"), "Product Updates");
        assert_eq!(humanize_key("weekly-digest"), "Weekly Digest");
        assert_eq!(humanize_key("news"), "News");
        assert_eq!(humanize_key("a--b"), "A B");
    }
}
