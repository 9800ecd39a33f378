use super::{ApiResponse, AppState, parse_form};
use crate::feedback::FeedbackReason;
use crate::flow::{Flow, FlowConfig, FlowKind, FlowStatus, Notice};
use crate::gateway::Gateway;
use crate::report::Reporter;
use crate::sessions::SessionId;
use crate::types::SubscriberId;
use askama::Template;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Stay-connected links
// ============================================================================

pub(crate) struct AltChannel {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub href: &'static str,
}

pub(crate) const ALT_CHANNELS: &[AltChannel] = &[
    AltChannel {
        code: "discord",
        name: "Join our Discord",
        description: "Chat with the community",
        href: "https://discord.gg/example",
    },
    AltChannel {
        code: "support",
        name: "Contact Support",
        description: "We're here to help",
        href: "https://example.com/contact-us",
    },
    AltChannel {
        code: "linkedin",
        name: "Follow on LinkedIn",
        description: "Bite-sized updates",
        href: "https://www.linkedin.com/company/example",
    },
    AltChannel {
        code: "x",
        name: "Follow on X",
        description: "Quick updates",
        href: "https://x.com/example",
    },
];

// ============================================================================
// Templates
// ============================================================================

struct ReasonOption {
    code: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "page.html")]
struct PageTemplate {
    label: String,
    session: String,
    has_notice: bool,
    notice_message: &'static str,
    notice_error: bool,
    requires_feedback: bool,
    reasons: Vec<ReasonOption>,
    missing_target: bool,
    needs_feedback: bool,
    unsubscribe_disabled: bool,
    channels: &'static [AltChannel],
}

#[derive(Template)]
#[template(path = "success.html")]
struct SuccessTemplate {
    label: String,
    session: String,
    has_notice: bool,
    notice_message: &'static str,
    notice_error: bool,
    undo_secs: i64,
    undo_available: bool,
}

#[derive(Template)]
#[template(path = "unsubscribed.html")]
struct UnsubscribedTemplate {
    label: String,
    session: String,
    has_notice: bool,
    notice_message: &'static str,
    notice_error: bool,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    label: String,
    has_session: bool,
    session: String,
    page_href: String,
}

#[derive(Template)]
#[template(path = "loading.html")]
struct LoadingTemplate {
    session: String,
}

#[derive(Template)]
#[template(path = "not_found.html")]
struct NotFoundTemplate;

// ============================================================================
// Response helpers
// ============================================================================

fn text(status: u16, body: &str) -> ApiResponse {
    ApiResponse::Text {
        status,
        body: body.to_string(),
    }
}

fn redirect(location: &str) -> ApiResponse {
    ApiResponse::Redirect(location.to_string())
}

fn render<T: Template>(template: T) -> ApiResponse {
    match template.render() {
        Ok(html) => ApiResponse::Html {
            status: 200,
            body: html,
        },
        Err(e) => {
            error!(error = %e, "Failed to render template");
            text(500, "Internal server error")
        }
    }
}

fn render_not_found() -> ApiResponse {
    match NotFoundTemplate.render() {
        Ok(html) => ApiResponse::Html {
            status: 404,
            body: html,
        },
        Err(e) => {
            error!(error = %e, "Failed to render not-found template");
            text(500, "Internal server error")
        }
    }
}

fn notice_parts(notice: Option<Notice>) -> (bool, &'static str, bool) {
    match notice {
        Some(n) => (true, n.message(), n.is_error()),
        None => (false, "", false),
    }
}

fn page_path(kind: &FlowKind, subscriber_id: &SubscriberId) -> String {
    let prefix = match kind {
        FlowKind::Topic { .. } => "topics",
        FlowKind::Workflow { .. } => "workflows",
    };
    format!(
        "/{}/{}/{}",
        prefix,
        urlencoding::encode(kind.key()),
        urlencoding::encode(subscriber_id.as_str())
    )
}

/// Render whatever state the machine is in. The UI derives everything from
/// flow state plus the optional notice carried over the redirect.
fn render_flow(flow: &Flow, id: &SessionId, notice: Option<Notice>, now: DateTime<Utc>) -> ApiResponse {
    let (has_notice, notice_message, notice_error) = notice_parts(notice);
    let session = id.to_string();
    let label = flow.label();

    match flow.status() {
        FlowStatus::Loading => render(LoadingTemplate { session }),
        FlowStatus::Error => render(ErrorTemplate {
            label,
            has_session: true,
            session,
            page_href: String::new(),
        }),
        FlowStatus::Subscribed => {
            let reasons = if flow.requires_feedback() {
                FeedbackReason::all()
                    .iter()
                    .map(|r| ReasonOption {
                        code: r.code(),
                        label: r.label(),
                        selected: flow.feedback().contains(*r),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let has_target = flow.has_unsubscribe_target();
            let needs_feedback = flow.requires_feedback() && flow.feedback().is_empty();
            render(PageTemplate {
                label,
                session,
                has_notice,
                notice_message,
                notice_error,
                requires_feedback: flow.requires_feedback(),
                reasons,
                missing_target: !has_target,
                needs_feedback,
                unsubscribe_disabled: !has_target || needs_feedback,
                channels: ALT_CHANNELS,
            })
        }
        FlowStatus::Unsubscribed => render(UnsubscribedTemplate {
            label,
            session,
            has_notice,
            notice_message,
            notice_error,
        }),
        FlowStatus::JustUnsubscribed => render(SuccessTemplate {
            label,
            session,
            has_notice,
            notice_message,
            notice_error,
            undo_secs: flow.undo_seconds_remaining(now),
            undo_available: flow.undo_available(now),
        }),
    }
}

// ============================================================================
// Route handlers
// ============================================================================

/// GET /topics/{topic}/{subscriber_id} and /workflows/{workflow_id}/{subscriber_id}
///
/// Validates the subscriber against the gateway, then creates a fresh flow,
/// loads it, and binds it to a new session.
pub(super) async fn page_get<G: Gateway, R: Reporter>(
    state: &Arc<AppState<G, R>>,
    config: FlowConfig,
    subscriber_raw: &str,
) -> ApiResponse {
    let subscriber_id = match SubscriberId::from_str(subscriber_raw) {
        Ok(id) => id,
        Err(_) => return render_not_found(),
    };

    match state.gateway.subscriber_exists(&subscriber_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(subscriber = %subscriber_id, "Unknown subscriber");
            return render_not_found();
        }
        Err(e) => {
            error!(error = %e, "Failed to validate subscriber");
            // Transient backend trouble is not "no such subscriber": offer a
            // reload instead of the dead-end 404.
            return render(ErrorTemplate {
                label: config.kind.label(),
                has_session: false,
                session: String::new(),
                page_href: page_path(&config.kind, &subscriber_id),
            });
        }
    }

    state.reporter.identify(subscriber_id.as_str());

    let mut flow = Flow::new(config, subscriber_id);
    flow.load(state.gateway.as_ref(), state.reporter.as_ref())
        .await;

    let now = Utc::now();
    let id = SessionId::new();
    let response = render_flow(&flow, &id, None, now);
    state.sessions.insert(id, flow, now);
    response
}

/// GET /sessions/{id}?notice=...
///
/// Re-renders the current machine state; the redirect target of every POST.
pub(super) async fn session_get<G: Gateway, R: Reporter>(
    state: &Arc<AppState<G, R>>,
    id_raw: &str,
    notice_code: Option<&str>,
) -> ApiResponse {
    let Ok(id) = SessionId::from_str(id_raw) else {
        return render_not_found();
    };
    let now = Utc::now();
    let Some(flow) = state.sessions.claim(&id, now) else {
        info!(session = %id, "Session not found or expired");
        return render_not_found();
    };

    let notice = notice_code.and_then(Notice::from_code);
    let response = render_flow(&flow, &id, notice, now);
    state.sessions.restore(id, flow, now);
    response
}

/// POST /sessions/{id}/{feedback|unsubscribe|undo|resubscribe|retry}
///
/// Claims the session's flow exclusively, advances the machine, restores it,
/// and redirects back to the session page with the outcome's notice.
pub(super) async fn session_post<G: Gateway, R: Reporter>(
    state: &Arc<AppState<G, R>>,
    id_raw: &str,
    action: &str,
    body: Option<&str>,
) -> ApiResponse {
    let Ok(id) = SessionId::from_str(id_raw) else {
        return text(404, "Not Found");
    };
    let now = Utc::now();
    let Some(mut flow) = state.sessions.claim(&id, now) else {
        // Expired, or another action on this session is still in flight.
        return redirect(&format!("/sessions/{}", id));
    };

    let gateway = state.gateway.as_ref();
    let reporter = state.reporter.as_ref();
    let notice = match action {
        "feedback" => {
            match parse_form(body.unwrap_or(""))
                .get("reason")
                .map(|code| code.parse::<FeedbackReason>())
            {
                Some(Ok(reason)) => flow.toggle_reason(reason, reporter),
                _ => warn!(session = %id, "Feedback post without a valid reason"),
            }
            None
        }
        "unsubscribe" => Some(flow.unsubscribe(gateway, reporter, now).await.notice()),
        "undo" => Some(flow.undo(gateway, reporter, now).await.notice()),
        "resubscribe" => Some(flow.subscribe(gateway, reporter).await.notice()),
        "retry" => {
            flow.retry(gateway, reporter).await;
            None
        }
        _ => {
            state.sessions.restore(id, flow, now);
            return text(404, "Not Found");
        }
    };

    state.sessions.restore(id, flow, Utc::now());
    match notice {
        Some(n) => redirect(&format!("/sessions/{}?notice={}", id, n.code())),
        None => redirect(&format!("/sessions/{}", id)),
    }
}

/// GET /sessions/{id}/channel/{name}
///
/// Reports the stay-connected click, then forwards to the external link.
/// The redirect happens regardless: analytics must never block the user.
pub(super) async fn channel_get<G: Gateway, R: Reporter>(
    state: &Arc<AppState<G, R>>,
    id_raw: &str,
    channel_code: &str,
) -> ApiResponse {
    let Some(channel) = ALT_CHANNELS.iter().find(|c| c.code == channel_code) else {
        return text(404, "Not Found");
    };

    if let Ok(id) = SessionId::from_str(id_raw) {
        let now = Utc::now();
        if let Some(flow) = state.sessions.claim(&id, now) {
            flow.report_channel_click(state.reporter.as_ref(), channel.name);
            state.sessions.restore(id, flow, now);
        }
    }

    redirect(channel.href)
}

// ============================================================================
// Tests
// ============================================================================
