//! HTTP core for the preference pages.
//!
//! Framework-agnostic: accepts `ApiRequest`, returns `ApiResponse`.
//! The Lambda entry point in `src/bin/api.rs` adapts `lambda_http` types
//! to/from these and calls `handle`.

mod handlers;

use crate::flow::FlowConfig;
use crate::gateway::Gateway;
use crate::report::Reporter;
use crate::sessions::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Request / Response types
// ============================================================================

pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Option<String>,
}

pub enum ApiResponse {
    Html { status: u16, body: String },
    Text { status: u16, body: String },
    Redirect(String),
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        match self {
            Self::Html { status, .. } => *status,
            Self::Text { status, .. } => *status,
            Self::Redirect(_) => 303,
        }
    }

    pub fn redirect_location(&self) -> Option<&str> {
        if let Self::Redirect(loc) = self {
            Some(loc)
        } else {
            None
        }
    }

    pub fn body_contains(&self, s: &str) -> bool {
        match self {
            Self::Html { body, .. } | Self::Text { body, .. } => body.contains(s),
            Self::Redirect(_) => false,
        }
    }
}

// ============================================================================
// Application state
// ============================================================================

pub struct AppState<G, R> {
    pub(crate) gateway: Arc<G>,
    pub(crate) reporter: Arc<R>,
    pub(crate) sessions: SessionStore,
}

impl<G, R> AppState<G, R> {
    pub fn new(gateway: Arc<G>, reporter: Arc<R>) -> Self {
        Self {
            gateway,
            reporter,
            sessions: SessionStore::new(),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn handle<G, R>(request: &ApiRequest, state: &Arc<AppState<G, R>>) -> ApiResponse
where
    G: Gateway,
    R: Reporter,
{
    // Path identifiers arrive URL-encoded; decode each segment exactly once
    // here so nothing downstream ever sees or re-decodes encoded forms.
    let Some(segments) = decode_path(&request.path) else {
        return ApiResponse::Text {
            status: 400,
            body: "Bad Request".to_string(),
        };
    };
    let segments: Vec<&str> = segments.iter().map(|s| s.as_str()).collect();
    let notice = request.query.get("notice").map(|s| s.as_str());

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["topics", topic, subscriber]) => {
            handlers::page_get(state, FlowConfig::topic(*topic), subscriber).await
        }
        ("GET", ["workflows", workflow, subscriber]) => {
            handlers::page_get(state, FlowConfig::workflow(*workflow), subscriber).await
        }
        ("GET", ["sessions", id]) => handlers::session_get(state, id, notice).await,
        ("GET", ["sessions", id, "channel", channel]) => {
            handlers::channel_get(state, id, channel).await
        }
        ("POST", ["sessions", id, action]) => {
            handlers::session_post(state, id, action, request.body.as_deref()).await
        }
        _ => ApiResponse::Text {
            status: 404,
            body: "Not Found".to_string(),
        },
    }
}

fn decode_path(path: &str) -> Option<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .ok()
                .map(|decoded| decoded.into_owned())
        })
        .collect()
}

/// Minimal `application/x-www-form-urlencoded` body parser; the pages only
/// ever post single-field forms.
pub(crate) fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .ok()
                    .map(|decoded| decoded.into_owned())
            };
            Some((decode(key)?, decode(value)?))
        })
        .collect()
}
