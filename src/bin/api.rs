//! HTTP Lambda serving the preference pages.
//!
//! All page behavior lives in the `api` module; this file adapts
//! `lambda_http` request/response types to the framework-agnostic core and
//! wires up process configuration.

use lambda_http::{Body, Error, Request, RequestExt, Response, run, service_fn};
use prefcenter::api::{self, ApiRequest, ApiResponse, AppState};
use prefcenter::config::Config;
use prefcenter::gateway::HttpGateway;
use prefcenter::report::MixpanelReporter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    // Missing gateway configuration is fatal before the first request.
    let config = Config::from_env().map_err(|e| Error::from(e.to_string()))?;

    let gateway = Arc::new(HttpGateway::new(
        config.gateway_api_url.clone(),
        config.gateway_api_key.clone(),
    ));
    let reporter = Arc::new(MixpanelReporter::from_config(config.mixpanel.clone()));
    let state = Arc::new(AppState::new(gateway, reporter));

    run(service_fn(|event| handler(event, state.clone()))).await
}

async fn handler(
    event: Request,
    state: Arc<AppState<HttpGateway, MixpanelReporter>>,
) -> Result<Response<Body>, Error> {
    let method = event.method().to_string();
    let path = event.uri().path().to_string();

    info!(method = %method, path = %path, "Handling request");

    let query: HashMap<String, String> = event
        .query_string_parameters()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let body = match event.body() {
        Body::Text(s) => Some(s.clone()),
        Body::Binary(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
        Body::Empty => None,
        _ => None,
    };

    let request = ApiRequest {
        method,
        path,
        query,
        body,
    };
    Ok(into_response(api::handle(&request, &state).await))
}

fn into_response(response: ApiResponse) -> Response<Body> {
    match response {
        ApiResponse::Html { status, body } => Response::builder()
            .status(status)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(Body::from(body))
            .expect("Failed to build response"),
        ApiResponse::Text { status, body } => Response::builder()
            .status(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(Body::from(body))
            .expect("Failed to build response"),
        ApiResponse::Redirect(location) => Response::builder()
            .status(303)
            .header("Location", location)
            .body(Body::Empty)
            .expect("Failed to build response"),
    }
}
