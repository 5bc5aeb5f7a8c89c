//! Trigger Endpoint
//!
//! HTTP surface receiving Pub/Sub pushes as CloudEvents, in binary mode
//! (`ce-*` headers) or structured mode (`application/cloudevents+json`).
//! A plain Pub/Sub push without CloudEvent headers is accepted too.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::delivery::{Envelope, PubSubPush};
use crate::forwarder::Forwarder;

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
const PUBSUB_EVENT_TYPE: &str = "google.cloud.pubsub.topic.v1.messagePublished";
const DEFAULT_SPEC_VERSION: &str = "1.0";

pub fn router(forwarder: Arc<Forwarder>) -> Router {
    Router::new()
        .route("/", post(receive_event))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(forwarder)
}

async fn health_check(State(forwarder): State<Arc<Forwarder>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gcp-relay",
        "bus": forwarder.target().to_string(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn receive_event(
    State(forwarder): State<Arc<Forwarder>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match parse_envelope(&headers, &body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Rejecting unparseable event: {:#}", e);
            return (StatusCode::BAD_REQUEST, format!("Invalid event: {e:#}")).into_response();
        }
    };

    // The outcome is already logged; acknowledge regardless so Pub/Sub
    // does not redeliver.
    forwarder.forward(&envelope).await;
    StatusCode::NO_CONTENT.into_response()
}

/// Build an envelope from either CloudEvent content mode.
pub fn parse_envelope(headers: &HeaderMap, body: &[u8]) -> anyhow::Result<Envelope> {
    let content_type = header(headers, CONTENT_TYPE.as_str()).unwrap_or_default();

    if content_type.starts_with(STRUCTURED_CONTENT_TYPE) {
        return serde_json::from_slice(body).context("Malformed structured CloudEvent");
    }

    let push: PubSubPush = serde_json::from_slice(body).context("Malformed Pub/Sub push body")?;

    match header(headers, "ce-id") {
        Some(id) => Ok(Envelope {
            id: id.to_string(),
            source: required_header(headers, "ce-source")?.to_string(),
            specversion: required_header(headers, "ce-specversion")?.to_string(),
            event_type: required_header(headers, "ce-type")?.to_string(),
            time: header(headers, "ce-time").map(str::to_string),
            data: push,
        }),
        None => from_push(push),
    }
}

fn from_push(push: PubSubPush) -> anyhow::Result<Envelope> {
    let id = push
        .message
        .message_id
        .clone()
        .ok_or_else(|| anyhow!("Pub/Sub push has no messageId"))?;

    Ok(Envelope {
        id,
        source: push.subscription.clone().unwrap_or_default(),
        specversion: DEFAULT_SPEC_VERSION.to_string(),
        event_type: PUBSUB_EVENT_TYPE.to_string(),
        time: push.message.publish_time.clone(),
        data: push,
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> anyhow::Result<&'a str> {
    header(headers, name).ok_or_else(|| anyhow!("Missing {} header", name))
}
