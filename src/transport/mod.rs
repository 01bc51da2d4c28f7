//! Concrete transports
//!
//! The engine only sees the `HttpTransport` / `InvocationTransport` traits.
//! This module wires them to `reqwest` for HTTP and provides a placeholder
//! invoker for trees that carry invocation requests without a backend.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{header::HeaderName, HeaderMap, HeaderValue};
use serde_json::Value as JsonValue;

use crate::{
    config::TransportSettings,
    config_error,
    core::{
        error::{FlowError, FlowResult},
        traits::{HttpReply, HttpTransport, InvocationReply, InvocationTransport},
    },
    request::{InvocationTarget, OutgoingRequest},
};

/// The pair of transports a run dispatches through.
#[derive(Clone)]
pub struct TransportConfig {
    pub http: Arc<dyn HttpTransport>,
    pub invocation: Arc<dyn InvocationTransport>,
}

impl TransportConfig {
    pub fn new(http: Arc<dyn HttpTransport>, invocation: Arc<dyn InvocationTransport>) -> Self {
        Self { http, invocation }
    }

    /// `reqwest` for HTTP, no invocation backend.
    pub fn from_settings(settings: &TransportSettings) -> FlowResult<Self> {
        Ok(Self {
            http: Arc::new(ReqwestTransport::new(settings)?),
            invocation: Arc::new(UnconfiguredInvoker),
        })
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> FlowResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| config_error!("invalid default header name '{}': {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| config_error!("invalid default header value for '{}': {}", name, e))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout_ms) = settings.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(user_agent) = &settings.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        let client = builder
            .build()
            .map_err(|e| FlowError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutgoingRequest, body: Option<&JsonValue>) -> HttpReply {
        let url = request.url();
        let method = request.method.as_str();

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        builder = match body {
            Some(JsonValue::String(text)) => builder.body(text.clone()),
            Some(value) => builder.json(value),
            None => builder,
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("{} {} failed: {}", method, url, e);
                return HttpReply::failed(method, e.to_string());
            }
        };

        let status = response.status();
        let http_version = format!("{:?}", response.version());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = match response.text().await {
            Ok(text) => parse_body(text),
            Err(e) => {
                log::warn!("{} {} returned an unreadable body: {}", method, url, e);
                return HttpReply {
                    headers,
                    status_code: status.as_u16(),
                    status_message: status.canonical_reason().unwrap_or_default().to_string(),
                    http_version,
                    method: method.to_string(),
                    body: None,
                    error: Some(e.to_string()),
                };
            }
        };

        log::debug!("{} {} -> {}", method, url, status.as_u16());
        HttpReply {
            headers,
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            http_version,
            method: method.to_string(),
            body,
            error: None,
        }
    }
}

fn parse_body(text: String) -> Option<JsonValue> {
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(_) => Some(JsonValue::String(text)),
    }
}

/// Answers every invocation with an error reply.
pub struct UnconfiguredInvoker;

#[async_trait]
impl InvocationTransport for UnconfiguredInvoker {
    async fn invoke(
        &self,
        target: &InvocationTarget,
        _payload: Option<&JsonValue>,
    ) -> InvocationReply {
        log::warn!(
            "No invocation transport configured, {}:{} not called",
            target.function,
            target.qualifier
        );
        InvocationReply::Error(format!(
            "no invocation transport configured for {}:{}",
            target.function, target.qualifier
        ))
    }
}
