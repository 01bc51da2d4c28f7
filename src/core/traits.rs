//! Core traits for reqflow components
//!
//! These are the seams between the execution engine and everything it does
//! not own: how a request body is produced, how calls hit the wire, and where
//! log lines go.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::request::{Input, InvocationTarget, OutgoingRequest};

use super::context::ExecutionContext;

/// Produces the body of an HTTP request from the run so far.
///
/// The outgoing request is already populated from the descriptor; anything
/// changed on it (headers, path) is what the transport sends.
#[async_trait]
pub trait HttpInput: Send + Sync {
    async fn generate(&self, ctx: &ExecutionContext, outgoing: &mut OutgoingRequest) -> Input;
}

/// Produces the payload of a function invocation from the run so far.
#[async_trait]
pub trait InvocationInput: Send + Sync {
    async fn generate(&self, ctx: &ExecutionContext) -> Input;
}

/// What an HTTP transport observed for one call.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HttpReply {
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub status_message: String,
    pub http_version: String,
    pub method: String,
    pub body: Option<JsonValue>,
    /// Set when no response was received at all
    pub error: Option<String>,
}

impl HttpReply {
    /// A call that never produced a response.
    pub fn failed(method: &str, error: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Outcome of one function invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationReply {
    Result(Option<JsonValue>),
    Error(String),
}

/// Performs HTTP calls. Resolves exactly once per call; failures are
/// reported inside the reply.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &OutgoingRequest, body: Option<&JsonValue>) -> HttpReply;
}

/// Performs function invocations. Resolves exactly once per call.
#[async_trait]
pub trait InvocationTransport: Send + Sync {
    async fn invoke(&self, target: &InvocationTarget, payload: Option<&JsonValue>)
        -> InvocationReply;
}

/// Logging capability handed to the director.
pub trait RunLogger: Send + Sync {
    fn info(&self, msg: &str);
    fn debug(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}
