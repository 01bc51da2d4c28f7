//! Request and response records kept in the execution context

use std::{collections::BTreeMap, time::SystemTime};

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::request::{InvocationTarget, OutgoingRequest, Request, RequestDescriptor};

use super::traits::{HttpReply, InvocationReply};

/// What was actually put on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SentRequest {
    Http {
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
    },
    Invocation {
        function: String,
        qualifier: String,
    },
}

/// Written when a request is dispatched.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestRecord {
    pub request: RequestDescriptor,
    pub input: Option<JsonValue>,
    pub start_time: SystemTime,
    pub sent: SentRequest,
}

impl RequestRecord {
    pub fn http(
        request: RequestDescriptor,
        input: Option<JsonValue>,
        outgoing: &OutgoingRequest,
    ) -> Self {
        Self {
            request,
            input,
            start_time: SystemTime::now(),
            sent: SentRequest::Http {
                url: outgoing.url(),
                method: outgoing.method.to_string(),
                headers: outgoing.header_map(),
            },
        }
    }

    pub fn invocation(
        request: RequestDescriptor,
        input: Option<JsonValue>,
        target: &InvocationTarget,
    ) -> Self {
        Self {
            request,
            input,
            start_time: SystemTime::now(),
            sent: SentRequest::Invocation {
                function: target.function.clone(),
                qualifier: target.qualifier.clone(),
            },
        }
    }
}

/// Kind-specific part of a response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResponseDetail {
    Http {
        headers: BTreeMap<String, String>,
        status_code: u16,
        status_message: String,
        http_version: String,
        method: String,
        error: Option<String>,
    },
    Invocation {
        error: Option<String>,
    },
}

/// Written when a request completes or is canceled.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub end_time: SystemTime,
    pub body: Option<JsonValue>,
    pub is_canceled: bool,
    /// Absent for canceled requests
    pub detail: Option<ResponseDetail>,
}

impl ResponseRecord {
    pub fn canceled() -> Self {
        Self {
            end_time: SystemTime::now(),
            body: None,
            is_canceled: true,
            detail: None,
        }
    }

    pub fn from_http(reply: HttpReply) -> Self {
        Self {
            end_time: SystemTime::now(),
            body: reply.body,
            is_canceled: false,
            detail: Some(ResponseDetail::Http {
                headers: reply.headers,
                status_code: reply.status_code,
                status_message: reply.status_message,
                http_version: reply.http_version,
                method: reply.method,
                error: reply.error,
            }),
        }
    }

    pub fn from_invocation(reply: InvocationReply) -> Self {
        let (body, error) = match reply {
            InvocationReply::Result(body) => (body, None),
            InvocationReply::Error(error) => (None, Some(error)),
        };
        Self {
            end_time: SystemTime::now(),
            body,
            is_canceled: false,
            detail: Some(ResponseDetail::Invocation { error }),
        }
    }

    /// A request whose runner died before the transport answered.
    pub fn failed(request: &Request, error: impl Into<String>) -> Self {
        match request {
            Request::Http(http) => {
                Self::from_http(HttpReply::failed(http.target().method.as_str(), error))
            }
            Request::Invocation(_) => Self::from_invocation(InvocationReply::Error(error.into())),
        }
    }

    /// Error message carried by the response, if the call failed.
    pub fn error(&self) -> Option<&str> {
        match &self.detail {
            Some(ResponseDetail::Http { error, .. }) | Some(ResponseDetail::Invocation { error }) => {
                error.as_deref()
            }
            None => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.detail {
            Some(ResponseDetail::Http { status_code, .. }) => Some(*status_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request;

    #[test]
    fn test_http_records() {
        let req = request::get("users", "http://api.com/users").unwrap();
        let mut outgoing = req.outgoing();
        outgoing.insert_header("x-api-key", "k").unwrap();

        let record = RequestRecord::http(
            crate::request::Request::from(req).descriptor(),
            Some(JsonValue::from("payload")),
            &outgoing,
        );
        match &record.sent {
            SentRequest::Http {
                url,
                method,
                headers,
            } => {
                assert_eq!(url, "http://api.com/users");
                assert_eq!(method, "GET");
                assert_eq!(headers.get("x-api-key").map(String::as_str), Some("k"));
            }
            other => panic!("unexpected sent request {other:?}"),
        }

        let response = ResponseRecord::from_http(HttpReply {
            status_code: 404,
            status_message: "Not Found".to_string(),
            ..Default::default()
        });
        assert!(!response.is_canceled);
        assert_eq!(response.status_code(), Some(404));
        assert_eq!(response.error(), None);
    }

    #[test]
    fn test_invocation_error_is_data() {
        let response = ResponseRecord::from_invocation(InvocationReply::Error("denied".into()));
        assert_eq!(response.error(), Some("denied"));
        assert_eq!(response.body, None);
        assert_eq!(response.status_code(), None);
    }

    #[test]
    fn test_failed_record_follows_request_kind() {
        let req: Request = request::post("p", "http://api.com/p").unwrap().into();
        let record = ResponseRecord::failed(&req, "task panicked");
        assert_eq!(record.error(), Some("task panicked"));
        assert_eq!(record.status_code(), Some(0));
        match record.detail {
            Some(ResponseDetail::Http { method, .. }) => assert_eq!(method, "POST"),
            other => panic!("unexpected detail {other:?}"),
        }

        let req: Request = request::invocation("i", "fn", None).unwrap().into();
        let record = ResponseRecord::failed(&req, "task panicked");
        assert!(matches!(
            record.detail,
            Some(ResponseDetail::Invocation { .. })
        ));
    }

    #[test]
    fn test_canceled_record() {
        let response = ResponseRecord::canceled();
        assert!(response.is_canceled);
        assert!(response.detail.is_none());
    }
}
