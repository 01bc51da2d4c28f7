//! Request descriptors
//!
//! A request is either an HTTP call or a function invocation. Both carry a
//! name (unique inside the owning group), kind-specific target data and an
//! optional input generator that runs right before dispatch.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use http::{header::HeaderName, HeaderMap, HeaderValue, Method, Uri};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{
    config_error,
    core::{
        context::ExecutionContext,
        error::FlowResult,
        traits::{HttpInput, InvocationInput},
    },
};

/// Qualifier used when an invocation target does not name one.
pub const DEFAULT_QUALIFIER: &str = "$LATEST";

/// What an input generator hands back to the request runner.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    /// Send the request with this body
    Body(JsonValue),
    /// Send the request without a body
    Empty,
    /// Do not send the request at all
    Cancel,
}

impl Input {
    pub fn body(value: impl Into<JsonValue>) -> Self {
        Input::Body(value.into())
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Input::Cancel)
    }

    pub(crate) fn into_body(self) -> Option<JsonValue> {
        match self {
            Input::Body(value) => Some(value),
            Input::Empty | Input::Cancel => None,
        }
    }
}

impl From<JsonValue> for Input {
    fn from(value: JsonValue) -> Self {
        Input::Body(value)
    }
}

fn serialize_method<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(method.as_str())
}

fn format_url(protocol: &str, host: &str, port: Option<u16>, path: &str) -> String {
    match port {
        Some(port) => format!("{protocol}//{host}:{port}{path}"),
        None => format!("{protocol}//{host}{path}"),
    }
}

fn normalize_protocol(protocol: &str) -> String {
    let scheme = protocol.trim().trim_end_matches(':');
    format!("{}:", scheme.to_ascii_lowercase())
}

fn parse_method(method: &str) -> FlowResult<Method> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| config_error!("invalid http method '{}': {}", method, e))
}

/// Where an HTTP request goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HttpTarget {
    pub host: String,
    pub path: String,
    pub port: Option<u16>,
    /// Scheme with its trailing colon, e.g. `http:`
    pub protocol: String,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
}

impl HttpTarget {
    /// Parse an absolute URL. Scheme and host are mandatory.
    pub fn parse(method: Method, url: &str) -> FlowResult<Self> {
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|e| config_error!("invalid url '{}': {}", url, e))?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| config_error!("invalid url '{}': missing scheme", url))?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| config_error!("invalid url '{}': missing host", url))?;
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/");

        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
            port: uri.port_u16(),
            protocol: normalize_protocol(scheme),
            method,
        })
    }

    /// Build from a config object. Host, path, protocol and method must all
    /// be present; `method` overrides the configured one.
    pub fn from_config(method: Method, config: &HttpTargetConfig) -> FlowResult<Self> {
        config
            .validate()
            .map_err(|e| config_error!("incomplete http request config: {}", e))?;

        // validated above
        let host = config.host.as_deref().unwrap_or_default();
        let path = config.path.as_deref().unwrap_or_default();
        let protocol = config.protocol.as_deref().unwrap_or_default();
        parse_method(config.method.as_deref().unwrap_or_default())?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Ok(Self {
            host: host.to_string(),
            path,
            port: config.port,
            protocol: normalize_protocol(protocol),
            method,
        })
    }

    pub fn url(&self) -> String {
        format_url(&self.protocol, &self.host, self.port, &self.path)
    }
}

/// Field-by-field HTTP target, as found in configuration files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct HttpTargetConfig {
    #[validate(required, length(min = 1))]
    pub host: Option<String>,
    #[validate(required, length(min = 1))]
    pub path: Option<String>,
    #[validate(required, length(min = 1))]
    pub protocol: Option<String>,
    #[validate(required, length(min = 1))]
    pub method: Option<String>,
    pub port: Option<u16>,
}

/// Either a URL string or a config object.
#[derive(Clone, Debug)]
pub enum HttpSource {
    Url(String),
    Config(HttpTargetConfig),
}

impl From<&str> for HttpSource {
    fn from(url: &str) -> Self {
        HttpSource::Url(url.to_string())
    }
}

impl From<String> for HttpSource {
    fn from(url: String) -> Self {
        HttpSource::Url(url)
    }
}

impl From<HttpTargetConfig> for HttpSource {
    fn from(config: HttpTargetConfig) -> Self {
        HttpSource::Config(config)
    }
}

/// Which function to invoke.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationTarget {
    pub function: String,
    pub qualifier: String,
}

impl InvocationTarget {
    pub fn new(function: impl Into<String>, qualifier: Option<&str>) -> Self {
        let qualifier = match qualifier.map(str::trim) {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => DEFAULT_QUALIFIER.to_string(),
        };
        Self {
            function: function.into(),
            qualifier,
        }
    }
}

/// Mutable view of an HTTP request about to be sent. Input generators get
/// it pre-populated from the target and may change anything on it.
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub headers: HeaderMap,
}

impl OutgoingRequest {
    pub fn from_target(target: &HttpTarget) -> Self {
        Self {
            method: target.method.clone(),
            protocol: target.protocol.clone(),
            host: target.host.clone(),
            port: target.port,
            path: target.path.clone(),
            headers: HeaderMap::new(),
        }
    }

    pub fn url(&self) -> String {
        format_url(&self.protocol, &self.host, self.port, &self.path)
    }

    /// Insert or replace a header.
    pub fn insert_header(&mut self, name: &str, value: &str) -> FlowResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| config_error!("invalid header name '{}': {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| config_error!("invalid header value for '{}': {}", name, e))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Headers as plain strings, for records. Non-UTF-8 values are dropped.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect()
    }
}

struct SyncHttpInput<F>(F);

#[async_trait]
impl<F> HttpInput for SyncHttpInput<F>
where
    F: Fn(&ExecutionContext, &mut OutgoingRequest) -> Input + Send + Sync,
{
    async fn generate(&self, ctx: &ExecutionContext, outgoing: &mut OutgoingRequest) -> Input {
        (self.0)(ctx, outgoing)
    }
}

struct SyncInvocationInput<F>(F);

#[async_trait]
impl<F> InvocationInput for SyncInvocationInput<F>
where
    F: Fn(&ExecutionContext) -> Input + Send + Sync,
{
    async fn generate(&self, ctx: &ExecutionContext) -> Input {
        (self.0)(ctx)
    }
}

/// An HTTP request descriptor.
#[derive(Clone)]
pub struct HttpRequest {
    name: String,
    target: HttpTarget,
    input: Option<Arc<dyn HttpInput>>,
}

impl HttpRequest {
    pub fn new(name: impl Into<String>, target: HttpTarget) -> Self {
        Self {
            name: name.into(),
            target,
            input: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &HttpTarget {
        &self.target
    }

    /// Attach a synchronous input generator.
    ///
    /// A request holds one generator. Attaching another logs a warning and
    /// replaces the previous one.
    pub fn with_input<F>(self, input: F) -> Self
    where
        F: Fn(&ExecutionContext, &mut OutgoingRequest) -> Input + Send + Sync + 'static,
    {
        self.with_async_input(SyncHttpInput(input))
    }

    /// Attach an input generator that may await. Replaces any generator
    /// already attached.
    pub fn with_async_input(mut self, input: impl HttpInput + 'static) -> Self {
        if self.input.is_some() {
            log::warn!("Replacing input generator of request {}", self.name);
        }
        self.input = Some(Arc::new(input));
        self
    }

    pub fn input(&self) -> Option<&Arc<dyn HttpInput>> {
        self.input.as_ref()
    }

    /// Outgoing request pre-populated from the target.
    pub fn outgoing(&self) -> OutgoingRequest {
        OutgoingRequest::from_target(&self.target)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

/// A function invocation descriptor.
#[derive(Clone)]
pub struct InvocationRequest {
    name: String,
    target: InvocationTarget,
    input: Option<Arc<dyn InvocationInput>>,
}

impl InvocationRequest {
    pub fn new(name: impl Into<String>, target: InvocationTarget) -> Self {
        Self {
            name: name.into(),
            target,
            input: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &InvocationTarget {
        &self.target
    }

    /// Attach a synchronous input generator.
    ///
    /// A request holds one generator. Attaching another logs a warning and
    /// replaces the previous one.
    pub fn with_input<F>(self, input: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Input + Send + Sync + 'static,
    {
        self.with_async_input(SyncInvocationInput(input))
    }

    /// Attach an input generator that may await. Replaces any generator
    /// already attached.
    pub fn with_async_input(mut self, input: impl InvocationInput + 'static) -> Self {
        if self.input.is_some() {
            log::warn!("Replacing input generator of request {}", self.name);
        }
        self.input = Some(Arc::new(input));
        self
    }

    pub fn input(&self) -> Option<&Arc<dyn InvocationInput>> {
        self.input.as_ref()
    }
}

impl fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

/// Target data without the input generator, for records and events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    Http(HttpTarget),
    Invocation(InvocationTarget),
}

/// Serializable snapshot of a request descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
    pub name: String,
    pub target: Target,
}

/// A request owned by a group.
#[derive(Clone, Debug)]
pub enum Request {
    Http(HttpRequest),
    Invocation(InvocationRequest),
}

impl Request {
    pub fn name(&self) -> &str {
        match self {
            Request::Http(req) => req.name(),
            Request::Invocation(req) => req.name(),
        }
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        let target = match self {
            Request::Http(req) => Target::Http(req.target().clone()),
            Request::Invocation(req) => Target::Invocation(req.target().clone()),
        };
        RequestDescriptor {
            name: self.name().to_string(),
            target,
        }
    }
}

impl From<HttpRequest> for Request {
    fn from(req: HttpRequest) -> Self {
        Request::Http(req)
    }
}

impl From<InvocationRequest> for Request {
    fn from(req: InvocationRequest) -> Self {
        Request::Invocation(req)
    }
}

/// HTTP request with an explicit method.
pub fn http(
    name: impl Into<String>,
    method: Method,
    source: impl Into<HttpSource>,
) -> FlowResult<HttpRequest> {
    let target = match source.into() {
        HttpSource::Url(url) => HttpTarget::parse(method, &url)?,
        HttpSource::Config(config) => HttpTarget::from_config(method, &config)?,
    };
    Ok(HttpRequest::new(name, target))
}

pub fn get(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::GET, source)
}

pub fn post(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::POST, source)
}

pub fn put(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::PUT, source)
}

pub fn patch(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::PATCH, source)
}

pub fn delete(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::DELETE, source)
}

pub fn head(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::HEAD, source)
}

pub fn options(name: impl Into<String>, source: impl Into<HttpSource>) -> FlowResult<HttpRequest> {
    http(name, Method::OPTIONS, source)
}

/// Function invocation. An absent or empty qualifier means `$LATEST`.
pub fn invocation(
    name: impl Into<String>,
    function: impl Into<String>,
    qualifier: Option<&str>,
) -> FlowResult<InvocationRequest> {
    let function = function.into();
    if function.trim().is_empty() {
        return Err(config_error!("invocation requires a function identifier"));
    }
    Ok(InvocationRequest::new(
        name,
        InvocationTarget::new(function, qualifier),
    ))
}

/// Parse a method name from configuration, e.g. `post` or `GET`.
pub fn method_from_str(method: &str) -> FlowResult<Method> {
    parse_method(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:lambda:eu-west-1:123456789012:function:orders";

    #[test]
    fn test_get_from_url() {
        let req = get("n", "http://api.com/test").unwrap();
        let target = req.target();
        assert_eq!(target.host, "api.com");
        assert_eq!(target.method, Method::GET);
        assert_eq!(target.protocol, "http:");
        assert_eq!(target.path, "/test");
        assert_eq!(target.port, None);
        assert_eq!(target.url(), "http://api.com/test");
    }

    #[test]
    fn test_url_keeps_port_and_query() {
        let req = post("n", "https://api.com:8443/orders?limit=5").unwrap();
        let target = req.target();
        assert_eq!(target.method, Method::POST);
        assert_eq!(target.protocol, "https:");
        assert_eq!(target.port, Some(8443));
        assert_eq!(target.path, "/orders?limit=5");
        assert_eq!(target.url(), "https://api.com:8443/orders?limit=5");
    }

    #[test]
    fn test_url_without_path_defaults_to_root() {
        let req = get("n", "http://api.com").unwrap();
        assert_eq!(req.target().path, "/");
    }

    #[test]
    fn test_malformed_urls_fail() {
        assert!(get("n", "not a url").is_err());
        assert!(get("n", "/relative/path").is_err());
        assert!(get("n", "").is_err());
        let err = get("n", "not a url").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_config_source() {
        let config = HttpTargetConfig {
            host: Some("api.com".to_string()),
            path: Some("users".to_string()),
            protocol: Some("https".to_string()),
            method: Some("get".to_string()),
            port: Some(8080),
        };
        let req = put("n", config).unwrap();
        let target = req.target();
        assert_eq!(target.method, Method::PUT);
        assert_eq!(target.protocol, "https:");
        assert_eq!(target.path, "/users");
        assert_eq!(target.url(), "https://api.com:8080/users");
    }

    #[test]
    fn test_config_missing_fields_fail() {
        let config = HttpTargetConfig {
            host: Some("api.com".to_string()),
            path: Some("/".to_string()),
            protocol: None,
            method: Some("GET".to_string()),
            port: None,
        };
        assert!(get("n", config).is_err());

        let config = HttpTargetConfig {
            host: Some(String::new()),
            path: Some("/".to_string()),
            protocol: Some("http:".to_string()),
            method: Some("GET".to_string()),
            port: None,
        };
        assert!(get("n", config).is_err());
    }

    #[test]
    fn test_config_with_invalid_method_fails() {
        let config = HttpTargetConfig {
            host: Some("api.com".to_string()),
            path: Some("/".to_string()),
            protocol: Some("http:".to_string()),
            method: Some("NOT A METHOD".to_string()),
            port: None,
        };
        assert!(get("n", config).is_err());
    }

    #[test]
    fn test_invocation_qualifier() {
        let req = invocation("n", ARN, None).unwrap();
        assert_eq!(req.target().qualifier, "$LATEST");

        let req = invocation("n", ARN, Some("")).unwrap();
        assert_eq!(req.target().qualifier, "$LATEST");

        let req = invocation("n", ARN, Some("dev")).unwrap();
        assert_eq!(req.target().qualifier, "dev");
        assert_eq!(req.target().function, ARN);
    }

    #[test]
    fn test_invocation_requires_function() {
        assert!(invocation("n", "  ", None).is_err());
    }

    #[test]
    fn test_outgoing_request_headers() {
        let req = get("n", "http://api.com/test").unwrap();
        let mut outgoing = req.outgoing();
        assert_eq!(outgoing.url(), "http://api.com/test");

        outgoing.insert_header("x-trace-id", "abc").unwrap();
        assert_eq!(outgoing.header("x-trace-id"), Some("abc"));
        assert_eq!(
            outgoing.header_map().get("x-trace-id").map(String::as_str),
            Some("abc")
        );
        assert!(outgoing.insert_header("bad header", "v").is_err());
    }

    #[test]
    fn test_descriptor_serializes_kind() {
        let req: Request = get("users", "http://api.com/users").unwrap().into();
        let json = serde_json::to_value(req.descriptor()).unwrap();
        assert_eq!(json["name"], "users");
        assert_eq!(json["target"]["kind"], "http");
        assert_eq!(json["target"]["method"], "GET");

        let req: Request = invocation("orders", ARN, Some("prod")).unwrap().into();
        let json = serde_json::to_value(req.descriptor()).unwrap();
        assert_eq!(json["target"]["kind"], "invocation");
        assert_eq!(json["target"]["qualifier"], "prod");
    }

    #[test]
    fn test_input_body_helpers() {
        assert_eq!(Input::body("x").into_body(), Some(JsonValue::from("x")));
        assert_eq!(Input::Empty.into_body(), None);
        assert!(Input::Cancel.is_cancel());
        assert!(!Input::Empty.is_cancel());
    }

    #[tokio::test]
    async fn test_second_input_replaces_first() {
        let ctx = ExecutionContext::new();

        let req = get("n", "http://api.com/test")
            .unwrap()
            .with_input(|_, _| Input::Cancel)
            .with_input(|_, _| Input::body("second"));
        let mut outgoing = req.outgoing();
        let input = req.input().unwrap().generate(&ctx, &mut outgoing).await;
        assert_eq!(input, Input::body("second"));

        let req = invocation("n", ARN, None)
            .unwrap()
            .with_input(|_| Input::Cancel)
            .with_input(|_| Input::Empty);
        let input = req.input().unwrap().generate(&ctx).await;
        assert_eq!(input, Input::Empty);
    }
}
