use std::{
    collections::{HashMap, HashSet},
    fs,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    core::error::{ErrorContext, FlowResult},
    request::{self, HttpTargetConfig, Request},
    tree::RequestTree,
};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Log per-request timings
    #[serde(default)]
    pub debug: bool,

    #[validate(nested)]
    pub log: Option<Log>,

    #[serde(default)]
    pub transport: TransportSettings,

    #[validate(nested)]
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> FlowResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> FlowResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config =
            serde_yaml::from_str(conf_str).with_context("Unable to parse yaml conf")?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> FlowResult<String> {
        serde_yaml::to_string(self).with_context("Unable to serialize conf")
    }

    /// Feed the configured groups through the tree builder.
    pub fn build_tree(&self) -> FlowResult<RequestTree> {
        let mut tree = RequestTree::new();
        for group in &self.groups {
            tree.from_the_beginning();
            group.add_to(&mut tree)?;
        }
        tree.from_the_beginning();
        debug!(
            "Built request tree with {} groups",
            tree.request_groups_count()
        );
        Ok(tree)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,
    pub level: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransportSettings {
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    /// Sent with every HTTP request unless the request sets its own
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "GroupConfig::validate_requests"))]
pub struct GroupConfig {
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(default)]
    pub requests: Vec<RequestConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub children: Vec<GroupConfig>,
}

impl GroupConfig {
    fn validate_requests(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::new();
        for request in &self.requests {
            if !names.insert(request.name()) {
                let mut err = ValidationError::new("duplicate_request_name");
                err.add_param("name".into(), &request.name().to_string());
                return Err(err);
            }

            if let RequestConfig::Http(http) = request {
                if http.url.is_none() && http.host.is_none() {
                    let mut err = ValidationError::new("url_or_host_required");
                    err.add_param("name".into(), &http.name);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    fn add_to(&self, tree: &mut RequestTree) -> FlowResult<()> {
        tree.start_group(self.id.as_str())?;
        for request in &self.requests {
            tree.add_request(request.to_request()?)?;
        }
        for child in &self.children {
            tree.after_group(&self.id)?;
            child.add_to(tree)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestConfig {
    Http(HttpRequestConfig),
    Invocation(InvocationRequestConfig),
}

impl RequestConfig {
    pub fn name(&self) -> &str {
        match self {
            RequestConfig::Http(http) => &http.name,
            RequestConfig::Invocation(invocation) => &invocation.name,
        }
    }

    pub fn to_request(&self) -> FlowResult<Request> {
        match self {
            RequestConfig::Http(http) => http.to_request(),
            RequestConfig::Invocation(invocation) => {
                request::invocation(
                    invocation.name.as_str(),
                    invocation.function.as_str(),
                    invocation.qualifier.as_deref(),
                )
                .map(Request::from)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    pub name: String,
    #[serde(default = "HttpRequestConfig::default_method")]
    pub method: String,
    pub url: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<u16>,
}

impl HttpRequestConfig {
    fn default_method() -> String {
        "GET".to_string()
    }

    fn default_protocol() -> String {
        "http".to_string()
    }

    fn to_request(&self) -> FlowResult<Request> {
        let method = request::method_from_str(&self.method)?;
        let http = match &self.url {
            Some(url) => request::http(self.name.as_str(), method, url.as_str())?,
            None => {
                let target = HttpTargetConfig {
                    host: self.host.clone(),
                    path: Some(self.path.clone().unwrap_or_else(|| "/".to_string())),
                    protocol: Some(
                        self.protocol
                            .clone()
                            .unwrap_or_else(Self::default_protocol),
                    ),
                    method: Some(self.method.clone()),
                    port: self.port,
                };
                request::http(self.name.as_str(), method, target)?
            }
        };
        Ok(http.into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvocationRequestConfig {
    pub name: String,
    pub function: String,
    pub qualifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FlowError;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
debug: true
log:
  path: /tmp/reqflow.log

transport:
  timeout_ms: 3000
  headers:
    x-api-key: secret

groups:
  - id: users
    requests:
      - type: http
        name: list
        url: http://api.com/users
      - type: http
        name: create
        method: post
        host: api.com
        path: users
        port: 8080
    children:
      - id: audit
        requests:
          - type: invocation
            name: record
            function: arn:aws:lambda:us-east-1:1:function:audit
  - id: health
    requests:
      - type: http
        name: ping
        url: https://status.api.com/ping
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert!(conf.debug);
        assert_eq!(Some(3000), conf.transport.timeout_ms);
        assert_eq!(1, conf.transport.headers.len());
        assert_eq!(2, conf.groups.len());
        assert_eq!(1, conf.groups[0].children.len());

        let tree = conf.build_tree().unwrap();
        assert_eq!(3, tree.request_groups_count());
        assert_eq!(2, tree.groups().len());
        assert_eq!(None, tree.current_group());

        let users = tree.find("users").unwrap();
        assert_eq!(2, users.requests().len());
        match &users.requests()[1] {
            Request::Http(http) => {
                assert_eq!(http.target().method, http::Method::POST);
                assert_eq!(http.target().url(), "http://api.com:8080/users");
            }
            other => panic!("unexpected request {other:?}"),
        }

        let audit = tree.find("audit").unwrap();
        match &audit.requests()[0] {
            Request::Invocation(invocation) => {
                assert_eq!(invocation.target().qualifier, request::DEFAULT_QUALIFIER)
            }
            other => panic!("unexpected request {other:?}"),
        }

        assert!(conf.to_yaml().unwrap().contains("audit"));
    }

    #[test]
    fn test_duplicate_request_name() {
        init_log();
        let conf_str = r#"
groups:
  - id: g
    requests:
      - type: http
        name: a
        url: http://api.com/a
      - type: invocation
        name: a
        function: fn
        "#;
        let err = Config::from_yaml(conf_str).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn test_http_request_requires_target() {
        init_log();
        let conf_str = r#"
groups:
  - id: g
    children:
      - id: nested
        requests:
          - type: http
            name: nowhere
        "#;
        let err = Config::from_yaml(conf_str).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn test_duplicate_group_id_across_file() {
        init_log();
        let conf_str = r#"
groups:
  - id: g
    children:
      - id: shared
  - id: other
    children:
      - id: shared
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        let err = conf.build_tree().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_yaml() {
        init_log();
        let err = Config::from_yaml("groups: [").unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));

        let err = Config::from_yaml("groups:\n  - requests: []\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bad_url_fails_build() {
        init_log();
        let conf_str = r#"
groups:
  - id: g
    requests:
      - type: http
        name: broken
        url: not a url
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert!(conf.build_tree().is_err());
    }
}
