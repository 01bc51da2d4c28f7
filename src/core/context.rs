//! Shared execution context
//!
//! One context lives for one run. It holds four independent categories of
//! state, each in its own concurrent map so that traffic on one category
//! never waits on another:
//!
//! - active groups, keyed by group id
//! - active requests, keyed by (group id, request name)
//! - request records, by group id then request name
//! - response records, by group id then request name
//!
//! Readers get owned snapshots; nothing handed out keeps a lock alive.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use dashmap::DashMap;
use serde::Serialize;

use crate::{request::Request, tree::RequestGroup};

use super::record::{RequestRecord, ResponseRecord};

/// Identifies a request inside a run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestKey {
    pub group_id: String,
    pub name: String,
}

impl RequestKey {
    pub fn new(group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            name: name.into(),
        }
    }
}

/// A request currently in flight.
#[derive(Clone, Debug)]
pub struct ActiveRequest {
    pub group_id: String,
    pub request: Request,
}

/// Records of the whole run, grouped by group id then request name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionData {
    pub requests: BTreeMap<String, BTreeMap<String, RequestRecord>>,
    pub responses: BTreeMap<String, BTreeMap<String, ResponseRecord>>,
}

/// Concurrency-safe state shared by every runner of a run.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    active_groups: DashMap<String, Arc<RequestGroup>>,
    active_requests: DashMap<RequestKey, Request>,
    requests: DashMap<String, HashMap<String, RequestRecord>>,
    responses: DashMap<String, HashMap<String, ResponseRecord>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_active_group(&self, group: Arc<RequestGroup>) {
        self.active_groups.insert(group.id().to_string(), group);
    }

    pub fn unregister_active_group(&self, id: &str) -> Option<Arc<RequestGroup>> {
        self.active_groups.remove(id).map(|(_, group)| group)
    }

    pub fn active_group(&self, id: &str) -> Option<Arc<RequestGroup>> {
        self.active_groups.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the groups currently running.
    pub fn active_groups(&self) -> Vec<Arc<RequestGroup>> {
        self.active_groups
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn register_active_request(&self, group_id: &str, request: Request) {
        let key = RequestKey::new(group_id, request.name());
        self.active_requests.insert(key, request);
    }

    pub fn unregister_active_request(&self, group_id: &str, name: &str) -> Option<Request> {
        self.active_requests
            .remove(&RequestKey::new(group_id, name))
            .map(|(_, request)| request)
    }

    /// First active request with this name, in any group.
    pub fn active_request(&self, name: &str) -> Option<ActiveRequest> {
        self.active_requests
            .iter()
            .find(|entry| entry.key().name == name)
            .map(|entry| ActiveRequest {
                group_id: entry.key().group_id.clone(),
                request: entry.value().clone(),
            })
    }

    pub fn active_request_in(&self, group_id: &str, name: &str) -> Option<Request> {
        self.active_requests
            .get(&RequestKey::new(group_id, name))
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of the requests currently in flight.
    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        self.active_requests
            .iter()
            .map(|entry| ActiveRequest {
                group_id: entry.key().group_id.clone(),
                request: entry.value().clone(),
            })
            .collect()
    }

    /// True when no group and no request is running.
    pub fn is_idle(&self) -> bool {
        self.active_groups.is_empty() && self.active_requests.is_empty()
    }

    pub fn set_request_data(&self, group_id: &str, name: &str, record: RequestRecord) {
        self.requests
            .entry(group_id.to_string())
            .or_default()
            .insert(name.to_string(), record);
    }

    pub fn request_data(&self, group_id: &str, name: &str) -> Option<RequestRecord> {
        self.requests
            .get(group_id)
            .and_then(|group| group.get(name).cloned())
    }

    pub fn set_response_data(&self, group_id: &str, name: &str, record: ResponseRecord) {
        self.responses
            .entry(group_id.to_string())
            .or_default()
            .insert(name.to_string(), record);
    }

    pub fn response_data(&self, group_id: &str, name: &str) -> Option<ResponseRecord> {
        self.responses
            .get(group_id)
            .and_then(|group| group.get(name).cloned())
    }

    /// Snapshot of every record written so far.
    pub fn get_data(&self) -> ExecutionData {
        ExecutionData {
            requests: snapshot(&self.requests),
            responses: snapshot(&self.responses),
        }
    }
}

fn snapshot<T: Clone>(
    map: &DashMap<String, HashMap<String, T>>,
) -> BTreeMap<String, BTreeMap<String, T>> {
    map.iter()
        .map(|entry| {
            let records = entry
                .value()
                .iter()
                .map(|(name, record)| (name.clone(), record.clone()))
                .collect();
            (entry.key().clone(), records)
        })
        .collect()
}
