//! Request group tree and its builder
//!
//! Groups are built through a cursor: `start_group` nests a new group under
//! the cursor and moves onto it, `after_group` jumps back to an existing
//! group, `from_the_beginning` returns to the root level.

use std::{fmt, sync::Arc, time::SystemTime};

use arc_swap::ArcSwapOption;

use crate::{
    config_error,
    core::error::{FlowError, FlowResult},
    request::Request,
};

/// Start/end stamps of a group's latest run.
#[derive(Default)]
pub struct GroupTiming {
    start: ArcSwapOption<SystemTime>,
    end: ArcSwapOption<SystemTime>,
}

impl GroupTiming {
    pub(crate) fn mark_start(&self) {
        self.start.store(Some(Arc::new(SystemTime::now())));
        self.end.store(None);
    }

    pub(crate) fn mark_end(&self) {
        self.end.store(Some(Arc::new(SystemTime::now())));
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start.load_full().map(|t| *t)
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.end.load_full().map(|t| *t)
    }
}

impl Clone for GroupTiming {
    fn clone(&self) -> Self {
        Self {
            start: ArcSwapOption::new(self.start.load_full()),
            end: ArcSwapOption::new(self.end.load_full()),
        }
    }
}

impl fmt::Debug for GroupTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupTiming")
            .field("start", &self.start_time())
            .field("end", &self.end_time())
            .finish()
    }
}

/// A node of the execution tree.
#[derive(Clone, Debug)]
pub struct RequestGroup {
    id: String,
    requests: Vec<Request>,
    children: Vec<Arc<RequestGroup>>,
    timing: GroupTiming,
}

impl RequestGroup {
    fn new(id: String) -> Self {
        Self {
            id,
            requests: Vec::new(),
            children: Vec::new(),
            timing: GroupTiming::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn children(&self) -> &[Arc<RequestGroup>] {
        &self.children
    }

    pub fn timing(&self) -> &GroupTiming {
        &self.timing
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.timing.start_time()
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.timing.end_time()
    }
}

/// Depth-first, pre-order, first match.
pub fn find_group<'a>(groups: &'a [Arc<RequestGroup>], id: &str) -> Option<&'a Arc<RequestGroup>> {
    for group in groups {
        if group.id == id {
            return Some(group);
        }
        if let Some(found) = find_group(&group.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_path(groups: &[Arc<RequestGroup>], id: &str, path: &mut Vec<usize>) -> bool {
    for (idx, group) in groups.iter().enumerate() {
        path.push(idx);
        if group.id == id || find_path(&group.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Builder and owner of the group tree.
#[derive(Clone, Debug, Default)]
pub struct RequestTree {
    groups: Vec<Arc<RequestGroup>>,
    current_group: Option<String>,
    count: usize,
}

impl RequestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group under the cursor (or at the root) and move onto it.
    pub fn start_group(&mut self, id: impl Into<String>) -> FlowResult<&mut Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(config_error!("group id must not be empty"));
        }
        if find_group(&self.groups, &id).is_some() {
            return Err(config_error!("group id '{}' already exists", id));
        }

        let group = Arc::new(RequestGroup::new(id.clone()));
        match self.current_group.clone() {
            Some(parent) => self.group_mut(&parent)?.children.push(group),
            None => self.groups.push(group),
        }

        log::debug!("Started request group {id}");
        self.current_group = Some(id);
        self.count += 1;
        Ok(self)
    }

    /// Move the cursor to an existing group.
    pub fn after_group(&mut self, id: &str) -> FlowResult<&mut Self> {
        if find_group(&self.groups, id).is_none() {
            return Err(FlowError::NotFound(id.to_string()));
        }
        self.current_group = Some(id.to_string());
        Ok(self)
    }

    /// Append a request to the group under the cursor.
    pub fn add_request(&mut self, request: impl Into<Request>) -> FlowResult<&mut Self> {
        let current = self
            .current_group
            .clone()
            .ok_or_else(|| config_error!("no request group started; call start_group first"))?;
        let request = request.into();

        let group = self.group_mut(&current)?;
        if group.requests.iter().any(|r| r.name() == request.name()) {
            log::warn!(
                "Request name {} is used twice in group {}",
                request.name(),
                current
            );
        }
        group.requests.push(request);
        Ok(self)
    }

    /// Move the cursor back to the root level.
    pub fn from_the_beginning(&mut self) -> &mut Self {
        self.current_group = None;
        self
    }

    pub fn request_groups_count(&self) -> usize {
        self.count
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Root-level groups.
    pub fn groups(&self) -> &[Arc<RequestGroup>] {
        &self.groups
    }

    pub fn find(&self, id: &str) -> Option<&Arc<RequestGroup>> {
        find_group(&self.groups, id)
    }

    fn group_mut(&mut self, id: &str) -> FlowResult<&mut RequestGroup> {
        let mut path = Vec::new();
        if !find_path(&self.groups, id, &mut path) {
            return Err(FlowError::NotFound(id.to_string()));
        }

        let (first, rest) = path
            .split_first()
            .ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        let mut group = Arc::make_mut(&mut self.groups[*first]);
        for idx in rest {
            group = Arc::make_mut(&mut group.children[*idx]);
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request;

    fn req(name: &str) -> request::HttpRequest {
        request::get(name, "http://api.com/test").unwrap()
    }

    #[test]
    fn test_groups_count_tracks_successful_starts() {
        let mut tree = RequestTree::new();
        assert_eq!(tree.request_groups_count(), 0);

        tree.start_group("g1").unwrap();
        tree.start_group("g2").unwrap();
        assert!(tree.start_group("g1").is_err());
        tree.from_the_beginning().start_group("g3").unwrap();

        assert_eq!(tree.request_groups_count(), 3);
    }

    #[test]
    fn test_start_group_nests_under_cursor() {
        let mut tree = RequestTree::new();
        tree.start_group("parent")
            .unwrap()
            .add_request(req("r1"))
            .unwrap()
            .start_group("child")
            .unwrap()
            .add_request(req("r2"))
            .unwrap();

        assert_eq!(tree.groups().len(), 1);
        let parent = &tree.groups()[0];
        assert_eq!(parent.id(), "parent");
        assert_eq!(parent.requests().len(), 1);
        assert_eq!(parent.children().len(), 1);
        assert_eq!(parent.children()[0].id(), "child");
        assert_eq!(parent.children()[0].requests()[0].name(), "r2");
        assert_eq!(tree.current_group(), Some("child"));
    }

    #[test]
    fn test_duplicate_id_deep_in_tree_leaves_tree_unchanged() {
        let mut tree = RequestTree::new();
        tree.start_group("a")
            .unwrap()
            .start_group("b")
            .unwrap()
            .start_group("c")
            .unwrap();
        tree.from_the_beginning();

        let err = tree.start_group("c").unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(tree.request_groups_count(), 3);
        assert_eq!(tree.groups().len(), 1);
        assert_eq!(tree.current_group(), None);
    }

    #[test]
    fn test_add_request_before_start_group_fails() {
        let mut tree = RequestTree::new();
        let err = tree.add_request(req("r1")).unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
        assert!(tree.groups().is_empty());
    }

    #[test]
    fn test_after_group_moves_cursor() {
        let mut tree = RequestTree::new();
        tree.start_group("a").unwrap().start_group("a1").unwrap();
        tree.after_group("a").unwrap().start_group("a2").unwrap();
        tree.after_group("a1").unwrap().add_request(req("deep")).unwrap();

        let a = tree.find("a").unwrap();
        let children: Vec<&str> = a.children().iter().map(|c| c.id()).collect();
        assert_eq!(children, vec!["a1", "a2"]);
        assert_eq!(tree.find("a1").unwrap().requests()[0].name(), "deep");
    }

    #[test]
    fn test_after_unknown_group_fails_fast() {
        let mut tree = RequestTree::new();
        tree.start_group("a").unwrap();
        let err = tree.after_group("missing").unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
        assert_eq!(tree.current_group(), Some("a"));
    }

    #[test]
    fn test_from_the_beginning_adds_root_siblings() {
        let mut tree = RequestTree::new();
        tree.start_group("g1").unwrap();
        tree.from_the_beginning().start_group("g2").unwrap();

        let roots: Vec<&str> = tree.groups().iter().map(|g| g.id()).collect();
        assert_eq!(roots, vec!["g1", "g2"]);
    }

    #[test]
    fn test_find_is_preorder() {
        let mut tree = RequestTree::new();
        tree.start_group("root1").unwrap().start_group("leaf").unwrap();
        tree.from_the_beginning().start_group("root2").unwrap();

        let mut path = Vec::new();
        assert!(find_path(tree.groups(), "leaf", &mut path));
        assert_eq!(path, vec![0, 0]);

        path.clear();
        assert!(find_path(tree.groups(), "root2", &mut path));
        assert_eq!(path, vec![1]);
        assert!(tree.find("nope").is_none());
    }

    #[test]
    fn test_building_after_clone_does_not_touch_clone() {
        let mut tree = RequestTree::new();
        tree.start_group("a").unwrap();
        let snapshot = tree.clone();

        tree.add_request(req("r1")).unwrap();
        assert_eq!(tree.find("a").unwrap().requests().len(), 1);
        assert!(snapshot.find("a").unwrap().requests().is_empty());
    }

    #[test]
    fn test_timing_stamps() {
        let group = RequestGroup::new("g".to_string());
        assert!(group.start_time().is_none());
        group.timing().mark_start();
        assert!(group.start_time().is_some());
        assert!(group.end_time().is_none());
        group.timing().mark_end();
        assert!(group.end_time().unwrap() >= group.start_time().unwrap());
    }
}
