//! Run orchestration
//!
//! The director walks the group tree; a group runner fans out over one
//! group's requests; a request runner drives one request to completion.
//! Runners report back through `RunObserver`, which the director implements
//! for every run it starts.

pub mod director;
pub mod event;
pub mod group_runner;
pub mod request_runner;


use std::{sync::Arc, time::Duration};

use crate::{
    core::record::{RequestRecord, ResponseRecord},
    request::Request,
    tree::RequestGroup,
};

pub use director::{Director, DirectorOptions, FinishedRun, RunOutcome};
pub use event::{Event, EventBus, EventHandler, EventKind};
pub use group_runner::{GroupRunner, GroupState};
pub use request_runner::{RequestRunner, RequestState};

/// Receives lifecycle notifications from group and request runners.
pub trait RunObserver: Send + Sync {
    fn group_started(&self, group: &Arc<RequestGroup>);

    /// Called once every request of the group has settled.
    fn group_finished(&self, group: &Arc<RequestGroup>);

    /// Called at dispatch time; canceled requests never get here.
    fn request_started(&self, group_id: &str, request: &Request, record: RequestRecord);

    fn request_finished(
        &self,
        group_id: &str,
        request: &Request,
        record: ResponseRecord,
        elapsed: Duration,
    );
}
