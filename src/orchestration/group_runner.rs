//! Runs every request of one group concurrently.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;

use crate::{
    core::{context::ExecutionContext, record::ResponseRecord},
    transport::TransportConfig,
    tree::RequestGroup,
};

use super::{request_runner::RequestRunner, RunObserver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    Running,
    Done,
}

pub struct GroupRunner {
    group: Arc<RequestGroup>,
    context: Arc<ExecutionContext>,
    transport: TransportConfig,
    observer: Arc<dyn RunObserver>,
    state: GroupState,
}

impl GroupRunner {
    pub fn new(
        group: Arc<RequestGroup>,
        context: Arc<ExecutionContext>,
        transport: TransportConfig,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            group,
            context,
            transport,
            observer,
            state: GroupState::Idle,
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Fan out over the group's requests and wait for all of them to settle.
    /// A request that fails or panics does not stop its siblings.
    pub async fn run(&mut self) {
        if self.state != GroupState::Idle {
            log::warn!("Group {} already ran", self.group.id());
            return;
        }

        self.state = GroupState::Running;
        self.observer.group_started(&self.group);

        let tasks = self.group.requests().iter().map(|request| {
            let mut runner = RequestRunner::new(
                self.group.id(),
                request.clone(),
                self.context.clone(),
                self.transport.clone(),
                self.observer.clone(),
            );
            tokio::spawn(async move {
                runner.run().await;
                runner
            })
        });
        let results = join_all(tasks).await;

        let mut canceled = 0;
        for (request, result) in self.group.requests().iter().zip(results) {
            match result {
                Ok(runner) if runner.was_canceled() => canceled += 1,
                Ok(_) => {}
                Err(err) => {
                    log::error!(
                        "Request {}/{} did not finish: {}",
                        self.group.id(),
                        request.name(),
                        err
                    );
                    self.observer.request_finished(
                        self.group.id(),
                        request,
                        ResponseRecord::failed(request, err.to_string()),
                        Duration::ZERO,
                    );
                }
            }
        }

        log::debug!(
            "Group {} settled: {} requests, {} canceled",
            self.group.id(),
            self.group.requests().len(),
            canceled
        );
        self.state = GroupState::Done;
        self.observer.group_finished(&self.group);
    }
}
