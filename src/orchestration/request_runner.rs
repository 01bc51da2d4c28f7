//! Lifecycle of a single request
//!
//! `Pending → InputReady → {Dispatched | Canceled} → Completed`

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    core::{
        context::ExecutionContext,
        record::{RequestRecord, ResponseRecord},
    },
    request::{HttpRequest, Input, InvocationRequest, Request},
    transport::TransportConfig,
};

use super::RunObserver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    InputReady,
    Dispatched,
    Canceled,
    Completed,
}

/// Runs one request: generate its input, dispatch or cancel, report back.
pub struct RequestRunner {
    group_id: String,
    request: Request,
    context: Arc<ExecutionContext>,
    transport: TransportConfig,
    observer: Arc<dyn RunObserver>,
    state: RequestState,
    canceled: bool,
}

impl RequestRunner {
    pub fn new(
        group_id: impl Into<String>,
        request: Request,
        context: Arc<ExecutionContext>,
        transport: TransportConfig,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            request,
            context,
            transport,
            observer,
            state: RequestState::Pending,
            canceled: false,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled
    }

    pub async fn run(&mut self) {
        let started = Instant::now();
        let request = self.request.clone();
        match &request {
            Request::Http(http) => self.run_http(&request, http, started).await,
            Request::Invocation(invocation) => {
                self.run_invocation(&request, invocation, started).await
            }
        }
    }

    async fn run_http(&mut self, request: &Request, http: &HttpRequest, started: Instant) {
        let mut outgoing = http.outgoing();
        let input = match http.input() {
            Some(generator) => generator.generate(&self.context, &mut outgoing).await,
            None => Input::Empty,
        };
        self.transition(RequestState::InputReady);

        if input.is_cancel() {
            self.cancel(request, started);
            return;
        }

        let body = input.into_body();
        let record = RequestRecord::http(request.descriptor(), body.clone(), &outgoing);
        self.transition(RequestState::Dispatched);
        self.observer.request_started(&self.group_id, request, record);

        let reply = self.transport.http.send(&outgoing, body.as_ref()).await;
        if let Some(error) = &reply.error {
            log::debug!(
                "Request {}/{} failed: {}",
                self.group_id,
                request.name(),
                error
            );
        }
        self.finish(request, ResponseRecord::from_http(reply), started.elapsed());
    }

    async fn run_invocation(
        &mut self,
        request: &Request,
        invocation: &InvocationRequest,
        started: Instant,
    ) {
        let input = match invocation.input() {
            Some(generator) => generator.generate(&self.context).await,
            None => Input::Empty,
        };
        self.transition(RequestState::InputReady);

        if input.is_cancel() {
            self.cancel(request, started);
            return;
        }

        let payload = input.into_body();
        let record =
            RequestRecord::invocation(request.descriptor(), payload.clone(), invocation.target());
        self.transition(RequestState::Dispatched);
        self.observer.request_started(&self.group_id, request, record);

        let reply = self
            .transport
            .invocation
            .invoke(invocation.target(), payload.as_ref())
            .await;
        self.finish(
            request,
            ResponseRecord::from_invocation(reply),
            started.elapsed(),
        );
    }

    fn cancel(&mut self, request: &Request, started: Instant) {
        self.canceled = true;
        self.transition(RequestState::Canceled);
        self.finish(request, ResponseRecord::canceled(), started.elapsed());
    }

    fn finish(&mut self, request: &Request, record: ResponseRecord, elapsed: Duration) {
        self.transition(RequestState::Completed);
        self.observer
            .request_finished(&self.group_id, request, record, elapsed);
    }

    fn transition(&mut self, next: RequestState) {
        log::trace!(
            "Request {}/{}: {:?} -> {:?}",
            self.group_id,
            self.request.name(),
            self.state,
            next
        );
        self.state = next;
    }
}
