//! Execution director
//!
//! Owns the built tree and drives runs over it. A run launches every root
//! group at once; when a group finishes, its children are launched. The
//! completion callback fires once the last leaf finishes; `abort` stops the
//! descent and reports through the `Abort` event once in-flight work drains.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use tokio::{runtime::Handle, sync::watch};
use uuid::Uuid;

use crate::{
    core::{
        context::ExecutionContext,
        error::FlowResult,
        record::{RequestRecord, ResponseRecord},
        traits::RunLogger,
    },
    config_error, internal_error,
    logging::LogFacade,
    request::Request,
    transport::TransportConfig,
    tree::{RequestGroup, RequestTree},
};

use super::{
    event::{Event, EventBus, EventKind},
    group_runner::GroupRunner,
    RunObserver,
};

/// Director construction options.
#[derive(Clone)]
pub struct DirectorOptions {
    /// Log per-request timings through the logger
    pub debug: bool,
    pub logger: Arc<dyn RunLogger>,
    pub transport: TransportConfig,
}

impl DirectorOptions {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            debug: false,
            logger: Arc::new(LogFacade),
            transport,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = logger;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted,
}

/// Result of an awaited run.
pub struct FinishedRun {
    pub outcome: RunOutcome,
    pub context: Arc<ExecutionContext>,
}

type CompletionCallback = Box<dyn FnOnce(&ExecutionContext) + Send>;

struct RunState {
    id: Uuid,
    context: Arc<ExecutionContext>,
    total_groups: usize,
    completed_groups: AtomicUsize,
    /// Group runners launched and not yet finished
    in_flight: AtomicUsize,
    abort_requested: AtomicBool,
    abort_emitted: AtomicBool,
    on_complete: Mutex<Option<CompletionCallback>>,
    outcome: watch::Sender<Option<RunOutcome>>,
}

impl RunState {
    fn new(total_groups: usize, on_complete: CompletionCallback) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            context: Arc::new(ExecutionContext::new()),
            total_groups,
            completed_groups: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            abort_requested: AtomicBool::new(false),
            abort_emitted: AtomicBool::new(false),
            on_complete: Mutex::new(Some(on_complete)),
            outcome,
        }
    }

    fn take_on_complete(&self) -> Option<CompletionCallback> {
        match self.on_complete.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

struct DirectorInner {
    groups: Vec<Arc<RequestGroup>>,
    total_groups: usize,
    options: DirectorOptions,
    events: EventBus,
    current: ArcSwapOption<RunState>,
}

/// Top-level orchestrator over a built request tree.
pub struct Director {
    inner: Arc<DirectorInner>,
}

impl Director {
    pub fn new(tree: RequestTree, options: DirectorOptions) -> Self {
        let total_groups = tree.request_groups_count();
        let groups = tree.groups().to_vec();
        Self {
            inner: Arc::new(DirectorInner {
                groups,
                total_groups,
                options,
                events: EventBus::new(),
                current: ArcSwapOption::empty(),
            }),
        }
    }

    /// Subscribe to one of the run events.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> &Self
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler);
        self
    }

    pub fn groups(&self) -> &[Arc<RequestGroup>] {
        &self.inner.groups
    }

    pub fn request_groups_count(&self) -> usize {
        self.inner.total_groups
    }

    /// Context of the latest run, if any.
    pub fn current_context(&self) -> Option<Arc<ExecutionContext>> {
        self.inner
            .current
            .load_full()
            .map(|run| run.context.clone())
    }

    /// Start a run and return its live context right away.
    ///
    /// `on_complete` fires exactly once, after every group of the tree has
    /// finished, unless the run is aborted. Must be called from within a
    /// tokio runtime.
    pub fn start<F>(&self, on_complete: F) -> FlowResult<Arc<ExecutionContext>>
    where
        F: FnOnce(&ExecutionContext) + Send + 'static,
    {
        let run = self.start_run(Box::new(on_complete))?;
        Ok(run.context.clone())
    }

    /// Start a run and wait until it completes or is aborted.
    pub async fn run(&self) -> FlowResult<FinishedRun> {
        let run = self.start_run(Box::new(|_| {}))?;
        let mut outcome = run.outcome.subscribe();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|e| internal_error!("run {} lost its outcome: {}", run.id, e))?
            .unwrap_or(RunOutcome::Completed);

        Ok(FinishedRun {
            outcome: finished,
            context: run.context.clone(),
        })
    }

    /// Stop descending into child groups. Requests already in flight finish
    /// normally; the `Abort` event fires once they have drained.
    pub fn abort(&self) {
        match self.inner.current.load_full() {
            Some(run) => {
                if !run.abort_requested.swap(true, Ordering::SeqCst) {
                    self.inner
                        .options
                        .logger
                        .warn(&format!("Abort requested for run {}", run.id));
                }
            }
            None => log::debug!("Abort requested but no run was started"),
        }
    }

    fn start_run(&self, on_complete: CompletionCallback) -> FlowResult<Arc<RunState>> {
        Handle::try_current()
            .map_err(|e| config_error!("a run must be started inside a tokio runtime: {}", e))?;

        let run = Arc::new(RunState::new(self.inner.total_groups, on_complete));
        self.inner.current.store(Some(run.clone()));
        self.inner.options.logger.info(&format!(
            "Run {} started with {} request groups",
            run.id, run.total_groups
        ));

        let scope = RunScope {
            director: self.inner.clone(),
            run: run.clone(),
        };

        if self.inner.groups.is_empty() {
            scope.complete();
            return Ok(run);
        }

        run.in_flight
            .fetch_add(self.inner.groups.len(), Ordering::SeqCst);
        for group in &self.inner.groups {
            scope.launch(group.clone());
        }
        Ok(run)
    }
}

/// Director bookkeeping for one run; handed to every runner of that run.
#[derive(Clone)]
struct RunScope {
    director: Arc<DirectorInner>,
    run: Arc<RunState>,
}

impl RunScope {
    fn context(&self) -> &ExecutionContext {
        &self.run.context
    }

    fn logger(&self) -> &dyn RunLogger {
        self.director.options.logger.as_ref()
    }

    /// Spawn a group runner. The caller has already counted it in `in_flight`.
    fn launch(&self, group: Arc<RequestGroup>) {
        let mut runner = GroupRunner::new(
            group,
            self.run.context.clone(),
            self.director.options.transport.clone(),
            Arc::new(self.clone()),
        );
        tokio::spawn(async move { runner.run().await });
    }

    fn complete(&self) {
        if let Some(on_complete) = self.run.take_on_complete() {
            self.logger().info(&format!(
                "Run {} completed: {} of {} request groups finished",
                self.run.id,
                self.run.completed_groups.load(Ordering::SeqCst),
                self.run.total_groups
            ));
            on_complete(self.context());
            self.run.outcome.send_replace(Some(RunOutcome::Completed));
        }
    }

    fn emit_abort(&self) {
        if self.run.abort_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.logger().warn(&format!(
            "Run {} aborted after {} of {} request groups",
            self.run.id,
            self.run.completed_groups.load(Ordering::SeqCst),
            self.run.total_groups
        ));
        self.director.events.emit(&Event::Abort {
            context: self.context(),
        });
        self.run.outcome.send_replace(Some(RunOutcome::Aborted));
    }
}

impl RunObserver for RunScope {
    fn group_started(&self, group: &Arc<RequestGroup>) {
        group.timing().mark_start();
        self.context().register_active_group(group.clone());
        if self.director.options.debug {
            self.logger()
                .debug(&format!("Run {}: group {} started", self.run.id, group.id()));
        }
        self.director.events.emit(&Event::GroupStart {
            group,
            context: self.context(),
        });
    }

    fn group_finished(&self, group: &Arc<RequestGroup>) {
        group.timing().mark_end();
        self.context().unregister_active_group(group.id());

        let aborting = self.run.abort_requested.load(Ordering::SeqCst);
        if aborting {
            log::debug!(
                "Run {}: group {} finished during abort, {} children skipped",
                self.run.id,
                group.id(),
                group.children().len()
            );
        } else {
            self.director.events.emit(&Event::GroupEnd {
                group,
                context: self.context(),
            });
            // children join `in_flight` before this group leaves it
            self.run
                .in_flight
                .fetch_add(group.children().len(), Ordering::SeqCst);
            for child in group.children() {
                self.launch(child.clone());
            }
        }

        self.run.completed_groups.fetch_add(1, Ordering::SeqCst);
        let remaining = self.run.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            return;
        }

        // last group of the run to settle; an abort wins even if every
        // group got to finish
        if self.run.abort_requested.load(Ordering::SeqCst)
            || self.run.completed_groups.load(Ordering::SeqCst) != self.run.total_groups
        {
            self.emit_abort();
        } else {
            self.complete();
        }
    }

    fn request_started(&self, group_id: &str, request: &Request, record: RequestRecord) {
        let ctx = self.context();
        ctx.register_active_request(group_id, request.clone());
        ctx.set_request_data(group_id, request.name(), record);
        self.director.events.emit(&Event::RequestStart {
            group_id,
            request,
            context: ctx,
        });
    }

    fn request_finished(
        &self,
        group_id: &str,
        request: &Request,
        record: ResponseRecord,
        elapsed: Duration,
    ) {
        let ctx = self.context();
        let canceled = record.is_canceled;
        ctx.unregister_active_request(group_id, request.name());
        ctx.set_response_data(group_id, request.name(), record);
        self.director.events.emit(&Event::RequestEnd {
            group_id,
            request,
            context: ctx,
        });

        if self.director.options.debug {
            let verb = if canceled { "canceled" } else { "finished" };
            self.logger().debug(&format!(
                "Run {}: request {}/{} {} in {:?}",
                self.run.id,
                group_id,
                request.name(),
                verb,
                elapsed
            ));
        }
    }
}
