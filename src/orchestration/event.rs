//! Run lifecycle events
//!
//! Handlers are registered per event kind and called synchronously, in
//! registration order, on the task that produced the event.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{core::context::ExecutionContext, request::Request, tree::RequestGroup};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    GroupStart,
    GroupEnd,
    RequestStart,
    RequestEnd,
    Abort,
}

/// Payload handed to event handlers.
#[derive(Clone, Copy)]
pub enum Event<'a> {
    GroupStart {
        group: &'a RequestGroup,
        context: &'a ExecutionContext,
    },
    GroupEnd {
        group: &'a RequestGroup,
        context: &'a ExecutionContext,
    },
    RequestStart {
        group_id: &'a str,
        request: &'a Request,
        context: &'a ExecutionContext,
    },
    RequestEnd {
        group_id: &'a str,
        request: &'a Request,
        context: &'a ExecutionContext,
    },
    Abort {
        context: &'a ExecutionContext,
    },
}

impl<'a> Event<'a> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::GroupStart { .. } => EventKind::GroupStart,
            Event::GroupEnd { .. } => EventKind::GroupEnd,
            Event::RequestStart { .. } => EventKind::RequestStart,
            Event::RequestEnd { .. } => EventKind::RequestEnd,
            Event::Abort { .. } => EventKind::Abort,
        }
    }

    pub fn context(&self) -> &'a ExecutionContext {
        match *self {
            Event::GroupStart { context, .. }
            | Event::GroupEnd { context, .. }
            | Event::RequestStart { context, .. }
            | Event::RequestEnd { context, .. }
            | Event::Abort { context } => context,
        }
    }

    /// Group the event is about, for group and request events.
    pub fn group_id(&self) -> Option<&'a str> {
        match *self {
            Event::GroupStart { group, .. } | Event::GroupEnd { group, .. } => Some(group.id()),
            Event::RequestStart { group_id, .. } | Event::RequestEnd { group_id, .. } => {
                Some(group_id)
            }
            Event::Abort { .. } => None,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

/// Subscription registry for the five run events.
#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<EventKind, Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn emit(&self, event: &Event<'_>) {
        // clone out so handlers may subscribe without deadlocking the map
        let handlers = match self.handlers.get(&event.kind()) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |entry| entry.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_emit_reaches_matching_handlers_only() {
        let bus = EventBus::new();
        let aborts = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));

        {
            let aborts = aborts.clone();
            bus.on(EventKind::Abort, move |event| {
                assert_eq!(event.kind(), EventKind::Abort);
                assert!(event.group_id().is_none());
                aborts.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let ends = ends.clone();
            bus.on(EventKind::GroupEnd, move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            });
        }

        let ctx = ExecutionContext::new();
        bus.emit(&Event::Abort { context: &ctx });
        bus.emit(&Event::Abort { context: &ctx });

        assert_eq!(aborts.load(Ordering::SeqCst), 2);
        assert_eq!(ends.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(EventKind::Abort), 1);
        assert_eq!(bus.handler_count(EventKind::RequestStart), 0);
    }

    #[test]
    fn test_handler_may_subscribe_while_emitting() {
        let bus = Arc::new(EventBus::new());
        {
            let inner = bus.clone();
            bus.on(EventKind::Abort, move |_| {
                inner.on(EventKind::GroupStart, |_| {});
            });
        }

        let ctx = ExecutionContext::new();
        bus.emit(&Event::Abort { context: &ctx });
        assert_eq!(bus.handler_count(EventKind::GroupStart), 1);
    }
}
