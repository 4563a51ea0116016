//! Synchronous fetch lifecycle events.
//!
//! # Responsibilities
//! - Let extensions observe every outgoing fetch
//! - Allow rewriting the request before it is sent
//! - Allow supplying or replacing the response, or aborting the fetch
//!
//! # Design Decisions
//! - Listeners run synchronously, in subscription order
//! - A listener returning `false` stops propagation to later listeners
//! - Listener lists are swapped atomically; firing never blocks subscribers

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::fetch::types::{FetchContext, FetchRequest, FetchResponse};

/// Points in the fetch lifecycle listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Before the request is sent. `response` is `None`.
    FetchPre,
    /// After a response exists, including when a pre listener exited.
    FetchPost,
}

/// Mutable record shared by all listeners of one fetch.
#[derive(Debug)]
pub struct FetchEvent {
    pub proxy: bool,
    pub request: FetchRequest,
    pub context: FetchContext,
    pub response: Option<FetchResponse>,
    /// Set by a listener to skip the network call.
    pub exit: bool,
}

impl FetchEvent {
    pub fn new(request: FetchRequest, context: FetchContext) -> Self {
        Self {
            proxy: context.proxy,
            request,
            context,
            response: None,
            exit: false,
        }
    }
}

/// An extension hook. Return `true` to let later listeners run.
pub trait FetchListener: Send + Sync {
    fn on_event(&self, kind: EventKind, event: &mut FetchEvent) -> bool;
}

impl<F> FetchListener for F
where
    F: Fn(EventKind, &mut FetchEvent) -> bool + Send + Sync,
{
    fn on_event(&self, kind: EventKind, event: &mut FetchEvent) -> bool {
        self(kind, event)
    }
}

type Listeners = Vec<Arc<dyn FetchListener>>;

/// Publishes fetch events to subscribed listeners.
#[derive(Default)]
pub struct EventBus {
    pre: ArcSwap<Listeners>,
    post: ArcSwap<Listeners>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: EventKind) -> &ArcSwap<Listeners> {
        match kind {
            EventKind::FetchPre => &self.pre,
            EventKind::FetchPost => &self.post,
        }
    }

    /// Register a listener for one event kind.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn FetchListener>) {
        self.slot(kind).rcu(|current| {
            let mut next = Listeners::clone(current);
            next.push(listener.clone());
            next
        });
        tracing::debug!(event = ?kind, "Fetch listener registered");
    }

    /// Deliver an event to every listener until one stops propagation.
    pub fn fire(&self, kind: EventKind, event: &mut FetchEvent) {
        let listeners = self.slot(kind).load_full();
        for listener in listeners.iter() {
            if !listener.on_event(kind, event) {
                tracing::trace!(event = ?kind, url = %event.request.url, "Event propagation stopped");
                break;
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.slot(kind).load().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pre", &self.listener_count(EventKind::FetchPre))
            .field("post", &self.listener_count(EventKind::FetchPost))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn event() -> FetchEvent {
        let request = FetchRequest::get(Url::parse("http://backend.local/a").unwrap());
        FetchEvent::new(request, FetchContext::fragment(None))
    }

    #[test]
    fn test_listeners_run_in_order() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::FetchPre, Arc::new(|_: EventKind, e: &mut FetchEvent| {
            e.request.url.set_path("/first");
            true
        }));
        bus.subscribe(EventKind::FetchPre, Arc::new(|_: EventKind, e: &mut FetchEvent| {
            let path = format!("{}/second", e.request.url.path());
            e.request.url.set_path(&path);
            true
        }));

        let mut e = event();
        bus.fire(EventKind::FetchPre, &mut e);
        assert_eq!(e.request.url.path(), "/first/second");
    }

    #[test]
    fn test_stop_propagation() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.subscribe(EventKind::FetchPost, Arc::new(|_: EventKind, e: &mut FetchEvent| {
            e.response = Some(FetchResponse::new(StatusCode::OK, "replaced"));
            false
        }));
        bus.subscribe(EventKind::FetchPost, Arc::new(move |_: EventKind, _: &mut FetchEvent| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));

        let mut e = event();
        bus.fire(EventKind::FetchPost, &mut e);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(e.response.unwrap().body_text(), "replaced");
    }

    #[test]
    fn test_kinds_are_separate() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::FetchPre, Arc::new(|_: EventKind, e: &mut FetchEvent| {
            e.exit = true;
            true
        }));
        assert_eq!(bus.listener_count(EventKind::FetchPre), 1);
        assert_eq!(bus.listener_count(EventKind::FetchPost), 0);

        let mut e = event();
        bus.fire(EventKind::FetchPost, &mut e);
        assert!(!e.exit);
    }
}
