//! `AsyncBus`: the direct-callback contract workers use to talk back to
//! the UI (spec §4.6).
//!
//! Spec wording ("workers invoke" the callbacks, "NOT on the UI thread")
//! describes a push contract, not a pull channel, so this stores three
//! `Arc<dyn Fn>` closures registered once at construction and calls them
//! synchronously from the worker's own task — unlike the teacher's
//! `ImapActorHandle::event_rx` mpsc-event idiom, which this deliberately
//! departs from for this one seam (see DESIGN.md).
//!
//! After `LogoutAndExit` the bus is latched closed: every further
//! `emit_*` call is a silent no-op (spec §8 invariant #7).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct AsyncBus<Request, Response, Action, ActionResult, Status> {
    response_handler: Arc<dyn Fn(Request, Response) + Send + Sync>,
    result_handler: Arc<dyn Fn(Action, ActionResult) + Send + Sync>,
    status_handler: Arc<dyn Fn(Status) + Send + Sync>,
    closed: AtomicBool,
}

impl<Request, Response, Action, ActionResult, Status> AsyncBus<Request, Response, Action, ActionResult, Status> {
    pub fn new(
        response_handler: impl Fn(Request, Response) + Send + Sync + 'static,
        result_handler: impl Fn(Action, ActionResult) + Send + Sync + 'static,
        status_handler: impl Fn(Status) + Send + Sync + 'static,
    ) -> Self {
        Self {
            response_handler: Arc::new(response_handler),
            result_handler: Arc::new(result_handler),
            status_handler: Arc::new(status_handler),
            closed: AtomicBool::new(false),
        }
    }

    pub fn emit_response(&self, request: Request, response: Response) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        (self.response_handler)(request, response);
    }

    pub fn emit_result(&self, action: Action, result: ActionResult) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        (self.result_handler)(action, result);
    }

    pub fn emit_status(&self, status: Status) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        (self.status_handler)(status);
    }

    /// Latches the bus closed. Called once, after `LogoutAndExit`'s
    /// `ActionResult` has been delivered.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callbacks_fire_until_shutdown() {
        let responses = Arc::new(Mutex::new(Vec::new()));
        let r = responses.clone();
        let bus: AsyncBus<i32, i32, (), (), ()> = AsyncBus::new(
            move |req, resp| r.lock().unwrap().push((req, resp)),
            |_, _| {},
            |_| {},
        );

        bus.emit_response(1, 10);
        bus.shutdown();
        bus.emit_response(2, 20);

        assert_eq!(*responses.lock().unwrap(), vec![(1, 10)]);
        assert!(bus.is_shutdown());
    }

    #[test]
    fn no_callbacks_fire_after_shutdown_including_status() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let s = statuses.clone();
        let bus: AsyncBus<(), (), (), (), i32> = AsyncBus::new(|_, _| {}, |_, _| {}, move |status| s.lock().unwrap().push(status));

        bus.shutdown();
        bus.emit_status(1);
        assert!(statuses.lock().unwrap().is_empty());
    }
}
