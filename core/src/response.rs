//! The response slot of a request environment.
//!
//! A [`ResponseHandle`] is cloned into the completion callback, so the engine
//! can fill it in long after `call` returned in batch mode. Consumers either
//! block on [`wait`](ResponseHandle::wait) or register
//! [`on_complete`](ResponseHandle::on_complete) callbacks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::AdapterError;
use crate::http::ResponseEnvelope;

type FinishCallback = Box<dyn FnOnce(&ResponseHandle) + Send + 'static>;

#[derive(Default)]
struct State {
    envelope: Option<ResponseEnvelope>,
    error: Option<Arc<AdapterError>>,
    finished: bool,
    callbacks: Vec<FinishCallback>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    finished: Condvar,
}

/// Shared, write-once response slot.
#[derive(Clone, Default)]
pub struct ResponseHandle {
    inner: Arc<Inner>,
}

impl ResponseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the envelope. Returns `false` and leaves the slot untouched when
    /// an envelope was already saved.
    pub fn save(&self, envelope: ResponseEnvelope) -> bool {
        let mut state = self.inner.state.lock();
        if state.envelope.is_some() {
            tracing::warn!(status = envelope.status, "response already saved; ignoring");
            return false;
        }
        state.envelope = Some(envelope);
        true
    }

    /// Record a failure for consumers of a batch-mode request.
    pub fn fail(&self, error: AdapterError) {
        let mut state = self.inner.state.lock();
        if state.error.is_some() {
            tracing::warn!(%error, "response already failed; ignoring");
            return;
        }
        state.error = Some(Arc::new(error));
    }

    /// Mark the response complete, wake waiters and run `on_complete`
    /// callbacks. Finishing twice is a no-op.
    pub fn finish(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.finished {
                tracing::warn!("response already finished; ignoring");
                return;
            }
            state.finished = true;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.finished.notify_all();
        for callback in callbacks {
            callback(self);
        }
    }

    /// Run `callback` once the response is finished, or right away if it
    /// already is.
    pub fn on_complete(&self, callback: impl FnOnce(&ResponseHandle) + Send + 'static) {
        {
            let mut state = self.inner.state.lock();
            if !state.finished {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    pub fn envelope(&self) -> Option<ResponseEnvelope> {
        self.inner.state.lock().envelope.clone()
    }

    pub fn status(&self) -> Option<u16> {
        self.inner.state.lock().envelope.as_ref().map(|e| e.status)
    }

    pub fn error(&self) -> Option<Arc<AdapterError>> {
        self.inner.state.lock().error.clone()
    }

    /// Block until the response is finished.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.finished {
            self.inner.finished.wait(&mut state);
        }
    }

    /// Block until the response is finished or `timeout` elapses. Returns
    /// whether the response finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if !state.finished {
            let _ = self.inner.finished.wait_for(&mut state, timeout);
        }
        state.finished
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ResponseHandle")
            .field("envelope", &state.envelope)
            .field("error", &state.error)
            .field("finished", &state.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::http::Headers;

    fn envelope(status: u16) -> ResponseEnvelope {
        ResponseEnvelope {
            status,
            reason_phrase: None,
            headers: Headers::new(),
            body: Bytes::new(),
            timed_out: false,
        }
    }

    #[test]
    fn envelope_is_saved_once() {
        let handle = ResponseHandle::new();
        assert!(handle.save(envelope(200)));
        assert!(!handle.save(envelope(500)));
        assert_eq!(handle.status(), Some(200));
    }

    #[test]
    fn on_complete_runs_at_finish_and_late_registrations_run_immediately() {
        let handle = ResponseHandle::new();
        let count = Arc::new(AtomicUsize::new(0));

        let early = Arc::clone(&count);
        handle.on_complete(move |h| {
            assert!(h.is_finished());
            early.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        handle.finish();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let late = Arc::clone(&count);
        handle.on_complete(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.finish();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_returns_after_finish_from_another_thread() {
        let handle = ResponseHandle::new();
        let writer = handle.clone();
        let join = thread::spawn(move || {
            writer.save(envelope(204));
            writer.finish();
        });
        handle.wait();
        join.join().unwrap();
        assert_eq!(handle.status(), Some(204));
    }

    #[test]
    fn wait_timeout_reports_unfinished() {
        let handle = ResponseHandle::new();
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
        handle.finish();
        assert!(handle.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn first_error_wins() {
        let handle = ResponseHandle::new();
        handle.fail(AdapterError::Timeout);
        handle.fail(AdapterError::Unfinished);
        assert!(matches!(handle.error().as_deref(), Some(AdapterError::Timeout)));
    }
}
