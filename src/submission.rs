//! Handles for in-flight event submissions.
//!
//! Every request runs in its own Tokio task. A [`Submission`] lets callers
//! look at that task without owning it: check whether it is still pending,
//! cancel it, wait for it, or register callbacks that run when it finishes.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::warn;

use crate::client::ClientError;

/// Observable state of a submission.
#[derive(Debug, Clone)]
pub enum SubmissionState {
    /// The request has not finished yet
    Pending,

    /// The collector answered. The status is recorded but not judged:
    /// non-2xx answers still count as delivered.
    Delivered(StatusCode),

    /// The request failed before an answer arrived
    Failed(Arc<ClientError>),

    /// The request was aborted before it finished
    Cancelled,
}

impl SubmissionState {
    /// Whether the submission has stopped changing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionState::Pending)
    }
}

type DoneCallback = Box<dyn FnOnce(&SubmissionState) + Send + 'static>;

/// Callbacks waiting for the request, or the outcome once it is known.
enum Callbacks {
    Waiting(Vec<DoneCallback>),
    Finished(SubmissionState),
}

/// Handle to one in-flight request.
///
/// Cloning is cheap and every clone observes the same request.
#[derive(Clone)]
pub struct Submission {
    state: watch::Receiver<SubmissionState>,
    abort: Arc<AbortHandle>,
    callbacks: Arc<Mutex<Callbacks>>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Submission {
    /// Spawn `request` on the current Tokio runtime and return its handle.
    ///
    /// A second task waits on the request task and publishes how it ended,
    /// so aborts and panics are reported as `Cancelled` and `Failed`. That
    /// task runs the registered callbacks before it publishes, so anything a
    /// callback does has happened by the time [`wait`](Self::wait) returns.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<F>(request: F) -> Self
    where
        F: Future<Output = Result<StatusCode, ClientError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(SubmissionState::Pending);
        let task = tokio::spawn(request);
        let abort = task.abort_handle();
        let callbacks = Arc::new(Mutex::new(Callbacks::Waiting(Vec::new())));

        let supervised = callbacks.clone();
        tokio::spawn(async move {
            let state = match task.await {
                Ok(Ok(status)) => SubmissionState::Delivered(status),
                Ok(Err(e)) => SubmissionState::Failed(Arc::new(e)),
                Err(e) if e.is_cancelled() => SubmissionState::Cancelled,
                Err(_) => SubmissionState::Failed(Arc::new(ClientError::Panicked)),
            };

            let waiting = match std::mem::replace(
                &mut *lock(&supervised),
                Callbacks::Finished(state.clone()),
            ) {
                Callbacks::Waiting(waiting) => waiting,
                Callbacks::Finished(_) => Vec::new(),
            };
            for callback in waiting {
                run_callback(callback, &state);
            }

            tx.send_replace(state);
        });

        Self {
            state: rx,
            abort: Arc::new(abort),
            callbacks,
        }
    }

    /// Current state, without waiting.
    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    /// Whether the request has finished, in any way.
    pub fn is_done(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Whether the request was aborted before it finished.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.borrow(), SubmissionState::Cancelled)
    }

    /// Abort the request. Has no effect once the request has finished.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Wait until the submission reaches a terminal state.
    pub async fn wait(&self) -> SubmissionState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(SubmissionState::is_terminal).await {
            Ok(state) => (*state).clone(),
            // Only happens if the runtime shut down before the request ended
            Err(_) => self.state(),
        };
        state
    }

    /// Run `callback` once the submission finishes.
    ///
    /// Callbacks registered while the request is pending run on the task that
    /// observes its outcome, in registration order, before `wait` returns.
    /// Registering after completion runs the callback right away on the
    /// calling thread. A panicking callback is logged and does not stop the
    /// others.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&SubmissionState) + Send + 'static,
    {
        let mut callbacks = lock(&self.callbacks);
        let state = match &mut *callbacks {
            Callbacks::Waiting(waiting) => {
                waiting.push(Box::new(callback));
                return;
            }
            Callbacks::Finished(state) => state.clone(),
        };
        drop(callbacks);
        run_callback(Box::new(callback), &state);
    }
}

fn lock(callbacks: &Mutex<Callbacks>) -> MutexGuard<'_, Callbacks> {
    callbacks.lock().unwrap_or_else(|e| e.into_inner())
}

fn run_callback(callback: DoneCallback, state: &SubmissionState) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
        warn!("Submission done callback panicked");
    }
}
