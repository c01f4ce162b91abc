//! Completion logging for event submissions.
//!
//! Delivery is best effort, so a failed or cancelled request is only worth a
//! warning. Successful requests are not logged and response bodies are never
//! read.

use std::error::Error as _;
use std::fmt;

use tracing::warn;

use crate::client::ClientError;
use crate::submission::{Submission, SubmissionState};

/// Register the logging observer on `submission` and hand it back unchanged.
///
/// The outcome is logged before [`Submission::wait`] returns.
pub fn log_completion(submission: Submission) -> Submission {
    submission.add_done_callback(log_outcome);
    submission
}

/// Wrap an operation so every submission it returns gets completion logging.
///
/// # Example
///
/// ```no_run
/// use analytics_forwarder::completion::logged;
/// use analytics_forwarder::submission::Submission;
///
/// # async fn run() {
/// let answer = logged(|status: reqwest::StatusCode| {
///     Submission::spawn(async move { Ok(status) })
/// });
/// answer(reqwest::StatusCode::OK).wait().await;
/// # }
/// ```
pub fn logged<A, F>(operation: F) -> impl Fn(A) -> Submission
where
    F: Fn(A) -> Submission,
{
    move |args: A| log_completion(operation(args))
}

/// Log the terminal state of a submission.
pub fn log_outcome(state: &SubmissionState) {
    match state {
        SubmissionState::Cancelled => warn!("Request was unexpectedly cancelled"),
        SubmissionState::Failed(e) => warn!(
            error_type = e.kind(),
            error = %e,
            cause = %Causes(e),
            "Failed to send an analytics event"
        ),
        SubmissionState::Delivered(_) | SubmissionState::Pending => {}
    }
}

/// Renders the `source()` chain of an error, outermost first.
struct Causes<'a>(&'a ClientError);

impl fmt::Display for Causes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut source = self.0.source();
        if source.is_none() {
            return write!(f, "none");
        }

        let mut first = true;
        while let Some(cause) = source {
            if !first {
                write!(f, " <- ")?;
            }
            write!(f, "{}", cause)?;
            first = false;
            source = cause.source();
        }
        Ok(())
    }
}
