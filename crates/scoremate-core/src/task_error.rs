//! Task execution error types
//!
//! Task handlers report failures through [`TaskError`] so the queue can tell
//! transient problems (retried with backoff) from permanent ones (failed
//! immediately, e.g. a thumbnail requested for a page the score does not have).

use std::fmt;

/// Failure of a background task, tagged with whether a retry could help.
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// The task fails without consuming its remaining retries.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The task is rescheduled according to the queue's backoff policy.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Whether an error returned by a handler was explicitly marked unrecoverable.
    ///
    /// Plain `anyhow` errors are treated as recoverable.
    pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TaskError>()
            .map(|task_err| !task_err.is_recoverable())
            .unwrap_or(false)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_out_of_range_is_unrecoverable() {
        let err = TaskError::unrecoverable(anyhow::anyhow!("page 9 exceeds page count 4"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("page 9"));
    }

    #[test]
    fn plain_anyhow_defaults_to_recoverable() {
        let err: TaskError = anyhow::anyhow!("storage timeout").into();
        assert!(err.is_recoverable());
        assert!(!TaskError::is_unrecoverable(&anyhow::anyhow!("storage timeout")));
    }

    #[test]
    fn unrecoverable_survives_anyhow_wrapping() {
        let err: anyhow::Error = TaskError::unrecoverable(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a pdf",
        ))
        .into();
        assert!(TaskError::is_unrecoverable(&err));
    }
}
