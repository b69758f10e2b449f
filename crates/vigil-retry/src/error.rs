//! Error returned by [`crate::RetryPolicy::execute_with_retry`].

use thiserror::Error;
use vigil_core::ErrorKind;

/// Why a retried operation ultimately failed. Always carries the last
/// error produced by the operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The strategy's retry budget was used up.
    #[error("{kind} failure after {attempts} attempt(s): {error}")]
    Exhausted {
        kind: ErrorKind,
        attempts: u32,
        error: E,
    },

    /// `should_retry` declined to retry this error.
    #[error("{kind} failure not retried after {attempts} attempt(s): {error}")]
    Rejected {
        kind: ErrorKind,
        attempts: u32,
        error: E,
    },

    /// The caller cancelled while waiting to retry.
    #[error("retry cancelled after {attempts} attempt(s): {error}")]
    Cancelled { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// The last error returned by the operation.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { error, .. }
            | RetryError::Rejected { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { error, .. }
            | RetryError::Rejected { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }

    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Rejected { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}
