use std::time::Duration;
use tokio::sync::watch;

use crate::errors::{ClientError, Result};

/// One-shot completion cell shared between a producer and any number of waiters.
///
/// The cell moves from pending to completed exactly once; later completion
/// attempts are ignored. Waiters either await the outcome or give up after a
/// bound, in which case the cell is left untouched and can still complete.
#[derive(Debug)]
pub struct CompletionCell<T> {
    state: watch::Sender<Option<Result<T>>>,
}

impl<T: Clone> CompletionCell<T> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        CompletionCell { state }
    }

    pub fn completed(value: T) -> Self {
        let cell = Self::new();
        cell.complete(value);
        cell
    }

    /// Resolves the cell with a value. Returns false if it was already completed.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Resolves the cell with an error. Returns false if it was already completed.
    pub fn complete_with_error(&self, err: ClientError) -> bool {
        self.settle(Err(err))
    }

    pub fn cancel(&self) -> bool {
        self.settle(Err(ClientError::Cancelled))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let mut outcome = Some(outcome);
        self.state.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn is_done(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn is_completed_exceptionally(&self) -> bool {
        matches!(*self.state.borrow(), Some(Err(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.borrow(), Some(Err(ClientError::Cancelled)))
    }

    /// Outcome if already completed, without waiting.
    pub fn try_get(&self) -> Option<Result<T>> {
        self.state.borrow().clone()
    }

    /// Waits until the cell is completed.
    pub async fn get(&self) -> Result<T> {
        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::Cancelled)?;
        match &*outcome {
            Some(result) => result.clone(),
            None => Err(ClientError::Cancelled),
        }
    }

    /// Waits at most `timeout` for the cell to complete. A zero duration waits
    /// without a bound.
    pub async fn get_with_timeout(&self, timeout: Duration) -> Result<T> {
        if timeout.is_zero() {
            return self.get().await;
        }
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }
}

impl<T: Clone> Default for CompletionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
