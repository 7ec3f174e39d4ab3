//! Connection teardown state.
//!
//! Every side of a connection funnels its failures through one
//! [`CloseState`]: the first error recorded wins, the cancellation token wakes
//! every blocked producer and consumer, and registered callbacks run once.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

type CloseCallback = Box<dyn FnOnce(&RpcError) + Send>;

pub(crate) struct CloseState {
    error: OnceLock<Arc<RpcError>>,
    token: CancellationToken,
    callbacks: Mutex<Vec<CloseCallback>>,
}

impl CloseState {
    pub(crate) fn new() -> Self {
        Self {
            error: OnceLock::new(),
            token: CancellationToken::new(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Record `err` as the terminal error. Returns false if already closed.
    pub(crate) fn close(&self, err: RpcError) -> bool {
        if self.error.set(Arc::new(err)).is_err() {
            return false;
        }
        self.token.cancel();

        let callbacks = std::mem::take(
            &mut *self
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if let Some(err) = self.error.get() {
            for callback in callbacks {
                callback(err);
            }
        }
        true
    }

    pub(crate) fn error(&self) -> Option<Arc<RpcError>> {
        self.error.get().cloned()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.error.get().is_some()
    }

    /// The error returned to callers that touch a closed connection.
    pub(crate) fn closed_error(&self) -> RpcError {
        RpcError::Closed(
            self.error()
                .unwrap_or_else(|| Arc::new(RpcError::LocalClose)),
        )
    }

    /// Fail with [`Self::closed_error`] if the connection is already closed.
    pub(crate) fn check(&self) -> Result<(), RpcError> {
        match self.error() {
            Some(err) => Err(RpcError::Closed(err)),
            None => Ok(()),
        }
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `callback` when the connection closes, or now if it already has.
    pub(crate) fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&RpcError) + Send + 'static,
    {
        let mut callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.error.get() {
            Some(err) => {
                drop(callbacks);
                callback(err);
            }
            None => callbacks.push(Box::new(callback)),
        }
    }
}
