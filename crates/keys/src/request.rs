// Path: crates/keys/src/request.rs
//! Per-request promise machinery.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use shutter_types::KeysError;

/// The terminal result of one decryption-key request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequestResult {
    /// The block the key was requested for.
    pub block: u64,
    /// The released secret key, or the request-scoped error.
    pub outcome: Result<Vec<u8>, KeysError>,
}

/// Messages into the manager's control loop that originate from callers.
#[derive(Debug)]
pub(crate) enum Command {
    Request(KeyRequest),
    Cancel { id: u64 },
}

/// One outstanding request inside the control loop.
///
/// The promise is written at most once, ever: the single control loop owns
/// the only sender and drops the request in the same step that fills it.
#[derive(Debug)]
pub(crate) struct KeyRequest {
    pub(crate) id: u64,
    pub(crate) block: u64,
    pub(crate) requested_at: Instant,
    pub(crate) last_checked: Instant,
    promise: Option<oneshot::Sender<KeyRequestResult>>,
}

impl KeyRequest {
    pub(crate) fn new(id: u64, block: u64, promise: oneshot::Sender<KeyRequestResult>) -> Self {
        let now = Instant::now();
        Self {
            id,
            block,
            requested_at: now,
            last_checked: now,
            promise: Some(promise),
        }
    }

    /// Fills the promise. A second call is a no-op.
    pub(crate) fn fill(&mut self, outcome: Result<Vec<u8>, KeysError>) {
        if let Some(promise) = self.promise.take() {
            // the caller may have gone away; that retires the request too
            let _ = promise.send(KeyRequestResult {
                block: self.block,
                outcome,
            });
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_checked = Instant::now();
    }
}

/// Cancels one outstanding request.
///
/// Canceling retires only that request; it is idempotent and a no-op once
/// the request was fulfilled.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub(crate) id: u64,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
}

impl CancelRequest {
    /// Asks the control loop to retire the request with a canceled outcome.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel { id: self.id });
    }
}

/// The caller-side, read-once result handle of a request.
///
/// Resolves exactly once via [`KeyRequestHandle::wait`]. Dropping the handle
/// before it resolved cancels the request, so a caller that disappears
/// (e.g. a disconnected RPC client) never leaks a pending entry.
#[derive(Debug)]
pub struct KeyRequestHandle {
    block: u64,
    promise: Option<oneshot::Receiver<KeyRequestResult>>,
    cancel: CancelRequest,
}

impl KeyRequestHandle {
    pub(crate) fn new(
        block: u64,
        promise: oneshot::Receiver<KeyRequestResult>,
        cancel: CancelRequest,
    ) -> Self {
        Self {
            block,
            promise: Some(promise),
            cancel,
        }
    }

    /// The block this request is for.
    pub fn block(&self) -> u64 {
        self.block
    }

    /// A cancel handle that can outlive `wait`.
    pub fn cancel_request(&self) -> CancelRequest {
        self.cancel.clone()
    }

    /// Waits for the terminal result. If the manager went away without
    /// resolving the promise, the outcome is [`KeysError::Aborted`].
    ///
    /// The promise stays armed while waiting: dropping the in-flight future
    /// (a disconnected caller) still cancels the request.
    pub async fn wait(mut self) -> KeyRequestResult {
        let aborted = |block| KeyRequestResult {
            block,
            outcome: Err(KeysError::Aborted),
        };
        let result = match self.promise.as_mut() {
            Some(promise) => match promise.await {
                Ok(result) => result,
                Err(_) => aborted(self.block),
            },
            None => aborted(self.block),
        };
        self.promise = None;
        result
    }
}

impl Drop for KeyRequestHandle {
    fn drop(&mut self) {
        // still unresolved: retire the pending entry in the control loop
        if self.promise.is_some() {
            self.cancel.cancel();
        }
    }
}
