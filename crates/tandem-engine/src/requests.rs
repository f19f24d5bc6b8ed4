//! One-shot requests executed on the consumer thread.
//!
//! Producer-side code sometimes needs something only the consumer state
//! can answer (a resource handle, a measured layout). A request is a
//! closure shipped over a bounded channel, run once against the consumer
//! state during the next frame, with the result returned on a oneshot
//! reply channel.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::handoff::Rendezvous;

/// A queued request as seen by the consumer.
pub(crate) type Request<S> = Box<dyn FnOnce(&mut S) + Send>;

// ── RequestError ──────────────────────────────────────────────────

/// Errors on the consumer request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The pipeline has shut down.
    ShutDown,
    /// The request channel is full (back-pressure).
    ChannelFull,
    /// The request was dropped without being served.
    Disconnected,
    /// The request panicked while running on the consumer.
    Failed {
        /// The panic payload, if it was a string.
        reason: String,
    },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "pipeline has shut down"),
            Self::ChannelFull => write!(f, "request channel full"),
            Self::Disconnected => write!(f, "request dropped unserved"),
            Self::Failed { reason } => write!(f, "request failed: {reason}"),
        }
    }
}

impl Error for RequestError {}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── RequestClient ─────────────────────────────────────────────────

/// Cloneable handle for submitting requests to the consumer.
pub struct RequestClient<S> {
    tx: Sender<Request<S>>,
    rendezvous: Arc<Rendezvous>,
}

impl<S> Clone for RequestClient<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rendezvous: Arc::clone(&self.rendezvous),
        }
    }
}

impl<S: 'static> RequestClient<S> {
    pub(crate) fn new(tx: Sender<Request<S>>, rendezvous: Arc<Rendezvous>) -> Self {
        Self { tx, rendezvous }
    }

    /// Queue `f` to run on the consumer during its next frame.
    ///
    /// Non-blocking. A panic inside `f` is contained and reported as
    /// [`RequestError::Failed`].
    pub fn submit<R, F>(&self, f: F) -> Result<Pending<R>, RequestError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.rendezvous.is_shutdown() {
            return Err(RequestError::ShutDown);
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let request: Request<S> = Box::new(move |state: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(state))).map_err(|payload| {
                RequestError::Failed {
                    reason: panic_message(payload.as_ref()),
                }
            });
            // The submitter may have given up on the reply.
            let _ = reply_tx.send(outcome);
        });
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => RequestError::ChannelFull,
            TrySendError::Disconnected(_) => RequestError::ShutDown,
        })?;
        Ok(Pending { rx: reply_rx })
    }

    /// Submit and block for the reply.
    pub fn call<R, F>(&self, f: F) -> Result<R, RequestError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(f)?.wait()
    }
}

// ── Pending ───────────────────────────────────────────────────────

/// A submitted request's eventual result.
#[derive(Debug)]
pub struct Pending<R> {
    rx: Receiver<Result<R, RequestError>>,
}

impl<R> Pending<R> {
    /// Block until the consumer has served the request.
    pub fn wait(self) -> Result<R, RequestError> {
        self.rx.recv().unwrap_or(Err(RequestError::Disconnected))
    }

    /// The result if the request has been served, without blocking.
    pub fn try_take(&self) -> Option<Result<R, RequestError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RequestError::Disconnected)),
        }
    }
}

/// Run every request queued when the call starts, in submission order.
/// Returns how many ran.
pub(crate) fn serve<S>(rx: &Receiver<Request<S>>, state: &mut S) -> u64 {
    let queued = rx.len();
    let mut served = 0;
    for _ in 0..queued {
        match rx.try_recv() {
            Ok(request) => {
                request(state);
                served += 1;
            }
            Err(_) => break,
        }
    }
    served
}
