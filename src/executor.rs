//! Synchronous request/reply over a pair of rendezvous channels.
//!
//! With both channels unbuffered, a request is only accepted once the executor has
//! delivered the reply to the previous one. So at most one request is ever in flight,
//! and the only client blocked on the reply channel is the one whose request is being
//! executed. That is what pairs each reply with its request; nothing else does.

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::trace;

use crate::error::{Error, Result};

/// Create a connected client and executor.
pub fn rendezvous<C, R>() -> (Client<C, R>, Executor<C, R>) {
    let (requests_tx, requests_rx) = bounded(0);
    let (replies_tx, replies_rx) = bounded(0);

    let client = Client::new(requests_tx, replies_rx);
    let executor = Executor::new(requests_rx, replies_tx);

    (client, executor)
}

/// Runs requests one at a time, in the order they are accepted.
pub struct Executor<C, R> {
    requests: Receiver<C>,
    replies: Sender<R>,
}

impl<C, R> Executor<C, R> {
    /// Panics if either channel can buffer, since then a second request could be
    /// accepted before the first reply is taken.
    pub fn new(requests: Receiver<C>, replies: Sender<R>) -> Self {
        if requests.capacity() != Some(0) {
            panic!(
                "executor request channel must be unbuffered, capacity = {:?}",
                requests.capacity(),
            );
        }

        if replies.capacity() != Some(0) {
            panic!(
                "executor reply channel must be unbuffered, capacity = {:?}",
                replies.capacity(),
            );
        }

        Self { requests, replies }
    }

    /// Execute requests until every client is gone.
    ///
    /// Must be called on the thread that owns whatever `execute` touches. A panic in
    /// `execute` unwinds through here and drops both channels, which disconnects all
    /// clients.
    pub fn run<F>(self, mut execute: F)
    where
        F: FnMut(C) -> R,
    {
        for request in self.requests.iter() {
            let reply = execute(request);

            if self.replies.send(reply).is_err() {
                trace!("client hung up before reply");
                break;
            }
        }
    }
}

/// Submits requests to an [`Executor`] and blocks for the matching reply.
///
/// Shareable between threads; calls from many threads are serviced first-come, first-served.
pub struct Client<C, R> {
    requests: Sender<C>,
    replies: Receiver<R>,
}

impl<C, R> Client<C, R> {
    pub fn new(requests: Sender<C>, replies: Receiver<R>) -> Self {
        Self { requests, replies }
    }

    /// Send `request` and block until it has been executed.
    pub fn call(&self, request: C) -> Result<R> {
        self.requests.send(request).map_err(|_| Error::Terminated)?;
        self.replies.recv().map_err(|_| Error::Terminated)
    }
}

impl<C, R> Clone for Client<C, R> {
    fn clone(&self) -> Self {
        Self::new(self.requests.clone(), self.replies.clone())
    }
}
