//! Request/reply correlation.
//!
//! Every outstanding request is a [`PendingRequest`] keyed by its id. The
//! caller holds the receiving end of a oneshot channel; delivering a reply
//! completes exactly that caller, whatever order replies arrive in.

use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use sftpmount_proto::Response;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// The receiving half handed to a suspended caller.
pub type ReplyReceiver = oneshot::Receiver<ClientResult<Response>>;

/// One request awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest {
    /// Request name, for logs.
    pub kind: &'static str,
    pub sent_at: Instant,
    reply: oneshot::Sender<ClientResult<Response>>,
}

/// Table of outstanding requests for one connection.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<u32, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id not currently outstanding and registers a waiter for it.
    pub fn register(&mut self, session: &Session, kind: &'static str) -> (u32, ReplyReceiver) {
        let mut id = session.next_request_id();
        while self.pending.contains_key(&id) {
            id = session.next_request_id();
        }
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                kind,
                sent_at: Instant::now(),
                reply,
            },
        );
        (id, rx)
    }

    /// Completes the request with `id`.
    ///
    /// Returns `false` if nothing was waiting for it (a stale or duplicate
    /// reply); the caller logs and discards it.
    pub fn deliver(&mut self, id: u32, result: ClientResult<Response>) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                tracing::trace!(
                    id,
                    kind = pending.kind,
                    elapsed = ?pending.sent_at.elapsed(),
                    "Delivering reply"
                );
                // The caller may have given up (timeout, dropped future).
                let _ = pending.reply.send(result);
                true
            }
            None => false,
        }
    }

    /// Forgets a request without completing it.
    pub fn remove(&mut self, id: u32) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Completes every outstanding request with an error built by `make_err`.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&mut self, make_err: impl Fn() -> ClientError) -> usize {
        let count = self.pending.len();
        for (id, pending) in self.pending.drain() {
            tracing::trace!(id, kind = pending.kind, "Failing outstanding request");
            let _ = pending.reply.send(Err(make_err()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_out_of_order_delivery_reaches_right_waiter() {
        let session = Session::new();
        let mut correlator = Correlator::new();
        let waiters: Vec<(u32, ReplyReceiver)> =
            (0..5).map(|_| correlator.register(&session, "read")).collect();

        for (id, _) in waiters.iter().rev() {
            let payload = Bytes::from(id.to_be_bytes().to_vec());
            assert!(correlator.deliver(*id, Ok(Response::Data(payload))));
        }
        assert!(correlator.is_empty());

        for (id, rx) in waiters {
            match rx.await.unwrap().unwrap() {
                Response::Data(data) => assert_eq!(&data[..], &id.to_be_bytes()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_id_is_not_delivered() {
        let mut correlator = Correlator::new();
        assert!(!correlator.deliver(42, Ok(Response::Data(Bytes::new()))));
    }

    #[test]
    fn test_register_skips_outstanding_ids() {
        let mut correlator = Correlator::new();
        let first = Session::new();
        let held: Vec<_> = (0..3).map(|_| correlator.register(&first, "stat")).collect();
        assert_eq!(held.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);

        // A counter that starts over must step past ids still in flight.
        let restarted = Session::new();
        let (id, _rx) = correlator.register(&restarted, "stat");
        assert_eq!(id, 3);
        assert_eq!(correlator.len(), 4);
    }

    #[tokio::test]
    async fn test_fail_all_completes_every_waiter() {
        let session = Session::new();
        let mut correlator = Correlator::new();
        let receivers: Vec<_> = (0..3)
            .map(|_| correlator.register(&session, "lstat").1)
            .collect();
        let failed = correlator
            .fail_all(|| ClientError::Transport(TransportError::ConnectionLost));
        assert_eq!(failed, 3);
        for rx in receivers {
            assert!(rx.await.unwrap().unwrap_err().is_connection_lost());
        }
    }
}
