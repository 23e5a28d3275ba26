//! Moving Channel tuples between nodes.
//!
//! A transport only promises best effort: sends never block the tick and
//! failures are logged, never returned. Whatever arrives is buffered in an
//! [`Inbox`] until the node drains it at the start of its next tick.

pub mod memory;
pub mod tcp;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::value::Tuple;

/// Tuples of one Channel relation addressed to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub relation: String,
    pub tuples: Vec<Tuple>,
}

pub trait Transport: Send {
    /// The address other nodes use to reach this one.
    fn local_addr(&self) -> &str;

    /// Queues an envelope for delivery without waiting for it.
    fn send(&self, envelope: Envelope);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_addr(&self) -> &str {
        (**self).local_addr()
    }

    fn send(&self, envelope: Envelope) {
        (**self).send(envelope)
    }
}

/// Envelopes received since the last drain.
#[derive(Debug)]
pub struct Inbox {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    pending: Vec<Envelope>,
}

impl Inbox {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Envelope>, Inbox) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inbox = Inbox {
            receiver,
            pending: Vec::new(),
        };
        (sender, inbox)
    }

    /// Takes everything that has arrived so far, in arrival order.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut envelopes = std::mem::take(&mut self.pending);
        while let Ok(envelope) = self.receiver.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }

    /// Waits until at least one envelope is buffered. Returns `false` once
    /// every sender is gone. Cancel safe.
    pub async fn ready(&mut self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        match self.receiver.recv().await {
            Some(envelope) => {
                self.pending.push(envelope);
                true
            }
            None => false,
        }
    }

    /// Waits for the next envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if !self.pending.is_empty() {
            return Some(self.pending.remove(0));
        }
        self.receiver.recv().await
    }
}
