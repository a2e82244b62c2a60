//! The `Transport` abstraction and its in-process implementation.
//!
//! §9 notes that spawning an agent as a child process "trades binary size
//! for fault isolation" and that "an acceptable simpler alternative is a
//! dedicated thread with its own inbox; the specification only requires
//! that the host's local data is served by a peer with the same role as
//! every worker." `LocalFabric` takes that alternative: every peer
//! (driver, host, worker controllers, agents) gets its own
//! `crossbeam_channel` inbox inside one process, and the blocking-probe
//! semantics of §4.2 are implemented as a literal blocking receive on that
//! inbox rather than an MPI probe/recv pair.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::fabric::{Envelope, Peer, Tag};
use crate::{ErrorKind, Result};

/// The operations every event loop in §4.2 needs: send to a named peer,
/// block-probe-and-receive from anyone, and the two collective operations
/// (broadcast, gather) the host uses.
pub trait Transport: Send + Sync {
    fn send(&self, envelope: Envelope) -> Result<()>;

    /// Blocks until a message addressed to `who` arrives, then returns it.
    /// This is the fabric's one blocking-probe-then-receive primitive; every
    /// event loop in §4.2/§4.6 is built on top of it.
    fn recv(&self, who: Peer) -> Result<Envelope>;

    /// Non-blocking: returns `Ok(None)` immediately if no message is queued.
    /// Used only by the host's gather loop, which must poll both the agent
    /// channel and the inter-controller channel (§4.2).
    fn try_recv(&self, who: Peer) -> Result<Option<Envelope>>;

    /// Sends the same payload to every worker rank `1..world_size` and to
    /// the host's own agent, in parallel across a thread pool (§4.2).
    fn broadcast(&self, from: Peer, tag: Tag, world_size: u32, payload: &[u8]) -> Result<()> {
        use rayon::prelude::*;
        let targets: Vec<Peer> = (1..world_size)
            .map(Peer::Worker)
            .chain(std::iter::once(Peer::Agent(0)))
            .collect();
        targets
            .into_par_iter()
            .map(|to| self.send(Envelope::new(tag, from, to, payload.to_vec())))
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }
}

/// A `Transport` backed by one `crossbeam_channel` per [`Peer`], all living
/// in the same process. Registration happens once, up front, when the
/// in-process cluster is assembled.
pub struct LocalFabric {
    inboxes: Mutex<HashMap<Peer, (Sender<Envelope>, Receiver<Envelope>)>>,
}

impl Default for LocalFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFabric {
    pub fn new() -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an inbox for `who`. Must be called once per peer before the
    /// cluster starts exchanging messages.
    pub fn register(&self, who: Peer) {
        let mut inboxes = self.inboxes.lock().expect("fabric mutex poisoned");
        inboxes
            .entry(who)
            .or_insert_with(crossbeam_channel::unbounded);
    }

    fn sender_for(&self, who: Peer) -> Result<Sender<Envelope>> {
        let inboxes = self.inboxes.lock().expect("fabric mutex poisoned");
        inboxes
            .get(&who)
            .map(|(tx, _)| tx.clone())
            .ok_or_else(|| ErrorKind::Communication.with_message("no inbox registered for peer"))
    }

    fn receiver_for(&self, who: Peer) -> Result<Receiver<Envelope>> {
        let inboxes = self.inboxes.lock().expect("fabric mutex poisoned");
        inboxes
            .get(&who)
            .map(|(_, rx)| rx.clone())
            .ok_or_else(|| ErrorKind::Communication.with_message("no inbox registered for peer"))
    }
}

impl Transport for LocalFabric {
    #[tracing::instrument(level = "debug", skip(self, envelope), fields(tag = ?envelope.tag, to = ?envelope.to), err)]
    fn send(&self, envelope: Envelope) -> Result<()> {
        let to = envelope.to;
        let tx = self.sender_for(to)?;
        tx.send(envelope)
            .map_err(|e| ErrorKind::Communication.with_source(e))
    }

    fn recv(&self, who: Peer) -> Result<Envelope> {
        let rx = self.receiver_for(who)?;
        rx.recv().map_err(|e| ErrorKind::Communication.with_source(e))
    }

    fn try_recv(&self, who: Peer) -> Result<Option<Envelope>> {
        let rx = self.receiver_for(who)?;
        match rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(ErrorKind::Communication.with_source(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_round_trips_payload() {
        let fabric = LocalFabric::new();
        fabric.register(Peer::Host);
        fabric.register(Peer::Worker(1));

        fabric
            .send(Envelope::new(Tag::Ack, Peer::Worker(1), Peer::Host, vec![1, 2, 3]))
            .unwrap();
        let received = fabric.recv(Peer::Host).unwrap();
        assert_eq!(received.payload, vec![1, 2, 3]);
        assert_eq!(received.tag, Tag::Ack);
    }

    #[test]
    fn try_recv_is_none_on_empty_inbox() {
        let fabric = LocalFabric::new();
        fabric.register(Peer::Host);
        assert!(fabric.try_recv(Peer::Host).unwrap().is_none());
    }

    #[test]
    fn broadcast_reaches_every_worker_and_the_hosts_agent() {
        let fabric = LocalFabric::new();
        for peer in [Peer::Host, Peer::Worker(1), Peer::Worker(2), Peer::Agent(0)] {
            fabric.register(peer);
        }
        fabric
            .broadcast(Peer::Host, Tag::GlobalDataspace, 3, b"payload")
            .unwrap();

        for peer in [Peer::Worker(1), Peer::Worker(2), Peer::Agent(0)] {
            let envelope = fabric.recv(peer).unwrap();
            assert_eq!(envelope.payload, b"payload");
            assert_eq!(envelope.tag, Tag::GlobalDataspace);
        }
    }
}
