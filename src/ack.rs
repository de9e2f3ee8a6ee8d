//! Chunk acknowledgement for at-least-once delivery.
//!
//! A batch carrying a chunk id reserves a slot in its connection's
//! [`AckQueue`] before it is dispatched. The callback side completes the slot
//! through an [`AckHandle`]; the connection then writes `{"ack": token}` for
//! every slot at the head of the queue that has completed, so acks leave in
//! the order their chunks arrived even when consumers finish out of order.
//! A handle dropped without acknowledging abandons its slot: no response is
//! written and the sender retries the chunk after its own timeout.

use std::{collections::VecDeque, fmt, sync::Arc};

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;

use crate::event::ChunkId;

/// Value returned to the sender to confirm receipt of a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AckToken(Bytes);

impl AckToken {
    /// Wrap raw token bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl From<&str> for AckToken {
    fn from(value: &str) -> Self { Self(Bytes::copy_from_slice(value.as_bytes())) }
}

/// Derivation of the ack token from a chunk id.
///
/// The Forward protocol v1 requires the `ack` value to equal the request's
/// `chunk` option, which [`echo_chunk_id`] implements. Deployments speaking a
/// variant of the protocol can plug in their own derivation through
/// [`ServerConfig::ack_token`](crate::server::ServerConfig::ack_token).
pub type AckTokenFn = Arc<dyn Fn(&ChunkId) -> AckToken + Send + Sync>;

/// Forward protocol v1 derivation: the token is the chunk id itself.
///
/// ```
/// use forwardline::{ack::echo_chunk_id, event::ChunkId};
///
/// let token = echo_chunk_id(&ChunkId::from("c1"));
/// assert_eq!(token.as_bytes(), b"c1");
/// ```
#[must_use]
pub fn echo_chunk_id(chunk: &ChunkId) -> AckToken { AckToken(chunk.to_bytes()) }

/// Default [`AckTokenFn`] wrapping [`echo_chunk_id`].
#[must_use]
pub fn default_ack_token() -> AckTokenFn { Arc::new(echo_chunk_id) }

/// Outcome reported by an [`AckHandle`] to its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AckCompletion {
    Acked(u64),
    Abandoned(u64),
}

impl AckCompletion {
    fn seq(self) -> u64 {
        match self {
            Self::Acked(seq) | Self::Abandoned(seq) => seq,
        }
    }
}

/// Capability to acknowledge one dispatched batch.
///
/// Handles for batches without a chunk id are inert. Handles may be moved to
/// and completed from any thread.
#[must_use = "dropping an AckHandle without calling `ack` abandons the chunk"]
pub struct AckHandle {
    slot: Option<(mpsc::UnboundedSender<AckCompletion>, u64)>,
}

impl AckHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AckCompletion>, seq: u64) -> Self {
        Self {
            slot: Some((tx, seq)),
        }
    }

    /// Handle for a batch that did not request acknowledgement.
    pub fn none() -> Self { Self { slot: None } }

    /// Whether completing this handle writes an ack response.
    #[must_use]
    pub fn is_requested(&self) -> bool { self.slot.is_some() }

    /// Confirm the batch was consumed; the connection writes the ack response
    /// once all earlier chunks on it are resolved.
    pub fn ack(mut self) {
        if let Some((tx, seq)) = self.slot.take() {
            // The connection may already be closed; the sender will retry.
            let _ = tx.send(AckCompletion::Acked(seq));
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if let Some((tx, seq)) = self.slot.take() {
            debug!("ack abandoned: seq={seq}");
            let _ = tx.send(AckCompletion::Abandoned(seq));
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("seq", &self.slot.as_ref().map(|(_, seq)| *seq))
            .finish()
    }
}

#[derive(Debug)]
enum SlotState {
    Waiting,
    Acked,
    Abandoned,
}

#[derive(Debug)]
struct Slot {
    token: AckToken,
    state: SlotState,
}

/// Per-connection FIFO of chunks awaiting their callback's verdict.
#[derive(Debug, Default)]
pub(crate) struct AckQueue {
    /// Sequence number of the slot at the head of `slots`.
    head: u64,
    slots: VecDeque<Slot>,
}

impl AckQueue {
    /// Reserve a slot and return its sequence number.
    pub(crate) fn reserve(&mut self, token: AckToken) -> u64 {
        let seq = self.head + self.slots.len() as u64;
        self.slots.push_back(Slot {
            token,
            state: SlotState::Waiting,
        });
        seq
    }

    /// Record a completion and return the tokens now ready to be written, in
    /// arrival order.
    pub(crate) fn complete(&mut self, completion: AckCompletion) -> Vec<AckToken> {
        let index = completion
            .seq()
            .checked_sub(self.head)
            .and_then(|i| usize::try_from(i).ok());
        if let Some(slot) = index.and_then(|i| self.slots.get_mut(i)) {
            slot.state = match completion {
                AckCompletion::Acked(_) => SlotState::Acked,
                AckCompletion::Abandoned(_) => SlotState::Abandoned,
            };
        }

        let mut ready = Vec::new();
        while let Some(slot) = self.slots.front() {
            match slot.state {
                SlotState::Waiting => break,
                SlotState::Acked | SlotState::Abandoned => {
                    if let Some(slot) = self.slots.pop_front() {
                        self.head += 1;
                        if matches!(slot.state, SlotState::Acked) {
                            ready.push(slot.token);
                        }
                    }
                }
            }
        }
        ready
    }

    /// Slots still waiting for a verdict.
    pub(crate) fn len(&self) -> usize { self.slots.len() }

    pub(crate) fn is_empty(&self) -> bool { self.slots.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> AckToken { AckToken::from(s) }

    #[test]
    fn releases_acks_in_arrival_order() {
        let mut queue = AckQueue::default();
        let first = queue.reserve(token("a"));
        let second = queue.reserve(token("b"));
        let third = queue.reserve(token("c"));

        assert!(queue.complete(AckCompletion::Acked(third)).is_empty());
        assert!(queue.complete(AckCompletion::Acked(second)).is_empty());
        assert_eq!(
            queue.complete(AckCompletion::Acked(first)),
            vec![token("a"), token("b"), token("c")]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn abandoned_slots_do_not_block_later_acks() {
        let mut queue = AckQueue::default();
        let first = queue.reserve(token("a"));
        let second = queue.reserve(token("b"));

        assert!(queue.complete(AckCompletion::Acked(second)).is_empty());
        assert_eq!(queue.complete(AckCompletion::Abandoned(first)), vec![token("b")]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn stale_completions_are_ignored() {
        let mut queue = AckQueue::default();
        let first = queue.reserve(token("a"));
        assert_eq!(queue.complete(AckCompletion::Acked(first)), vec![token("a")]);
        assert!(queue.complete(AckCompletion::Acked(first)).is_empty());
        let next = queue.reserve(token("b"));
        assert_eq!(next, first + 1);
    }

    #[test]
    fn handle_reports_ack_and_abandonment() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        AckHandle::new(tx.clone(), 7).ack();
        drop(AckHandle::new(tx, 8));
        assert_eq!(rx.try_recv(), Ok(AckCompletion::Acked(7)));
        assert_eq!(rx.try_recv(), Ok(AckCompletion::Abandoned(8)));
    }

    #[test]
    fn inert_handle_sends_nothing() {
        let handle = AckHandle::none();
        assert!(!handle.is_requested());
        handle.ack();
    }
}
