//! Reliable delivery bookkeeping.
//!
//! The ledger tracks both directions of a sequenced connection:
//!
//! - **Outgoing**: the next sequence number to stamp, and the messages that
//!   were sent but not yet acknowledged (the replay buffer).
//! - **Incoming**: the last sequence number accepted from the server, so that
//!   gaps can be detected and an ack for the next one can be queued.
//!
//! Sequence numbers wrap around `u32`, so "older than" is decided by
//! [`seq_less`], never by `<`.
//!
//! ## Reconnect handshake
//!
//! ```text
//! stop()  ──→ mark_reconnect()     (only if an ack was ever received)
//!                 │
//!                 ▼
//!         normal queue held back
//!                 │
//! first ack ──→ on_ack(n) returns unacked messages for replay, exactly once
//! ```

use std::collections::VecDeque;

use tether_protocol::OutgoingMessage;

/// Whether sequence number `a` comes before `b`, modulo 2^32.
///
/// ```
/// use tether_transport::seq_less;
///
/// assert!(seq_less(1, 2));
/// assert!(seq_less(u32::MAX, 0));
/// assert!(!seq_less(5, 5));
/// ```
pub fn seq_less(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// What to do with an inbound frame carrying `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    /// In order. Queue an ack for `ack` and deliver the frame.
    Accept { ack: u32 },
    /// Already seen. Drop the frame, keep the connection.
    Skip,
    /// A gap. The connection can no longer be trusted.
    Violation { expected: u32 },
}

/// Sequence and acknowledgement state for one transport.
#[derive(Debug)]
pub struct Ledger {
    next_seq: u32,
    sent: VecDeque<OutgoingMessage>,
    ack_received: bool,
    awaiting_first_ack: bool,
    last_received: Option<u32>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates a ledger whose first outgoing seq is random.
    pub fn new() -> Self {
        Self::with_initial_seq(rand::random())
    }

    /// Creates a ledger with a known first outgoing seq.
    pub fn with_initial_seq(seq: u32) -> Self {
        Self {
            next_seq: seq,
            sent: VecDeque::new(),
            ack_received: false,
            awaiting_first_ack: false,
            last_received: None,
        }
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Stamps `msg` with the next sequence number, unless it already has one
    /// from an earlier send.
    pub fn assign_seq(&mut self, msg: &mut OutgoingMessage) -> u32 {
        if let Some(seq) = msg.seq {
            return seq;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        msg.seq = Some(seq);
        msg.body.set_seq(seq);
        seq
    }

    /// Keeps a sent message until an ack covers it.
    pub fn retain(&mut self, msg: OutgoingMessage) {
        self.sent.push_back(msg);
    }

    /// Number of sent messages waiting for an ack.
    pub fn unacked(&self) -> usize {
        self.sent.len()
    }

    /// Applies an ack from the server.
    ///
    /// Every retained message with a seq before `ack` is dropped. If this is
    /// the first ack after a reconnect, the remaining messages are removed
    /// and returned in seq order so the caller can queue them for resending.
    pub fn on_ack(&mut self, ack: u32) -> Vec<OutgoingMessage> {
        self.ack_received = true;

        if self.awaiting_first_ack {
            self.awaiting_first_ack = false;
            let replay: Vec<_> = self
                .sent
                .drain(..)
                .filter(|m| m.seq.is_none_or(|seq| !seq_less(seq, ack)))
                .collect();
            return replay;
        }

        while self
            .sent
            .front()
            .is_some_and(|m| m.seq.is_some_and(|seq| seq_less(seq, ack)))
        {
            self.sent.pop_front();
        }
        Vec::new()
    }

    /// Called when the connection stops. Holds back the normal send queue
    /// until the server tells us, with its first ack, what it already has.
    pub fn mark_reconnect(&mut self) {
        if self.ack_received {
            self.awaiting_first_ack = true;
        }
    }

    /// Whether the normal send queue is held back.
    pub fn is_awaiting_first_ack(&self) -> bool {
        self.awaiting_first_ack
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Checks an inbound seq against the last one accepted.
    pub fn on_seq(&mut self, seq: u32) -> SeqVerdict {
        if let Some(last) = self.last_received {
            if !seq_less(last, seq) {
                return SeqVerdict::Skip;
            }
            let expected = last.wrapping_add(1);
            if seq != expected {
                return SeqVerdict::Violation { expected };
            }
        }

        self.last_received = Some(seq);
        SeqVerdict::Accept {
            ack: seq.wrapping_add(1),
        }
    }

    /// The ack to send right after reconnecting, if the server has been
    /// sending sequenced frames.
    pub fn resume_ack(&self) -> Option<u32> {
        self.last_received.map(|last| last.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use tether_protocol::{Encoding, MessageBody};

    use super::*;

    fn sent(ledger: &mut Ledger, n: usize) -> Vec<u32> {
        (0..n)
            .map(|_| {
                let mut msg = OutgoingMessage::sequenced(MessageBody::empty(Encoding::Json), true);
                let seq = ledger.assign_seq(&mut msg);
                ledger.retain(msg);
                seq
            })
            .collect()
    }

    #[test]
    fn test_seq_less_wraps() {
        assert!(seq_less(u32::MAX - 1, 1));
        assert!(!seq_less(1, u32::MAX - 1));
        assert!(!seq_less(7, 7));
    }

    #[test]
    fn test_assign_seq_increments_and_stamps_body() {
        let mut ledger = Ledger::with_initial_seq(u32::MAX);
        let mut a = OutgoingMessage::sequenced(MessageBody::empty(Encoding::Json), true);
        let mut b = OutgoingMessage::sequenced(MessageBody::empty(Encoding::Json), true);
        assert_eq!(ledger.assign_seq(&mut a), u32::MAX);
        assert_eq!(ledger.assign_seq(&mut b), 0);
        assert_eq!(a.body.seq(), Some(u32::MAX));
    }

    #[test]
    fn test_assign_seq_keeps_existing_number() {
        let mut ledger = Ledger::with_initial_seq(10);
        let mut msg = OutgoingMessage::sequenced(MessageBody::empty(Encoding::Json), true);
        ledger.assign_seq(&mut msg);
        assert_eq!(ledger.assign_seq(&mut msg), 10);
    }

    #[test]
    fn test_ack_drops_covered_messages_only() {
        let mut ledger = Ledger::with_initial_seq(100);
        let seqs = sent(&mut ledger, 5);

        // Ack for m3.seq + 1 covers m1..m3.
        ledger.on_ack(seqs[2] + 1);
        assert_eq!(ledger.unacked(), 2);
        assert_eq!(ledger.sent.front().and_then(|m| m.seq), Some(seqs[3]));
    }

    #[test]
    fn test_ack_across_wraparound() {
        let mut ledger = Ledger::with_initial_seq(u32::MAX - 1);
        sent(&mut ledger, 4);
        ledger.on_ack(1);
        assert_eq!(ledger.unacked(), 1);
    }

    #[test]
    fn test_reconnect_replays_unacked_once() {
        let mut ledger = Ledger::with_initial_seq(1);
        sent(&mut ledger, 4);
        ledger.on_ack(2);
        ledger.mark_reconnect();
        assert!(ledger.is_awaiting_first_ack());

        let replay = ledger.on_ack(3);
        let seqs: Vec<_> = replay.iter().filter_map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(!ledger.is_awaiting_first_ack());
        assert_eq!(ledger.unacked(), 0);

        assert!(ledger.on_ack(4).is_empty());
    }

    #[test]
    fn test_mark_reconnect_without_any_ack_does_not_block() {
        let mut ledger = Ledger::with_initial_seq(1);
        sent(&mut ledger, 2);
        ledger.mark_reconnect();
        assert!(!ledger.is_awaiting_first_ack());
    }

    #[test]
    fn test_in_order_seqs_produce_next_acks() {
        let mut ledger = Ledger::new();
        let s = 41;
        assert_eq!(ledger.on_seq(s), SeqVerdict::Accept { ack: s + 1 });
        assert_eq!(ledger.on_seq(s + 1), SeqVerdict::Accept { ack: s + 2 });
        assert_eq!(ledger.on_seq(s + 2), SeqVerdict::Accept { ack: s + 3 });
        assert_eq!(ledger.resume_ack(), Some(s + 3));
    }

    #[test]
    fn test_gap_is_violation_and_replay_is_skipped() {
        let mut ledger = Ledger::new();
        ledger.on_seq(10);
        assert_eq!(ledger.on_seq(10), SeqVerdict::Skip);
        assert_eq!(ledger.on_seq(9), SeqVerdict::Skip);
        assert_eq!(ledger.on_seq(12), SeqVerdict::Violation { expected: 11 });
    }

    #[test]
    fn test_resume_ack_absent_before_any_seq() {
        assert_eq!(Ledger::new().resume_ack(), None);
    }
}
