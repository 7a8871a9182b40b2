//! Bounded out-of-order frame reassembly, keyed per flow.

use std::collections::{BTreeMap, HashMap};

use bifaci_proto::Frame;

use crate::error::CoreError;
use crate::seq::FlowKey;

/// Reassembles each flow's frames into sequence order, tolerating bounded
/// reordering.
///
/// Non-flow frames (HELLO, HEARTBEAT, RELAY_*) bypass the buffer and are
/// delivered immediately. For flow frames: a frame at `seq == expected` is
/// delivered immediately, along with any buffered frames it unblocks; a
/// frame ahead of `expected` is buffered up to `max_reorder_buffer` frames
/// per flow; a frame at or behind `expected`, or a duplicate of one
/// already buffered, is a [`CoreError`] — once raised, the flow is
/// considered poisoned and the caller must `clear` it or tear the
/// connection down.
#[derive(Debug)]
pub struct ReorderBuffer {
    max: u64,
    expected: HashMap<FlowKey, u64>,
    pending: HashMap<FlowKey, BTreeMap<u64, Frame>>,
}

impl ReorderBuffer {
    /// Create a buffer that tolerates up to `max_reorder_buffer` frames of
    /// lookahead per flow.
    #[must_use]
    pub fn new(max_reorder_buffer: u64) -> Self {
        Self { max: max_reorder_buffer, expected: HashMap::new(), pending: HashMap::new() }
    }

    /// Feed one received frame for `flow`. Returns the frames (if any, in
    /// order) now ready for delivery.
    ///
    /// # Errors
    /// [`CoreError::StaleSeq`] if `frame.seq` is at or behind the last
    /// delivered seq; [`CoreError::DuplicateSeq`] if `frame.seq` is
    /// already buffered out of order; [`CoreError::ReorderOverflow`] if
    /// accepting it would push the per-flow buffer past its bound.
    pub fn accept(&mut self, flow: FlowKey, frame: Frame) -> Result<Vec<Frame>, CoreError> {
        if !frame.is_flow_frame() {
            return Ok(vec![frame]);
        }

        let expected = *self.expected.entry(flow).or_insert(0);

        if frame.seq < expected {
            return Err(CoreError::StaleSeq { flow: format!("{flow:?}"), seq: frame.seq, expected });
        }

        if frame.seq == expected {
            let mut ready = vec![frame];
            let mut next = expected + 1;
            if let Some(buffered) = self.pending.get_mut(&flow) {
                while let Some(frame) = buffered.remove(&next) {
                    ready.push(frame);
                    next += 1;
                }
                if buffered.is_empty() {
                    self.pending.remove(&flow);
                }
            }
            self.expected.insert(flow, next);
            return Ok(ready);
        }

        let buffered = self.pending.entry(flow).or_default();
        if buffered.contains_key(&frame.seq) {
            return Err(CoreError::DuplicateSeq { flow: format!("{flow:?}"), seq: frame.seq });
        }
        if u64::try_from(buffered.len()).unwrap_or(u64::MAX) >= self.max {
            return Err(CoreError::ReorderOverflow {
                flow: format!("{flow:?}"),
                seq: frame.seq,
                expected,
            });
        }
        buffered.insert(frame.seq, frame);
        Ok(Vec::new())
    }

    /// Forget a flow entirely, e.g. once its request has completed. A
    /// subsequent `seq = 0` on the same flow key is accepted afresh.
    pub fn clear(&mut self, flow: FlowKey) {
        self.expected.remove(&flow);
        self.pending.remove(&flow);
    }
}

#[cfg(test)]
mod tests {
    use bifaci_proto::MessageId;

    use super::*;

    fn flow() -> FlowKey {
        FlowKey(MessageId::Uint(1), Some(MessageId::Uint(1)))
    }

    fn chunk(seq: u64) -> Frame {
        let id = MessageId::Uint(1);
        let mut frame = Frame::chunk(id, Some(id), "s0", 0, vec![seq as u8]);
        frame.seq = seq;
        frame
    }

    #[test]
    fn in_order_frames_are_delivered_immediately() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        assert_eq!(buf.accept(f, chunk(0)).unwrap().len(), 1);
        assert_eq!(buf.accept(f, chunk(1)).unwrap().len(), 1);
    }

    #[test]
    fn gap_is_buffered_then_fills() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        assert_eq!(buf.accept(f, chunk(1)).unwrap(), Vec::new());
        assert_eq!(buf.accept(f, chunk(2)).unwrap(), Vec::new());
        let delivered = buf.accept(f, chunk(0)).unwrap();
        assert_eq!(delivered.iter().map(|frame| frame.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn stale_seq_is_a_protocol_error() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        buf.accept(f, chunk(0)).unwrap();
        buf.accept(f, chunk(1)).unwrap();
        assert!(matches!(buf.accept(f, chunk(0)), Err(CoreError::StaleSeq { .. })));
    }

    #[test]
    fn duplicate_pending_is_a_protocol_error() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        buf.accept(f, chunk(2)).unwrap();
        assert!(matches!(buf.accept(f, chunk(2)), Err(CoreError::DuplicateSeq { .. })));
    }

    #[test]
    fn overflow_past_bound_errors() {
        let mut buf = ReorderBuffer::new(2);
        let f = flow();
        buf.accept(f, chunk(1)).unwrap();
        buf.accept(f, chunk(2)).unwrap();
        assert!(matches!(buf.accept(f, chunk(3)), Err(CoreError::ReorderOverflow { .. })));
    }

    #[test]
    fn non_flow_frames_bypass_the_buffer() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        buf.accept(f, chunk(5)).unwrap(); // buffered, out of order
        let hb = Frame::heartbeat(MessageId::Uint(1));
        let delivered = buf.accept(f, hb.clone()).unwrap();
        assert_eq!(delivered, vec![hb]);
    }

    #[test]
    fn clear_resets_the_flow_to_accept_seq_zero_again() {
        let mut buf = ReorderBuffer::new(64);
        let f = flow();
        buf.accept(f, chunk(0)).unwrap();
        buf.accept(f, chunk(1)).unwrap();
        buf.clear(f);
        assert_eq!(buf.accept(f, chunk(0)).unwrap().len(), 1);
    }

    #[test]
    fn flows_are_independent() {
        let mut buf = ReorderBuffer::new(64);
        let a = FlowKey(MessageId::Uint(1), Some(MessageId::Uint(1)));
        let b = FlowKey(MessageId::Uint(2), Some(MessageId::Uint(2)));
        assert_eq!(buf.accept(a, chunk(1)).unwrap(), Vec::new());
        assert_eq!(buf.accept(b, chunk(0)).unwrap().len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn any_permutation_of_a_run_delivers_in_order(seed in 0u64..10_000) {
            use proptest::prelude::*;

            let mut indices: Vec<u64> = (0..20).collect();
            // Deterministic shuffle from the proptest-supplied seed, no RNG crate needed.
            let mut seed = seed.wrapping_add(1);
            for i in (1..indices.len()).rev() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                let j = (seed >> 33) as usize % (i + 1);
                indices.swap(i, j);
            }

            let mut buf = ReorderBuffer::new(64);
            let f = flow();
            let mut delivered = Vec::new();
            for &seq in &indices {
                delivered.extend(buf.accept(f, chunk(seq)).unwrap());
            }
            let got: Vec<u64> = delivered.iter().map(|frame| frame.seq).collect();
            prop_assert_eq!(got, (0..20).collect::<Vec<u64>>());
        }
    }
}
