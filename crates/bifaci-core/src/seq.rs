//! Per-flow monotonic sequence number assignment.

use std::collections::HashMap;

use bifaci_proto::MessageId;

/// Identifies one ordered flow of frames: a request id, and — for frames
/// that belong to a stream opened by that request — the routing id that
/// correlates them back to it.
///
/// HELLO/HEARTBEAT/RELAY_* frames are never flow frames and have no
/// `FlowKey`; see `bifaci_proto::FrameType::is_flow_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey(pub MessageId, pub Option<MessageId>);

/// Assigns strictly increasing per-flow sequence numbers, starting at 0.
///
/// One `SeqAssigner` is owned per peer connection (not shared across
/// peers): sequence numbers are scoped to the sender, not global.
#[derive(Debug, Default)]
pub struct SeqAssigner {
    next: HashMap<FlowKey, u64>,
}

impl SeqAssigner {
    /// Create an assigner with no flows seen yet.
    #[must_use]
    pub fn new() -> Self {
        Self { next: HashMap::new() }
    }

    /// Return the next sequence number for `flow` and advance its counter.
    /// The first call for any flow returns 0.
    pub fn next(&mut self, flow: FlowKey) -> u64 {
        let slot = self.next.entry(flow).or_insert(0);
        let seq = *slot;
        *slot += 1;
        seq
    }

    /// Forget a flow's counter, e.g. once the request has fully completed.
    pub fn clear(&mut self, flow: FlowKey) {
        self.next.remove(&flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: u64) -> FlowKey {
        FlowKey(MessageId::Uint(id), Some(MessageId::Uint(id)))
    }

    #[test]
    fn first_seq_is_zero() {
        let mut assigner = SeqAssigner::new();
        assert_eq!(assigner.next(flow(1)), 0);
    }

    #[test]
    fn seq_is_monotonic_within_a_flow() {
        let mut assigner = SeqAssigner::new();
        let f = flow(1);
        assert_eq!(assigner.next(f), 0);
        assert_eq!(assigner.next(f), 1);
        assert_eq!(assigner.next(f), 2);
    }

    #[test]
    fn flows_are_independent() {
        let mut assigner = SeqAssigner::new();
        assert_eq!(assigner.next(flow(1)), 0);
        assert_eq!(assigner.next(flow(1)), 1);
        assert_eq!(assigner.next(flow(2)), 0);
    }

    #[test]
    fn clear_resets_the_flow() {
        let mut assigner = SeqAssigner::new();
        let f = flow(1);
        assigner.next(f);
        assigner.next(f);
        assigner.clear(f);
        assert_eq!(assigner.next(f), 0);
    }

    proptest::proptest! {
        #[test]
        fn always_monotonic(n in 1usize..200) {
            let mut assigner = SeqAssigner::new();
            let f = flow(42);
            for expected in 0..n as u64 {
                proptest::prop_assert_eq!(assigner.next(f), expected);
            }
        }
    }
}
