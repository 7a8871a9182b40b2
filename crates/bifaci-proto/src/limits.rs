//! Negotiated frame/chunk/reorder-buffer size limits.

/// Default maximum encoded frame size (16 MiB).
pub const DEFAULT_MAX_FRAME: u64 = 16 * 1024 * 1024;

/// Default maximum CHUNK payload size (64 KiB).
pub const DEFAULT_MAX_CHUNK: u64 = 64 * 1024;

/// Default bound on out-of-order frames buffered per flow.
pub const DEFAULT_MAX_REORDER_BUFFER: u64 = 64;

/// Size limits exchanged and negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum encoded length of a single frame.
    pub max_frame: u64,
    /// Maximum payload size of a single CHUNK.
    pub max_chunk: u64,
    /// Maximum number of out-of-order frames buffered per flow.
    pub max_reorder_buffer: u64,
}

impl Limits {
    /// Construct a limits triple directly.
    #[must_use]
    pub const fn new(max_frame: u64, max_chunk: u64, max_reorder_buffer: u64) -> Self {
        Self { max_frame, max_chunk, max_reorder_buffer }
    }

    /// Componentwise minimum of two limit sets. Commutative and idempotent.
    #[must_use]
    pub fn negotiate(local: Self, remote: Self) -> Self {
        Self {
            max_frame: local.max_frame.min(remote.max_frame),
            max_chunk: local.max_chunk.min(remote.max_chunk),
            max_reorder_buffer: local.max_reorder_buffer.min(remote.max_reorder_buffer),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
            max_chunk: DEFAULT_MAX_CHUNK,
            max_reorder_buffer: DEFAULT_MAX_REORDER_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_is_componentwise_min() {
        let a = Limits::new(100, 50, 64);
        let b = Limits::new(80, 60, 32);
        assert_eq!(Limits::negotiate(a, b), Limits::new(80, 50, 32));
    }

    #[test]
    fn negotiate_is_commutative() {
        let a = Limits::new(100, 50, 64);
        let b = Limits::new(80, 60, 32);
        assert_eq!(Limits::negotiate(a, b), Limits::negotiate(b, a));
    }

    #[test]
    fn negotiate_is_idempotent() {
        let a = Limits::new(100, 50, 64);
        assert_eq!(Limits::negotiate(a, a), a);
    }

    #[test]
    fn default_reorder_buffer_matches_seed_tests() {
        assert_eq!(Limits::default().max_reorder_buffer, 64);
    }
}
