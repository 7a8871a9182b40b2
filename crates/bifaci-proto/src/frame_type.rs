//! Frame type discriminant.

/// Discriminant carried in the `frameType` field.
///
/// Value `2` is permanently reserved (removed from an earlier protocol
/// revision); it and any value outside this set fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Handshake frame carrying limits and optionally a manifest.
    Hello = 0,
    /// Request carrying a capability URN.
    Req = 1,
    /// One chunk of a stream.
    Chunk = 3,
    /// Terminal frame closing a request across all its streams.
    End = 4,
    /// Out-of-band log line.
    Log = 5,
    /// Terminal error frame closing a request.
    Err = 6,
    /// Keepalive, bypasses flow ordering.
    Heartbeat = 7,
    /// Opens one argument/result stream within a request.
    StreamStart = 8,
    /// Closes one argument/result stream within a request.
    StreamEnd = 9,
    /// Relay advertisement: manifest + limits.
    RelayNotify = 10,
    /// Relay resource report.
    RelayState = 11,
}

impl FrameType {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw wire value. `None` for the reserved value `2` or any
    /// value outside the defined set.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Hello),
            1 => Some(Self::Req),
            3 => Some(Self::Chunk),
            4 => Some(Self::End),
            5 => Some(Self::Log),
            6 => Some(Self::Err),
            7 => Some(Self::Heartbeat),
            8 => Some(Self::StreamStart),
            9 => Some(Self::StreamEnd),
            10 => Some(Self::RelayNotify),
            11 => Some(Self::RelayState),
            _ => None,
        }
    }

    /// True for frame types that are ordered per-flow by `SeqAssigner` and
    /// `ReorderBuffer`. HELLO, HEARTBEAT, and the RELAY_* control
    /// frames bypass ordering entirely.
    #[must_use]
    pub const fn is_flow_frame(self) -> bool {
        matches!(
            self,
            Self::Req
                | Self::Chunk
                | Self::End
                | Self::Log
                | Self::Err
                | Self::StreamStart
                | Self::StreamEnd
        )
    }
}
