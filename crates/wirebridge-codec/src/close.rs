//! Close status codes and the acceptance rules applied to inbound Close frames.

/// Close statuses this side puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure.
    Normal = 1000,
    /// Endpoint shutting down.
    GoingAway = 1001,
    /// Framing or control-frame rule broken.
    Protocol = 1002,
    /// Text that is not UTF-8.
    InvalidPayload = 1007,
    /// Frame above the configured size limit.
    MessageTooBig = 1009,
    /// Local failure unrelated to the peer.
    InternalError = 1011,
}

impl CloseCode {
    /// Get the u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Reason text sent alongside the status.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "",
            Self::GoingAway => "Going away",
            Self::Protocol => "Protocol Error",
            Self::InvalidPayload => "Invalid UTF-8",
            Self::MessageTooBig => "Message Too Big",
            Self::InternalError => "Internal Error",
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Reserved codes that must never appear in a received Close frame.
const REJECTED_STATUS: [u16; 7] = [1004, 1005, 1006, 1012, 1013, 1014, 1015];

/// Whether a status received in a Close frame is acceptable.
///
/// Rejected: anything below 1000, the reserved set 1004-1006 and
/// 1012-1015, the unassigned range 1016-2999, and 5000 upwards.
/// 3000-4999 (library and private use) are accepted.
pub fn is_acceptable_status(status: u16) -> bool {
    !(status < 1000
        || REJECTED_STATUS.contains(&status)
        || (1016..3000).contains(&status)
        || status >= 5000)
}
