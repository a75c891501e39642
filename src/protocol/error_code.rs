//! Error codes carried by ERROR frames.

use std::fmt;

/// An ERROR frame code.
///
/// Codes below 0x100 are setup errors, 0x1xx connection errors and
/// 0x2xx stream errors. Anything from 0x301 up is application defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const INVALID_SETUP: Self = Self(0x0000_0001);
    pub const UNSUPPORTED_SETUP: Self = Self(0x0000_0002);
    pub const REJECTED_SETUP: Self = Self(0x0000_0003);
    pub const REJECTED_RESUME: Self = Self(0x0000_0004);
    pub const CONNECTION_ERROR: Self = Self(0x0000_0101);
    pub const CONNECTION_CLOSE: Self = Self(0x0000_0102);
    pub const APPLICATION_ERROR: Self = Self(0x0000_0201);
    pub const REJECTED: Self = Self(0x0000_0202);
    pub const CANCELED: Self = Self(0x0000_0203);
    pub const INVALID: Self = Self(0x0000_0204);

    /// Whether this code is only valid on stream 0.
    pub fn is_connection_level(self) -> bool {
        self.0 < 0x0000_0201
    }

    /// Whether this code reports a setup failure.
    pub fn is_setup_error(self) -> bool {
        matches!(self.0, 0x0000_0001..=0x0000_0004)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::INVALID_SETUP => "INVALID_SETUP",
            Self::UNSUPPORTED_SETUP => "UNSUPPORTED_SETUP",
            Self::REJECTED_SETUP => "REJECTED_SETUP",
            Self::REJECTED_RESUME => "REJECTED_RESUME",
            Self::CONNECTION_ERROR => "CONNECTION_ERROR",
            Self::CONNECTION_CLOSE => "CONNECTION_CLOSE",
            Self::APPLICATION_ERROR => "APPLICATION_ERROR",
            Self::REJECTED => "REJECTED",
            Self::CANCELED => "CANCELED",
            Self::INVALID => "INVALID",
            Self(code) => return write!(f, "0x{code:08x}"),
        };
        f.write_str(name)
    }
}
