use std::fmt;

use serde::{Deserialize, Serialize};

pub const SELECTOR_SYSTEM: u16 = 0x5fff;
pub const SELECTOR_USER: u16 = 0x57ff;
pub const SELECTOR_USER_NO_REBOOTS: u16 = 0x100f;

/// Which logical subset of a device's readings a streamer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamerSelector {
    /// System events, reboots included. Certifies block completeness for its siblings.
    System,
    /// User data with reboot events merged in
    User,
    /// User data, no reboot events (older firmware)
    UserNoReboots,
    Other(u16),
}

impl StreamerSelector {
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    pub fn includes_reboots(&self) -> bool {
        matches!(self, Self::System | Self::User)
    }
}

impl From<u16> for StreamerSelector {
    fn from(value: u16) -> Self {
        match value {
            SELECTOR_SYSTEM => Self::System,
            SELECTOR_USER => Self::User,
            SELECTOR_USER_NO_REBOOTS => Self::UserNoReboots,
            other => Self::Other(other),
        }
    }
}

impl From<StreamerSelector> for u16 {
    fn from(value: StreamerSelector) -> Self {
        match value {
            StreamerSelector::System => SELECTOR_SYSTEM,
            StreamerSelector::User => SELECTOR_USER,
            StreamerSelector::UserNoReboots => SELECTOR_USER_NO_REBOOTS,
            StreamerSelector::Other(raw) => raw,
        }
    }
}

impl fmt::Display for StreamerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: u16 = (*self).into();
        match self {
            Self::System => write!(f, "system (0x{raw:04x})"),
            Self::User => write!(f, "user (0x{raw:04x})"),
            Self::UserNoReboots => write!(f, "user-no-reboots (0x{raw:04x})"),
            Self::Other(_) => write!(f, "0x{raw:04x}"),
        }
    }
}
