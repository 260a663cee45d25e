use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit 11 of a stream id marks a system variable
pub const SYSTEM_VID_FLAG: u16 = 1 << 11;
pub const REBOOT_VID: u16 = 0x5c00;
/// Emitted once per reconciled report, value = streamer index
pub const COMPLETE_REPORT_VID: u16 = 0x5a05;

/// `0000-0000-0000-000a`
pub fn gid64(n: u64) -> String {
    format!(
        "{:04x}-{:04x}-{:04x}-{:04x}",
        (n >> 48) & 0xffff,
        (n >> 32) & 0xffff,
        (n >> 16) & 0xffff,
        n & 0xffff
    )
}

pub fn device_slug(device_id: u32) -> String {
    format!("d--{}", gid64(device_id as u64))
}

pub fn stream_slug(device_id: u32, vid: u16) -> String {
    format!("s--{}--{vid:04x}", gid64(device_id as u64))
}

pub fn parse_device_slug(slug: &str) -> Option<u32> {
    let gid = slug.strip_prefix("d--")?;
    let hex: String = gid.split('-').collect();
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()?.try_into().ok()
}

/// One streamer of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamerKey {
    pub device_id: u32,
    pub index: u8,
}

impl StreamerKey {
    pub fn new(device_id: u32, index: u8) -> Self {
        Self { device_id, index }
    }

    pub fn device_slug(&self) -> String {
        device_slug(self.device_id)
    }
}

impl fmt::Display for StreamerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t--{}--{:04x}", gid64(self.device_id as u64), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugs() {
        assert_eq!(device_slug(0xa), "d--0000-0000-0000-000a");
        assert_eq!(stream_slug(0xa, 0x5001), "s--0000-0000-0000-000a--5001");
        assert_eq!(StreamerKey::new(0xa, 1).to_string(), "t--0000-0000-0000-000a--0001");
        assert_eq!(gid64(0x1_0000_0002), "0000-0001-0000-0002");
    }

    #[test]
    fn test_parse_device_slug() {
        assert_eq!(parse_device_slug("d--0000-0000-0000-000a"), Some(0xa));
        assert_eq!(parse_device_slug("d--0000-0000-000a"), None);
        assert_eq!(parse_device_slug("t--0000-0000-0000-000a"), None);
    }
}
