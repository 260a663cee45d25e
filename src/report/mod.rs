//! Streamer report wire format.
//!
//! ```text
//! Header (20 bytes):  fmt:u8 len_low:u8 len_high:u16 dev_id:u32 rpt_id:u32
//!                     sent_timestamp:u32 signature_flags:u8 streamer_index:u8
//!                     streamer_selector:u16
//! Reading (16 bytes): stream:u16 reserved:u16 id:u32 timestamp:u32 value:u32
//! Footer (24 bytes):  lowest_id:u32 highest_id:u32 signature:[u8;16]
//! ```
//!
//! All integers are little-endian. `signature` is the first 16 bytes of the
//! SHA-256 of every byte before it.

use serde::{Deserialize, Serialize};

use crate::ids::{REBOOT_VID, SYSTEM_VID_FLAG};

pub mod builder;
pub mod codec;
pub mod digest;
pub mod error;
pub mod parser;
pub mod selector;

use error::ParseError;
use selector::StreamerSelector;

pub const REPORT_FORMAT: u8 = 1;
pub const HEADER_LENGTH: usize = 20;
pub const READING_LENGTH: usize = 16;
pub const FOOTER_LENGTH: usize = 24;
pub const SIGNATURE_LENGTH: usize = 16;
/// Largest report the mobile uploaders will send. Reports just under it were likely cut short.
pub const DEFAULT_MAX_REPORT_LENGTH: usize = 196_608;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub fmt: u8,
    pub len_low: u8,
    pub len_high: u16,
    pub device_id: u32,
    pub report_id: u32,
    /// seconds since the device started counting (last reboot)
    pub sent_timestamp: u32,
    pub signature_flags: u8,
    pub streamer_index: u8,
    pub streamer_selector: u16,
}

impl ReportHeader {
    /// Declared total length of the report (24 bits)
    pub fn length(&self) -> usize {
        ((self.len_high as usize) << 8) | self.len_low as usize
    }

    pub fn set_length(&mut self, length: usize) {
        self.len_low = (length & 0xff) as u8;
        self.len_high = ((length >> 8) & 0xffff) as u16;
    }

    pub fn selector(&self) -> StreamerSelector {
        self.streamer_selector.into()
    }

    pub fn expected_reading_count(&self) -> Result<usize, ParseError> {
        let length = self.length();
        let payload = length
            .checked_sub(HEADER_LENGTH + FOOTER_LENGTH)
            .ok_or_else(|| {
                ParseError::Malformed(format!(
                    "declared length {length} is shorter than header and footer"
                ))
            })?;

        if payload % READING_LENGTH != 0 {
            return Err(ParseError::Malformed(format!(
                "declared length {length} leaves {} stray bytes",
                payload % READING_LENGTH
            )));
        }

        Ok(payload / READING_LENGTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// variable id
    pub stream: u16,
    pub reserved: u16,
    /// monotonic reading counter
    pub id: u32,
    /// elapsed seconds, or RTC seconds since 2000 when bit 31 is set
    pub timestamp: u32,
    pub value: u32,
}

impl Reading {
    pub fn is_system(&self) -> bool {
        self.stream & SYSTEM_VID_FLAG != 0
    }

    pub fn is_reboot(&self) -> bool {
        self.stream == REBOOT_VID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFooter {
    pub lowest_id: u32,
    pub highest_id: u32,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl ReportFooter {
    pub fn contains(&self, id: u32) -> bool {
        (self.lowest_id..=self.highest_id).contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integrity {
    Verified,
    Mismatch,
    /// Signature is not a plain hash, nothing was checked
    Unverified { signature_flags: u8 },
}

impl Integrity {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedReport {
    pub header: ReportHeader,
    pub footer: ReportFooter,
    pub readings: Vec<Reading>,
    pub integrity: Integrity,
    /// declared length sits just under the uploader limit
    pub chopped: bool,
}

impl ParsedReport {
    pub fn expected_count(&self) -> usize {
        self.readings.len()
    }

    pub fn selector(&self) -> StreamerSelector {
        self.header.selector()
    }

    pub fn is_chopped(length: usize, max_length: usize) -> bool {
        length > max_length.saturating_sub(READING_LENGTH) && length < max_length
    }
}
