use bytes::{BufMut, Bytes, BytesMut};

use super::{
    FOOTER_LENGTH, HEADER_LENGTH, READING_LENGTH, REPORT_FORMAT, Reading, ReportHeader,
    codec::ReportCodable, digest, selector::StreamerSelector,
};

/// Encodes a well-formed, signed streamer report.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    header: ReportHeader,
    readings: Vec<Reading>,
    range: Option<(u32, u32)>,
}

impl ReportBuilder {
    pub fn new(device_id: u32, report_id: u32) -> Self {
        Self {
            header: ReportHeader {
                fmt: REPORT_FORMAT,
                len_low: 0,
                len_high: 0,
                device_id,
                report_id,
                sent_timestamp: 0,
                signature_flags: 0,
                streamer_index: 0,
                streamer_selector: StreamerSelector::System.into(),
            },
            readings: Vec::new(),
            range: None,
        }
    }

    pub fn sent_timestamp(mut self, sent_timestamp: u32) -> Self {
        self.header.sent_timestamp = sent_timestamp;
        self
    }

    pub fn streamer(mut self, index: u8, selector: StreamerSelector) -> Self {
        self.header.streamer_index = index;
        self.header.streamer_selector = selector.into();
        self
    }

    pub fn signature_flags(mut self, flags: u8) -> Self {
        self.header.signature_flags = flags;
        self
    }

    pub fn reading(mut self, stream: u16, id: u32, timestamp: u32, value: u32) -> Self {
        self.readings.push(Reading {
            stream,
            reserved: 0,
            id,
            timestamp,
            value,
        });
        self
    }

    pub fn readings(mut self, readings: impl IntoIterator<Item = Reading>) -> Self {
        self.readings.extend(readings);
        self
    }

    /// Overrides the footer's declared counter range
    pub fn range(mut self, lowest_id: u32, highest_id: u32) -> Self {
        self.range = Some((lowest_id, highest_id));
        self
    }

    pub fn build(mut self) -> Bytes {
        let length = HEADER_LENGTH + self.readings.len() * READING_LENGTH + FOOTER_LENGTH;
        self.header.set_length(length);

        let (lowest_id, highest_id) = self.range.unwrap_or_else(|| {
            let lowest = self.readings.iter().map(|r| r.id).min().unwrap_or(0);
            let highest = self.readings.iter().map(|r| r.id).max().unwrap_or(0);
            (lowest, highest)
        });

        let mut buf = BytesMut::with_capacity(length);
        self.header.encode(&mut buf);
        for reading in &self.readings {
            reading.encode(&mut buf);
        }
        buf.put_u32_le(lowest_id);
        buf.put_u32_le(highest_id);
        let signature = digest::truncated_digest(&buf);
        buf.put_slice(&signature);

        buf.freeze()
    }
}
