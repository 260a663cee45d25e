use bytes::{Buf, BufMut};

use super::{
    FOOTER_LENGTH, HEADER_LENGTH, READING_LENGTH, Reading, ReportFooter, ReportHeader,
    SIGNATURE_LENGTH, error::ParseError,
};

/// Fixed-size little-endian records of a streamer report
pub trait ReportCodable: Sized {
    const ENCODED_LEN: usize;

    fn encode<B: BufMut>(&self, buf: &mut B);
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, ParseError>;
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<(), ParseError> {
    if buf.remaining() < needed {
        return Err(ParseError::Malformed(format!(
            "{what} needs {needed} bytes, {} available",
            buf.remaining()
        )));
    }
    Ok(())
}

impl ReportCodable for ReportHeader {
    const ENCODED_LEN: usize = HEADER_LENGTH;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.fmt);
        buf.put_u8(self.len_low);
        buf.put_u16_le(self.len_high);
        buf.put_u32_le(self.device_id);
        buf.put_u32_le(self.report_id);
        buf.put_u32_le(self.sent_timestamp);
        buf.put_u8(self.signature_flags);
        buf.put_u8(self.streamer_index);
        buf.put_u16_le(self.streamer_selector);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, ParseError> {
        ensure_remaining(buf, Self::ENCODED_LEN, "header")?;
        Ok(ReportHeader {
            fmt: buf.get_u8(),
            len_low: buf.get_u8(),
            len_high: buf.get_u16_le(),
            device_id: buf.get_u32_le(),
            report_id: buf.get_u32_le(),
            sent_timestamp: buf.get_u32_le(),
            signature_flags: buf.get_u8(),
            streamer_index: buf.get_u8(),
            streamer_selector: buf.get_u16_le(),
        })
    }
}

impl ReportCodable for Reading {
    const ENCODED_LEN: usize = READING_LENGTH;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.stream);
        buf.put_u16_le(self.reserved);
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.value);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, ParseError> {
        ensure_remaining(buf, Self::ENCODED_LEN, "reading")?;
        Ok(Reading {
            stream: buf.get_u16_le(),
            reserved: buf.get_u16_le(),
            id: buf.get_u32_le(),
            timestamp: buf.get_u32_le(),
            value: buf.get_u32_le(),
        })
    }
}

impl ReportCodable for ReportFooter {
    const ENCODED_LEN: usize = FOOTER_LENGTH;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.lowest_id);
        buf.put_u32_le(self.highest_id);
        buf.put_slice(&self.signature);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, ParseError> {
        ensure_remaining(buf, Self::ENCODED_LEN, "footer")?;
        let lowest_id = buf.get_u32_le();
        let highest_id = buf.get_u32_le();
        let mut signature = [0u8; SIGNATURE_LENGTH];
        buf.copy_to_slice(&mut signature);
        Ok(ReportFooter {
            lowest_id,
            highest_id,
            signature,
        })
    }
}
