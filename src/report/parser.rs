use tracing::{debug, warn};

use super::{
    DEFAULT_MAX_REPORT_LENGTH, FOOTER_LENGTH, HEADER_LENGTH, Integrity, ParsedReport,
    READING_LENGTH, REPORT_FORMAT, Reading, ReportFooter, ReportHeader, codec::ReportCodable,
    digest, error::ParseError,
};

/// Decodes raw streamer report buffers.
///
/// Parsing is all-or-nothing: a buffer either yields a complete
/// [`ParsedReport`] or a [`ParseError`]. A digest mismatch is not an
/// error, it is reported through [`ParsedReport::integrity`].
#[derive(Debug, Clone)]
pub struct ReportParser {
    max_length: usize,
}

impl Default for ReportParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPORT_LENGTH)
    }
}

pub fn parse(buf: &[u8]) -> Result<ParsedReport, ParseError> {
    ReportParser::default().parse(buf)
}

impl ReportParser {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn parse(&self, buf: &[u8]) -> Result<ParsedReport, ParseError> {
        let header = Self::parse_header(buf)?;
        let expected_count = header.expected_reading_count()?;
        debug!(
            "device_id={}, report_id={}, length={}, expected_count={expected_count}",
            header.device_id,
            header.report_id,
            header.length()
        );

        let footer = Self::parse_footer(buf, &header)?;
        debug!("footer lowest_id={}, highest_id={}", footer.lowest_id, footer.highest_id);

        let readings = Self::parse_readings(buf, expected_count)?;
        let integrity = Self::check_integrity(buf, &header);

        let chopped = ParsedReport::is_chopped(header.length(), self.max_length);
        if chopped {
            warn!(
                "report {} of device {:#x} was likely chopped off (length {}, limit {})",
                header.report_id,
                header.device_id,
                header.length(),
                self.max_length
            );
        }

        Ok(ParsedReport {
            header,
            footer,
            readings,
            integrity,
            chopped,
        })
    }

    pub fn parse_header(buf: &[u8]) -> Result<ReportHeader, ParseError> {
        let header = ReportHeader::decode(&mut &buf[..])?;
        if header.fmt != REPORT_FORMAT {
            return Err(ParseError::UnsupportedFormat(header.fmt));
        }
        Ok(header)
    }

    /// Reads the footer from the end of the buffer and rejects any bytes
    /// past the declared report length.
    pub fn parse_footer(buf: &[u8], header: &ReportHeader) -> Result<ReportFooter, ParseError> {
        if buf.len() < HEADER_LENGTH + FOOTER_LENGTH {
            return Err(ParseError::Malformed(format!(
                "buffer of {} bytes cannot hold header and footer",
                buf.len()
            )));
        }

        let declared = header.length();
        if buf.len() > declared {
            return Err(ParseError::TrailingData {
                declared,
                actual: buf.len(),
                extra: buf.len() - declared,
            });
        }

        ReportFooter::decode(&mut &buf[buf.len() - FOOTER_LENGTH..])
    }

    pub fn parse_readings(buf: &[u8], expected_count: usize) -> Result<Vec<Reading>, ParseError> {
        let available = buf
            .len()
            .saturating_sub(HEADER_LENGTH + FOOTER_LENGTH)
            / READING_LENGTH;
        if available < expected_count {
            return Err(ParseError::CountMismatch {
                expected: expected_count,
                found: available,
            });
        }

        let mut cursor = &buf[HEADER_LENGTH..HEADER_LENGTH + expected_count * READING_LENGTH];
        let mut readings = Vec::with_capacity(expected_count);
        for _ in 0..expected_count {
            readings.push(Reading::decode(&mut cursor)?);
        }
        Ok(readings)
    }

    pub fn check_integrity(buf: &[u8], header: &ReportHeader) -> Integrity {
        if header.signature_flags != 0 {
            warn!(
                "report {} uses signature flags {:#04x}, digest not checked",
                header.report_id, header.signature_flags
            );
            return Integrity::Unverified {
                signature_flags: header.signature_flags,
            };
        }

        if digest::verify(buf) {
            Integrity::Verified
        } else {
            warn!(
                "report {} of device {:#x} failed its digest check",
                header.report_id, header.device_id
            );
            Integrity::Mismatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::builder::ReportBuilder;

    fn scenario_report() -> Vec<u8> {
        let mut builder = ReportBuilder::new(0xa, 1).sent_timestamp(1000);
        for k in 0..3 {
            builder = builder.reading(0x5001, 10 + k, 100 + k * 10, k);
        }
        builder.build().to_vec()
    }

    #[test]
    fn test_parse_scenario() {
        let buf = scenario_report();
        assert_eq!(buf.len(), 92);

        let report = parse(&buf).unwrap();
        assert_eq!(report.header.fmt, 1);
        assert_eq!(report.header.length(), 92);
        assert_eq!(report.header.device_id, 0xa);
        assert_eq!(report.header.report_id, 1);
        assert_eq!(report.expected_count(), 3);
        assert_eq!(report.footer.lowest_id, 10);
        assert_eq!(report.footer.highest_id, 12);
        assert_eq!(report.integrity, Integrity::Verified);
        assert!(!report.chopped);

        let ids: Vec<_> = report.readings.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_unsupported_format() {
        let mut buf = scenario_report();
        buf[0] = 2;
        assert_eq!(parse(&buf), Err(ParseError::UnsupportedFormat(2)));
    }

    #[test]
    fn test_trailing_data() {
        let mut buf = scenario_report();
        buf.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            parse(&buf),
            Err(ParseError::TrailingData { extra: 4, .. })
        ));
    }

    #[test]
    fn test_count_mismatch() {
        let buf = scenario_report();
        // drop one reading but keep the footer
        let mut short = buf[..HEADER_LENGTH + 2 * READING_LENGTH].to_vec();
        short.extend_from_slice(&buf[buf.len() - FOOTER_LENGTH..]);
        assert_eq!(
            parse(&short),
            Err(ParseError::CountMismatch {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_malformed_length() {
        let mut buf = scenario_report();
        // 93 is not header + n readings + footer
        buf[1] = 93;
        assert!(matches!(parse(&buf), Err(ParseError::Malformed(_))));

        buf[1] = 30;
        assert!(matches!(parse(&buf), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_digest_mismatch_still_parses() {
        let mut buf = scenario_report();
        buf[HEADER_LENGTH + 12] ^= 0xff;
        let report = parse(&buf).unwrap();
        assert_eq!(report.integrity, Integrity::Mismatch);
    }

    #[test]
    fn test_signature_flags_skip_digest() {
        let mut buf = scenario_report();
        buf[16] = 1;
        let report = parse(&buf).unwrap();
        assert_eq!(
            report.integrity,
            Integrity::Unverified { signature_flags: 1 }
        );
    }

    #[test]
    fn test_chopped() {
        assert!(ParsedReport::is_chopped(196_600, 196_608));
        assert!(!ParsedReport::is_chopped(196_608, 196_608));
        assert!(!ParsedReport::is_chopped(196_592, 196_608));
    }
}
