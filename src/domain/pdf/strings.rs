//! PDF text string and date codecs.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Decode a PDF text string. Strings starting with a UTF-16 BOM
/// (`FEFF` big endian, `FFFE` little endian) are decoded accordingly;
/// everything else is treated as a byte string.
pub fn decode_pdf_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xfe && bytes[1] == 0xff {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xfe {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Render an `/M`-style PDF date: `D:YYYYMMDDHHmmSS` followed by `Z` for
/// UTC or `±HH'mm'` otherwise.
pub fn format_pdf_date(date: OffsetDateTime) -> String {
    let offset = date.offset();
    let suffix = if offset.is_utc() {
        "Z".to_string()
    } else {
        let total = offset.whole_minutes();
        let sign = if total < 0 { '-' } else { '+' };
        let minutes = total.abs();
        format!("{sign}{:02}'{:02}'", minutes / 60, minutes % 60)
    };
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}{suffix}",
        date.year(),
        date.month() as u8,
        date.day(),
        date.hour(),
        date.minute(),
        date.second()
    )
}

/// Parse a PDF date string. Trailing components are optional in PDF date
/// syntax; missing fields default to their minimum.
pub fn parse_pdf_date(text: &str) -> Option<OffsetDateTime> {
    let body = text.strip_prefix("D:").unwrap_or(text);

    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        body.get(range).and_then(|s| s.parse().ok())
    };

    let year = digits(0..4)? as i32;
    let month = digits(4..6).unwrap_or(1).clamp(1, 12) as u8;
    let day = digits(6..8).unwrap_or(1).clamp(1, 31) as u8;
    let hour = digits(8..10).unwrap_or(0).min(23) as u8;
    let minute = digits(10..12).unwrap_or(0).min(59) as u8;
    let second = digits(12..14).unwrap_or(0).min(59) as u8;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let datetime = PrimitiveDateTime::new(date, Time::from_hms(hour, minute, second).ok()?);

    let offset = match body.get(14..15) {
        Some("Z") | None | Some("") => UtcOffset::UTC,
        Some(sign @ ("+" | "-")) => {
            let hours: i8 = body.get(15..17)?.parse().ok()?;
            let minutes: i8 = body
                .get(18..20)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let (hours, minutes) = if sign == "-" {
                (-hours, -minutes)
            } else {
                (hours, minutes)
            };
            UtcOffset::from_hms(hours, minutes, 0).ok()?
        }
        _ => UtcOffset::UTC,
    };

    Some(datetime.assume_offset(offset))
}
