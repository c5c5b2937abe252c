use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::schema::CellValue;

/// Coerce a worksheet cell into an amount.
///
/// Text cells keep only digits, `.` and `-`, then the longest leading decimal
/// literal is read. Anything unreadable becomes 0.
pub fn parse_numeric_value(value: &CellValue) -> f64 {
    match value {
        CellValue::Number(n) if n.is_nan() => 0.0,
        CellValue::Number(n) => *n,
        CellValue::Text(s) => {
            let stripped: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            leading_decimal(&stripped).unwrap_or(0.0)
        }
        CellValue::Empty => 0.0,
    }
}

fn leading_decimal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;

    if bytes.first() == Some(&b'-') {
        end = 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if frac_end > frac_start || digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    let literal = s[..end].trim_end_matches('.');
    literal.parse::<f64>().ok()
}

/// Extract a calendar year from `"2024"`, `"2024-12-31"` or an RFC 3339 timestamp.
pub fn extract_year(value: &str) -> Option<i32> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse().ok();
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.year());
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.year());
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.year())
}

/// Decode a base64 file payload, accepting an optional `data:...;base64,` prefix.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    let content = payload
        .rsplit_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(payload);
    Ok(BASE64.decode(content.trim())?)
}

/// Deserialize `null` the same way as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(parse_numeric_value(&text("RM1,234.50")), 1234.50);
        assert_eq!(parse_numeric_value(&text("")), 0.0);
        assert_eq!(parse_numeric_value(&text("-50")), -50.0);
        assert_eq!(parse_numeric_value(&text("n/a")), 0.0);
        assert_eq!(parse_numeric_value(&text("  12 345 ")), 12345.0);
        assert_eq!(parse_numeric_value(&CellValue::Number(99.5)), 99.5);
        assert_eq!(parse_numeric_value(&CellValue::Empty), 0.0);
    }

    #[test]
    fn test_numeric_coercion_reads_leading_literal() {
        assert_eq!(parse_numeric_value(&text("1.2.3")), 1.2);
        assert_eq!(parse_numeric_value(&text("12-5")), 12.0);
        assert_eq!(parse_numeric_value(&text(".5")), 0.5);
        assert_eq!(parse_numeric_value(&text("7.")), 7.0);
        assert_eq!(parse_numeric_value(&text("-")), 0.0);
        assert_eq!(parse_numeric_value(&text("--5")), 0.0);
        assert_eq!(parse_numeric_value(&text(".")), 0.0);
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year("2024"), Some(2024));
        assert_eq!(extract_year("2023-12-31"), Some(2023));
        assert_eq!(extract_year("2022-06-30T00:00:00Z"), Some(2022));
        assert_eq!(extract_year("2022-06-30T10:11:12.000"), Some(2022));
        assert_eq!(extract_year("last year"), None);
        assert_eq!(extract_year(""), None);
    }

    #[test]
    fn test_decode_base64_payload() {
        let plain = decode_base64_payload("aGVsbG8=").unwrap();
        assert_eq!(plain, b"hello");

        let prefixed = decode_base64_payload(
            "data:application/vnd.openxmlformats-officedocument.spreadsheetml.sheet;base64,aGVsbG8=",
        )
        .unwrap();
        assert_eq!(prefixed, b"hello");

        assert!(decode_base64_payload("not base64 !!").is_err());
    }
}
