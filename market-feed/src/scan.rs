//! Zero-allocation field extraction for venue JSON frames.
//!
//! This is not a general JSON parser. Venue messages have a known,
//! shallow shape, so scalar values are pulled straight out of the byte
//! buffer: locate `"key":`, then parse the number or borrow the string
//! in place. Exponent notation is not handled (venues do not use it for
//! prices) and malformed numbers parse to 0.
//!
//! In debug and test builds the [`verify`] module cross-checks extracted
//! values against `serde_json` on the same frame.

/// Fractional divisors for up to 18 fractional digits.
const POWERS_OF_TEN: [f64; 19] = [
    1.0, 1e1, 1e2, 1e3, 1e4, 1e5, 1e6, 1e7, 1e8, 1e9, 1e10, 1e11, 1e12, 1e13, 1e14, 1e15, 1e16,
    1e17, 1e18,
];

#[inline]
fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Locate the first occurrence of `"key":` in `buf` and return the index
/// of the first byte of its value. For string values the index is past
/// the opening quote.
pub fn find_value_after_key(buf: &[u8], key: &str) -> Option<usize> {
    let key = key.as_bytes();
    let klen = key.len();
    let mut i = 0;

    while i + klen + 3 <= buf.len() {
        i += memchr(&buf[i..], b'"')?;

        if i + klen + 1 < buf.len() && &buf[i + 1..i + 1 + klen] == key && buf[i + klen + 1] == b'"'
        {
            let mut v = i + klen + 2;
            while v < buf.len() && (buf[v] == b' ' || buf[v] == b'\t') {
                v += 1;
            }
            if v < buf.len() && buf[v] == b':' {
                v += 1;
                while v < buf.len() && (buf[v] == b' ' || buf[v] == b'\t') {
                    v += 1;
                }
                if v < buf.len() && buf[v] == b'"' {
                    return Some(v + 1);
                }
                return Some(v);
            }
        }

        // Not our key: skip past the closing quote of this string.
        let rest = &buf[i + 1..];
        let close = memchr(rest, b'"')?;
        i += close + 2;
    }
    None
}

/// Parse a decimal number, stopping at the first byte that is neither a
/// digit nor `.`. Malformed input parses to 0.0.
pub fn parse_double(buf: &[u8]) -> f64 {
    let mut p = 0;
    let mut negative = false;
    if p < buf.len() && buf[p] == b'-' {
        negative = true;
        p += 1;
    }

    let mut integer_part: i64 = 0;
    while p < buf.len() && buf[p].is_ascii_digit() {
        integer_part = integer_part
            .wrapping_mul(10)
            .wrapping_add((buf[p] - b'0') as i64);
        p += 1;
    }

    let mut result = integer_part as f64;

    if p < buf.len() && buf[p] == b'.' {
        p += 1;
        let mut fractional_part: i64 = 0;
        let fraction_start = p;
        while p < buf.len() && buf[p].is_ascii_digit() {
            fractional_part = fractional_part
                .wrapping_mul(10)
                .wrapping_add((buf[p] - b'0') as i64);
            p += 1;
        }
        let num_digits = p - fraction_start;
        if num_digits > 0 && num_digits < POWERS_OF_TEN.len() {
            result += fractional_part as f64 / POWERS_OF_TEN[num_digits];
        }
    }

    if negative {
        -result
    } else {
        result
    }
}

/// Parse an optionally signed integer, stopping at the first non-digit.
pub fn parse_int64(buf: &[u8]) -> i64 {
    let mut p = 0;
    let mut negative = false;
    if p < buf.len() && buf[p] == b'-' {
        negative = true;
        p += 1;
    }
    let mut result: i64 = 0;
    while p < buf.len() && buf[p].is_ascii_digit() {
        result = result.wrapping_mul(10).wrapping_add((buf[p] - b'0') as i64);
        p += 1;
    }
    if negative {
        result.wrapping_neg()
    } else {
        result
    }
}

/// Borrow the string value starting at `start` (already past the opening
/// quote), ending at the closing quote. Empty on malformed UTF-8.
pub fn str_value(buf: &[u8], start: usize) -> &str {
    let end = match memchr(&buf[start..], b'"') {
        Some(off) => start + off,
        None => buf.len(),
    };
    std::str::from_utf8(&buf[start..end]).unwrap_or_default()
}

/// Index one past the bracket matching `buf[start]` (`[` or `{`).
pub fn balanced_end(buf: &[u8], start: usize) -> usize {
    let (open, close) = match buf.get(start) {
        Some(b'[') => (b'[', b']'),
        Some(b'{') => (b'{', b'}'),
        _ => return start,
    };

    let mut depth = 0usize;
    let mut p = start;
    while p < buf.len() {
        if buf[p] == open {
            depth += 1;
        } else if buf[p] == close {
            depth -= 1;
            if depth == 0 {
                return p + 1;
            }
        }
        p += 1;
    }
    buf.len()
}

#[inline]
fn read_number(buf: &[u8], p: &mut usize) -> f64 {
    if *p < buf.len() && buf[*p] == b'"' {
        *p += 1;
    }
    let start = *p;
    while *p < buf.len()
        && (buf[*p].is_ascii_digit() || buf[*p] == b'.' || buf[*p] == b'-')
    {
        *p += 1;
    }
    let value = parse_double(&buf[start..*p]);
    if *p < buf.len() && buf[*p] == b'"' {
        *p += 1;
    }
    value
}

/// Parse an array of price levels. Tolerates both `[price, size]` pair
/// arrays (quoted or unquoted numbers) and object arrays carrying
/// `"price"` plus `"size"` or `"qty"` fields.
pub fn parse_price_qty_array(buf: &[u8]) -> Vec<(f64, f64)> {
    let mut result = Vec::new();
    let mut p = 0;

    if p < buf.len() && buf[p] == b'[' {
        p += 1;
    }

    while p < buf.len() && buf[p] != b']' {
        match buf[p] {
            b'[' => {
                p += 1;
                while p < buf.len() && (buf[p] == b' ' || buf[p] == b'\t' || buf[p] == b'\n') {
                    p += 1;
                }
                let price = read_number(buf, &mut p);
                while p < buf.len() && (buf[p] == b',' || buf[p] == b' ' || buf[p] == b'\t') {
                    p += 1;
                }
                let size = read_number(buf, &mut p);
                result.push((price, size));
                while p < buf.len() && buf[p] != b']' {
                    p += 1;
                }
                if p < buf.len() {
                    p += 1;
                }
            }
            b'{' => {
                let end = balanced_end(buf, p);
                let obj = &buf[p..end];
                let price = find_value_after_key(obj, "price")
                    .map(|v| parse_double(&obj[v..]))
                    .unwrap_or(0.0);
                let size = find_value_after_key(obj, "size")
                    .or_else(|| find_value_after_key(obj, "qty"))
                    .map(|v| parse_double(&obj[v..]))
                    .unwrap_or(0.0);
                result.push((price, size));
                p = end;
            }
            _ => p += 1,
        }
    }

    result
}

/// Days since 1970-01-01 for a proleptic Gregorian civil date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Convert `YYYY-MM-DDTHH:MM:SS[.fff...]` to Unix nanoseconds. The
/// timestamp is always interpreted as UTC; a trailing `Z` or offset is
/// ignored. Too-short input parses to 0.
pub fn parse_iso8601_to_ns(buf: &[u8]) -> i64 {
    if buf.len() < 19 {
        return 0;
    }

    let year = parse_int64(&buf[0..4]);
    let month = parse_int64(&buf[5..7]);
    let day = parse_int64(&buf[8..10]);
    let hour = parse_int64(&buf[11..13]);
    let minute = parse_int64(&buf[14..16]);
    let second = parse_int64(&buf[17..19]);

    let mut nanos: i64 = 0;
    if buf.len() > 19 && buf[19] == b'.' {
        let mut p = 20;
        let mut digits = 0;
        while p < buf.len() && buf[p].is_ascii_digit() && digits < 9 {
            nanos = nanos * 10 + (buf[p] - b'0') as i64;
            p += 1;
            digits += 1;
        }
        for _ in digits..9 {
            nanos *= 10;
        }
    }

    let days = days_from_civil(year, month, day);
    (days * 86_400 + hour * 3_600 + minute * 60 + second) * 1_000_000_000 + nanos
}

/// Cross-checks against a general JSON parser. Only invoked from debug
/// assertions and tests; release builds compile the calls away. A key
/// that `serde_json` cannot find counts as a match so scanner-only
/// shortcuts (e.g. nested payloads) do not trip the assertions.
pub mod verify {
    use serde_json::Value;

    fn find<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        match value {
            Value::Object(map) => {
                if let Some(v) = map.get(key) {
                    return Some(v);
                }
                map.values().find_map(|v| find(v, key))
            }
            Value::Array(items) => items.iter().find_map(|v| find(v, key)),
            _ => None,
        }
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn f64_matches(frame: &str, key: &str, got: f64) -> bool {
        let Ok(root) = serde_json::from_str::<Value>(frame) else {
            return true;
        };
        let Some(expected) = find(&root, key).and_then(as_f64) else {
            return true;
        };
        let tolerance = expected.abs().max(1.0) * 1e-12;
        (expected - got).abs() <= tolerance
    }

    pub fn str_matches(frame: &str, key: &str, got: &str) -> bool {
        let Ok(root) = serde_json::from_str::<Value>(frame) else {
            return true;
        };
        match find(&root, key).and_then(Value::as_str) {
            Some(expected) => expected == got,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_value_after_key() {
        let buf = br#"{"stream":"btcusdt@trade","data":{"e":"trade","p":"65000.10"}}"#;
        let e = find_value_after_key(buf, "e").unwrap();
        assert_eq!(str_value(buf, e), "trade");

        let p = find_value_after_key(buf, "p").unwrap();
        assert_eq!(parse_double(&buf[p..]), 65000.10);

        assert!(find_value_after_key(buf, "missing").is_none());
    }

    #[test]
    fn test_find_value_skips_whitespace() {
        let buf = br#"{"price" :  "42.5", "qty":3}"#;
        let v = find_value_after_key(buf, "price").unwrap();
        assert_eq!(parse_double(&buf[v..]), 42.5);
        let q = find_value_after_key(buf, "qty").unwrap();
        assert_eq!(parse_int64(&buf[q..]), 3);
    }

    #[test]
    fn test_parse_double_basic() {
        assert_eq!(parse_double(b"65000.10"), 65000.10);
        assert_eq!(parse_double(b"-3.25"), -3.25);
        assert_eq!(parse_double(b"100"), 100.0);
        assert_eq!(parse_double(b"0.00000001"), 0.00000001);
        // Stops at the first non-numeric byte.
        assert_eq!(parse_double(b"12.5\",\"q\""), 12.5);
    }

    #[test]
    fn test_parse_double_malformed_is_zero() {
        assert_eq!(parse_double(b""), 0.0);
        assert_eq!(parse_double(b"abc"), 0.0);
        assert_eq!(parse_double(b"-"), 0.0);
    }

    #[test]
    fn test_parse_double_round_trip_15_digits() {
        for &x in &[
            0.1f64,
            123456789.012345,
            98765.4321,
            0.000123456,
            423867.120001,
            1.0,
            65000.10,
        ] {
            let formatted = format!("{}", x);
            let parsed = parse_double(formatted.as_bytes());
            let ulp = 2.0 * f64::EPSILON * x.abs();
            assert!(
                (parsed - x).abs() <= ulp,
                "{} parsed as {}",
                formatted,
                parsed
            );
        }
    }

    #[test]
    fn test_parse_int64_round_trip() {
        for &n in &[0i64, 1, -1, 42, -9_999, i64::MAX, i64::MIN, 1_700_000_000_000] {
            let formatted = format!("{}", n);
            assert_eq!(parse_int64(formatted.as_bytes()), n, "{}", formatted);
        }
    }

    #[test]
    fn test_parse_price_qty_pairs_quoted_and_bare() {
        let quoted = br#"[["100.0","1.0"],["99.0","0"]]"#;
        assert_eq!(
            parse_price_qty_array(quoted),
            vec![(100.0, 1.0), (99.0, 0.0)]
        );

        let bare = br#"[[101.5, 2.25]]"#;
        assert_eq!(parse_price_qty_array(bare), vec![(101.5, 2.25)]);
    }

    #[test]
    fn test_parse_price_qty_objects() {
        let objs = br#"[{"price": 45283.5, "qty": 0.1}, {"price": "45284.0", "size": "2"}]"#;
        assert_eq!(
            parse_price_qty_array(objs),
            vec![(45283.5, 0.1), (45284.0, 2.0)]
        );
    }

    #[test]
    fn test_balanced_end_nested() {
        let buf = br#"[[1,2],[3,[4]]] trailing"#;
        assert_eq!(balanced_end(buf, 0), 15);
    }

    #[test]
    fn test_iso8601_epoch() {
        assert_eq!(parse_iso8601_to_ns(b"1970-01-01T00:00:00Z"), 0);
    }

    #[test]
    fn test_iso8601_known_instants() {
        // 2021-01-01T00:00:00Z
        assert_eq!(
            parse_iso8601_to_ns(b"2021-01-01T00:00:00Z"),
            1_609_459_200_000_000_000
        );
        // Fractional seconds pad to nanoseconds.
        assert_eq!(
            parse_iso8601_to_ns(b"1970-01-01T00:00:01.5Z"),
            1_500_000_000
        );
        assert_eq!(
            parse_iso8601_to_ns(b"1970-01-01T00:00:00.000000001Z"),
            1
        );
    }

    #[test]
    fn test_iso8601_too_short_is_zero() {
        assert_eq!(parse_iso8601_to_ns(b"2021-01-01"), 0);
    }

    #[test]
    fn test_verify_cross_check() {
        let frame = r#"{"data":{"p":"65000.10","s":"BTCUSDT"}}"#;
        let buf = frame.as_bytes();
        let p = find_value_after_key(buf, "p").unwrap();
        let price = parse_double(&buf[p..]);
        assert!(verify::f64_matches(frame, "p", price));
        assert!(!verify::f64_matches(frame, "p", price + 1.0));

        let s = find_value_after_key(buf, "s").unwrap();
        assert!(verify::str_matches(frame, "s", str_value(buf, s)));
    }
}
