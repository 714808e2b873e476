//! Human-readable sizes and durations
//!
//! Sizes accept decimal suffixes (k, M, G, T, P; base 1000) and binary suffixes
//! (Ki, Mi, Gi, Ti, Pi; base 1024), case-insensitive, with an optional `B`/`byte`
//! tail. Durations are sequences of `<number><unit>` pairs such as `"1h 30m"`.
//! Both parsers return `None` on malformed input so callers can fall back to a
//! disabled setting.

use std::time::Duration;

const KB: f64 = 1e3;
const KIB: f64 = 1024.0;

/// Parse a size string into a byte count. Unknown suffixes count as bytes.
pub fn parse_size(input: &str) -> Option<u64> {
    let lowered = input.trim().to_ascii_lowercase();
    let (number, rest) = split_number(&lowered)?;
    let unit = rest.trim_start();
    if !unit.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }

    let multiplier = match unit {
        "k" | "kb" | "kbyte" => KB,
        "m" | "mb" | "mbyte" => KB.powi(2),
        "g" | "gb" | "gbyte" => KB.powi(3),
        "t" | "tb" | "tbyte" => KB.powi(4),
        "p" | "pb" | "pbyte" => KB.powi(5),
        "ki" | "kib" | "kibi" | "kibyte" | "kibibyte" => KIB,
        "mi" | "mib" | "mebi" | "mibyte" | "mebibyte" => KIB.powi(2),
        "gi" | "gib" | "gibi" | "gibyte" | "gibibyte" => KIB.powi(3),
        "ti" | "tib" | "tebi" | "tibyte" | "tebibyte" => KIB.powi(4),
        "pi" | "pib" | "pebi" | "pibyte" | "pebibyte" => KIB.powi(5),
        _ => 1.0,
    };

    let bytes = (number * multiplier).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes as u64)
}

/// Render a byte count with decimal prefixes, e.g. `1.50KB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1000 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64 / KB;
    for unit in UNITS.iter().take(UNITS.len() - 1) {
        if value < KB {
            return format!("{:.2}{}", value, unit);
        }
        value /= KB;
    }
    format!("{:.2}{}", value, UNITS[UNITS.len() - 1])
}

/// Parse a duration string. A bare number is read as milliseconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let lowered = input.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }

    let mut rest = lowered.as_str();
    let mut total_ms = 0.0;

    while !rest.is_empty() {
        let (number, after_number) = split_number(rest)?;
        let after_space = after_number.trim_start();
        let unit_len = after_space
            .find(|c: char| !c.is_ascii_lowercase())
            .unwrap_or(after_space.len());
        let (unit, remainder) = after_space.split_at(unit_len);

        let unit_ms = match unit {
            "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
            "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
            "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
            "d" | "day" | "days" => 86_400_000.0,
            "w" | "wk" | "wks" | "week" | "weeks" => 604_800_000.0,
            "y" | "yr" | "yrs" | "year" | "years" => 31_536_000_000.0,
            _ => return None,
        };

        total_ms += number * unit_ms;
        rest = remainder.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
    }

    if !total_ms.is_finite() || total_ms < 0.0 {
        return None;
    }
    Some(Duration::from_millis(total_ms.round() as u64))
}

/// Split a leading decimal number (`,` accepted as the decimal mark) from the rest
fn split_number(input: &str) -> Option<(f64, &str)> {
    let bytes = input.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'.' || bytes[end] == b',') {
        let mut frac_end = end + 1;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > end + 1 {
            end = frac_end;
        }
    }

    let number = input[..end].replace(',', ".").parse::<f64>().ok()?;
    Some((number, &input[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_decimal_and_binary() {
        assert_eq!(parse_size("2KB"), Some(2000));
        assert_eq!(parse_size("2KiB"), Some(2048));
        assert_eq!(parse_size("1.5 GB"), Some(1_500_000_000));
        assert_eq!(parse_size("3 Mi"), Some(3 * 1024 * 1024));
        assert_eq!(parse_size("1,5k"), Some(1500));
    }

    #[test]
    fn test_parse_size_plain_bytes() {
        assert_eq!(parse_size("1048576"), Some(1_048_576));
        assert_eq!(parse_size("10 bytes"), Some(10));
        assert_eq!(parse_size("0"), Some(0));
    }

    #[test]
    fn test_parse_size_malformed() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("GB"), None);
        assert_eq!(parse_size("-5MB"), None);
        assert_eq!(parse_size("12 M B"), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(999), "999B");
        assert_eq!(format_size(1500), "1.50KB");
        assert_eq!(format_size(2_500_000), "2.50MB");
        assert_eq!(format_size(7_000_000_000_000_000), "7.00PB");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("5 minutes"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h 30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_duration_malformed() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10 fortnights"), None);
    }
}
