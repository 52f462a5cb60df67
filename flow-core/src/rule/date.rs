//! Date coercion for rule items.  Formats are written in the
//! `yyyy-MM-dd HH:mm:ss` style used by flow definitions.
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

/// normalized text of a parsed source date
pub const NORMALIZED_DATE: &str = "%Y-%m-%d";

/// Converts a `yyyyMMdd` style pattern to a chrono format string.
pub fn to_chrono_format(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // quoted literal, '' is a single quote
            i += 1;
            if i < chars.len() && chars[i] == '\'' {
                out.push('\'');
                i += 1;
                continue;
            }
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) => Some("%y"),
            ('y', _) => Some("%Y"),
            ('M', 1) => Some("%-m"),
            ('M', 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', 1) => Some("%-d"),
            ('d', _) => Some("%d"),
            ('H', 1) => Some("%-H"),
            ('H', _) => Some("%H"),
            ('h', 1) => Some("%-I"),
            ('h', _) => Some("%I"),
            ('m', _) => Some("%M"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('E', 1..=3) => Some("%a"),
            ('E', _) => Some("%A"),
            _ => None,
        };
        match spec {
            Some(s) => out.push_str(s),
            None => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
            }
        }
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Parses with a date pattern; formats without a time part parse to midnight.
pub fn parse(value: &str, pattern: &str) -> Result<NaiveDateTime, String> {
    let format = to_chrono_format(pattern);
    match NaiveDateTime::parse_from_str(value, &format) {
        Ok(dt) => Ok(dt),
        Err(_) => NaiveDate::parse_from_str(value, &format)
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
            .map_err(|e| format!("Unparseable date: \"{}\" ({})", value, e)),
    }
}

pub fn format(value: &NaiveDateTime, pattern: &str) -> String {
    value.format(&to_chrono_format(pattern)).to_string()
}

/// epoch milliseconds as a utc date time
pub fn from_millis(millis: i64) -> Option<NaiveDateTime> {
    Utc.timestamp_millis_opt(millis).single().map(|d| d.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_patterns() {
        assert_eq!(to_chrono_format("yyyyMMdd"), "%Y%m%d");
        assert_eq!(to_chrono_format("yyyy-MM-dd HH:mm:ss.SSS"), "%Y-%m-%d %H:%M:%S.%3f");
        assert_eq!(to_chrono_format("dd/MM/yy 'at' h a"), "%d/%m/%y at %-I %p");
    }

    #[test]
    fn parse_and_format() {
        let d = parse("20240131", "yyyyMMdd").expect("date only");
        assert_eq!(format(&d, "yyyy-MM-dd HH:mm"), "2024-01-31 00:00");
        let d = parse("2024-01-31 13:45:10", "yyyy-MM-dd HH:mm:ss").expect("date time");
        assert_eq!(format(&d, "HHmmss"), "134510");
        assert!(parse("31-01", "yyyyMMdd").is_err());
    }
}
