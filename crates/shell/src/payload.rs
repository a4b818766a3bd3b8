//! Argument and payload parsing
//!
//! Numeric arguments follow C `strtol` conventions: base 0 (`0x` hex,
//! leading `0` octal, decimal otherwise) for counts and values, base 16 for
//! request types and endpoints.
//!
//! Host-to-device payloads come from a file when the argument names a
//! readable, non-empty file, and from a hexadecimal byte literal spread over
//! the remaining arguments otherwise.

use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// A command argument that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {what} \"{value}\"")]
pub struct ArgumentError {
    pub what: &'static str,
    pub value: String,
}

impl ArgumentError {
    pub fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Parse a base-0 argument into any integer type it fits
pub fn int_arg<T: TryFrom<i64>>(what: &'static str, s: &str) -> Result<T, ArgumentError> {
    parse_int(s)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| ArgumentError::new(what, s))
}

/// Parse a hexadecimal argument into any integer type it fits
pub fn hex_arg<T: TryFrom<u32>>(what: &'static str, s: &str) -> Result<T, ArgumentError> {
    parse_hex(s)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| ArgumentError::new(what, s))
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Split off a leading integer in `strtol` base-0 form
///
/// Returns the value and the unparsed remainder, or `None` if `s` does not
/// start with a number.
pub fn split_int_prefix(s: &str) -> Option<(i64, &str)> {
    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_hexdigit()))
    {
        (16, hex)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, &unsigned[1..])
    } else {
        (10, unsigned)
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        // a lone "0" (or "0" followed by a non-octal digit) is still zero
        return if radix == 8 { Some((0, digits)) } else { None };
    }

    let value = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some((if negative { -value } else { value }, &digits[end..]))
}

/// Parse a whole argument as a base-0 integer
pub fn parse_int(s: &str) -> Option<i64> {
    match split_int_prefix(s.trim())? {
        (value, "") => Some(value),
        _ => None,
    }
}

/// Parse a whole argument as hexadecimal, with or without a `0x` prefix
pub fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Parse a hexadecimal byte literal spread over `tokens`
///
/// Each token is filtered down to its hex digits. A token left with an odd
/// number of digits drops its trailing digit; the remaining digits are
/// paired into bytes in order.
pub fn parse_hex_bytes<S: AsRef<str>>(tokens: &[S]) -> Vec<u8> {
    let mut digits: Vec<u8> = Vec::new();
    for token in tokens {
        let start = digits.len();
        digits.extend(
            token
                .as_ref()
                .chars()
                .filter_map(|c| c.to_digit(16))
                .map(|d| d as u8),
        );
        if (digits.len() - start) % 2 == 1 {
            digits.pop();
        }
    }

    digits.chunks_exact(2).map(|pair| (pair[0] << 4) | pair[1]).collect()
}

/// Read a payload file, truncated to `max_size` when given
///
/// Returns `None` when the file cannot be read or is empty.
pub fn read_payload_file(path: &str, max_size: Option<usize>) -> Option<Vec<u8>> {
    let path = expand_path(path);
    let mut data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            debug!("Not reading payload from {}: {}", path.display(), e);
            return None;
        }
    };
    if data.is_empty() {
        return None;
    }
    if let Some(max) = max_size {
        data.truncate(max);
    }
    debug!("Read {} payload byte(s) from {}", data.len(), path.display());
    Some(data)
}

/// Resolve a host-to-device payload from `args`
///
/// `args[0]` is tried as a file path first; failing that, all of `args` are
/// parsed as a hex byte literal. The result is truncated to `max_size`.
pub fn resolve_payload<S: AsRef<str>>(args: &[S], max_size: Option<usize>) -> Vec<u8> {
    let Some(first) = args.first() else {
        return Vec::new();
    };

    if let Some(data) = read_payload_file(first.as_ref(), max_size) {
        return data;
    }

    let mut data = parse_hex_bytes(args);
    if let Some(max) = max_size {
        data.truncate(max);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x2a"), Some(42));
        assert_eq!(parse_int("0X2A"), Some(42));
        assert_eq!(parse_int("052"), Some(42));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("-3"), Some(-3));
        assert_eq!(parse_int("12abc"), None);
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("x"), None);
    }

    #[test]
    fn test_split_int_prefix() {
        assert_eq!(split_int_prefix("7<=10"), Some((7, "<=10")));
        assert_eq!(split_int_prefix("0x10 >"), Some((16, " >")));
        assert_eq!(split_int_prefix("0<"), Some((0, "<")));
        assert_eq!(split_int_prefix("<5"), None);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("81"), Some(0x81));
        assert_eq!(parse_hex("0x81"), Some(0x81));
        assert_eq!(parse_hex("c0"), Some(0xc0));
        assert_eq!(parse_hex("0x"), None);
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn test_typed_arguments() {
        assert_eq!(hex_arg::<u8>("endpoint", "81"), Ok(0x81));
        assert!(hex_arg::<u8>("endpoint", "181").is_err());
        assert_eq!(int_arg::<u16>("value", "0x100"), Ok(0x100));
        assert!(int_arg::<usize>("length", "-1").is_err());
        assert_eq!(
            int_arg::<u8>("request", "zz").unwrap_err().to_string(),
            "Invalid request \"zz\""
        );
    }

    #[test]
    fn test_hex_literal_quoted_sequence() {
        assert_eq!(parse_hex_bytes(&["81 00 51 01"]), vec![0x81, 0x00, 0x51, 0x01]);
    }

    #[test]
    fn test_hex_literal_separate_tokens() {
        assert_eq!(parse_hex_bytes(&["de", "ad", "BEEF"]), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_hex_literal_odd_token_drops_trailing_digit() {
        assert_eq!(parse_hex_bytes(&["abc"]), vec![0xab]);
        assert_eq!(parse_hex_bytes(&["1", "2345"]), vec![0x23, 0x45]);
        assert_eq!(parse_hex_bytes(&["0x12"]), vec![0x01]);
    }

    #[test]
    fn test_hex_literal_ignores_non_hex() {
        assert_eq!(parse_hex_bytes(&["12:34-56"]), vec![0x12, 0x34, 0x56]);
        assert!(parse_hex_bytes(&["xyz"]).is_empty());
    }

    #[test]
    fn test_resolve_payload_prefers_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert_eq!(resolve_payload(&[path.clone()], None), vec![1, 2, 3, 4, 5]);
        assert_eq!(resolve_payload(&[path], Some(2)), vec![1, 2]);
    }

    #[test]
    fn test_resolve_payload_falls_back_to_hex() {
        assert_eq!(
            // the missing path contributes no hex digits of its own
            resolve_payload(&["/zz/qqq", "aa"], None),
            vec![0xaa]
        );
        assert_eq!(resolve_payload(&["0102", "03"], Some(2)), vec![0x01, 0x02]);
    }

    #[test]
    fn test_resolve_payload_empty_file_falls_back() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        // each token pairs on its own, so the last byte comes from "ff"
        let data = resolve_payload(&[path.as_str(), "ff"], None);
        assert_eq!(data.last(), Some(&0xff));
    }
}
