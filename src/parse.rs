//! Positional token parsing for the line-oriented command protocol.
//!
//! A command line is a sequence of delimiter-separated tokens; handlers pull
//! arguments out by position. Numeric parsing accepts the usual
//! radix-prefixed forms (`0x…` hex, `0b…` binary, plain decimal) when the
//! base argument is 0.

use crate::Error;
use crate::buffer::token;

/// The `index`-th token as a `&str`, or a parse error naming the position.
pub fn parse_string(data: &[u8], index: usize, delim: u8) -> Result<&str, Error> {
    let tok = token(data, index, delim).ok_or(Error::Parse("missing argument"))?;
    core::str::from_utf8(tok).map_err(|_| Error::Parse("argument not valid UTF-8"))
}

/// Parse the `index`-th token as an unsigned integer.
pub fn parse_uint(data: &[u8], index: usize, base: u32, delim: u8) -> Result<u32, Error> {
    let tok = parse_string(data, index, delim)?;
    uint_from_str(tok, base)
}

/// Parse the `index`-th token as a signed integer.
pub fn parse_int(data: &[u8], index: usize, base: u32, delim: u8) -> Result<i32, Error> {
    let tok = parse_string(data, index, delim)?;
    if let Some(rest) = tok.strip_prefix('-') {
        let magnitude = uint_from_str(rest, base)?;
        if magnitude > (i32::MAX as u32) + 1 {
            return Err(Error::Parse("integer out of range"));
        }
        Ok((magnitude as i64).wrapping_neg() as i32)
    } else {
        let magnitude = uint_from_str(tok, base)?;
        if magnitude > i32::MAX as u32 {
            return Err(Error::Parse("integer out of range"));
        }
        Ok(magnitude as i32)
    }
}

/// Parse the `index`-th token as a float (plain decimal notation).
pub fn parse_float(data: &[u8], index: usize, delim: u8) -> Result<f32, Error> {
    let tok = parse_string(data, index, delim)?;
    tok.parse::<f32>().map_err(|_| Error::Parse("invalid float"))
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = s.split('.');
    for octet in &mut out {
        *octet = parts.next()?.parse().ok()?;
    }
    parts.next().is_none().then_some(out)
}

fn uint_from_str(s: &str, base: u32) -> Result<u32, Error> {
    if s.is_empty() {
        return Err(Error::Parse("empty number"));
    }

    let (digits, radix) = match base {
        0 => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                (hex, 16)
            } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
                (bin, 2)
            } else {
                (s, 10)
            }
        }
        b @ (2 | 8 | 10 | 16) => (s, b),
        _ => return Err(Error::Parse("unsupported radix")),
    };

    u32::from_str_radix(digits, radix).map_err(|_| Error::Parse("invalid number"))
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_by_position() {
        let line = b"io-write 2 14 1";
        assert_eq!(parse_string(line, 0, b' ').unwrap(), "io-write");
        assert_eq!(parse_string(line, 2, b' ').unwrap(), "14");
        assert!(parse_string(line, 4, b' ').is_err());
    }

    #[test]
    fn uint_radix_forms() {
        let line = b"x 10 0x10 0b101";
        assert_eq!(parse_uint(line, 1, 0, b' ').unwrap(), 10);
        assert_eq!(parse_uint(line, 2, 0, b' ').unwrap(), 16);
        assert_eq!(parse_uint(line, 3, 0, b' ').unwrap(), 5);
    }

    #[test]
    fn uint_explicit_base() {
        let line = b"x ff";
        assert_eq!(parse_uint(line, 1, 16, b' ').unwrap(), 255);
        assert!(parse_uint(line, 1, 10, b' ').is_err());
    }

    #[test]
    fn int_negative() {
        let line = b"x -1 -2147483648";
        assert_eq!(parse_int(line, 1, 0, b' ').unwrap(), -1);
        assert_eq!(parse_int(line, 2, 0, b' ').unwrap(), i32::MIN);
        assert!(parse_int(b"x 2147483648", 1, 0, b' ').is_err());
    }

    #[test]
    fn float_plain() {
        let line = b"x 3.5 -0.25";
        assert!((parse_float(line, 1, b' ').unwrap() - 3.5).abs() < f32::EPSILON);
        assert!((parse_float(line, 2, b' ').unwrap() + 0.25).abs() < f32::EPSILON);
        assert!(parse_float(b"x abc", 1, b' ').is_err());
    }

    #[test]
    fn ipv4_forms() {
        assert_eq!(parse_ipv4("10.0.0.1"), Some([10, 0, 0, 1]));
        assert_eq!(parse_ipv4("239.255.255.254"), Some([239, 255, 255, 254]));
        assert_eq!(parse_ipv4("10.0.0"), None);
        assert_eq!(parse_ipv4("10.0.0.1.2"), None);
        assert_eq!(parse_ipv4("10.0.0.256"), None);
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_uint(b"x 12z4", 1, 0, b' ').is_err());
        assert!(parse_uint(b"x", 1, 0, b' ').is_err());
    }
}
