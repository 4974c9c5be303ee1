//! Quoted strings.
//!
//! Expect patterns and send data are written on the command line as
//! quoted strings with C-like escapes, for example `"login:\r\n"` or
//! `'say "hi"'`.  [`decode_quoted_string`] turns such a literal into
//! raw bytes and [`encode_quoted_string`] produces a literal which
//! decodes back to exactly the same bytes.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotedStringError {
    /// The text does not start and end with the same quote character.
    NotQuoted,
    /// An unescaped quote character (of the delimiting kind) appeared
    /// inside the string.
    EmbeddedQuote { offset: usize },
    /// A backslash was followed by something we don't understand.
    InvalidEscape { offset: usize },
}

impl Display for QuotedStringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QuotedStringError::NotQuoted => f.write_str("string must be quote delimited"),
            QuotedStringError::EmbeddedQuote { offset } => {
                write!(f, "unescaped quote at offset {offset}")
            }
            QuotedStringError::InvalidEscape { offset } => {
                write!(f, "invalid escape sequence at offset {offset}")
            }
        }
    }
}

impl Error for QuotedStringError {}

fn is_quote(b: u8) -> bool {
    b == b'"' || b == b'\''
}

/// Decode a quoted string literal.
///
/// The literal must begin and end with the same quote character,
/// either `"` or `'`.  The recognised escapes are `\r`, `\n`, `\f`,
/// `\t`, `\v`, `\b`, `\e` (escape), `\\`, `\'`, `\"`, `\?`, up to
/// three octal digits (`\0` .. `\377`) and `\x` followed by up to two
/// hex digits.
pub fn decode_quoted_string(literal: &str) -> Result<Vec<u8>, QuotedStringError> {
    let input = literal.as_bytes();
    let quote = match input {
        [first, .., last] if is_quote(*first) && first == last => *first,
        _ => return Err(QuotedStringError::NotQuoted),
    };
    let body = &input[1..input.len() - 1];
    let mut result = Vec::with_capacity(body.len());
    let mut pos = 0;
    while pos < body.len() {
        let b = body[pos];
        if b != b'\\' {
            if b == quote {
                return Err(QuotedStringError::EmbeddedQuote { offset: pos + 1 });
            }
            result.push(b);
            pos += 1;
            continue;
        }
        let escape_offset = pos + 1;
        pos += 1;
        let Some(&code) = body.get(pos) else {
            // A trailing backslash escapes the closing quote.
            return Err(QuotedStringError::InvalidEscape {
                offset: escape_offset,
            });
        };
        pos += 1;
        let decoded: u8 = match code {
            b'r' => b'\r',
            b'n' => b'\n',
            b'f' => 0x0c,
            b't' => b'\t',
            b'v' => 0x0b,
            b'b' => 0x08,
            b'e' => 0x1b,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'?' => b'?',
            b'0'..=b'7' => {
                let mut value: u8 = code - b'0';
                for _ in 0..2 {
                    match body.get(pos) {
                        Some(d @ b'0'..=b'7') => {
                            value = value.wrapping_shl(3).wrapping_add(d - b'0');
                            pos += 1;
                        }
                        _ => break,
                    }
                }
                value
            }
            b'x' => {
                let mut value: u8 = 0;
                for _ in 0..2 {
                    match body.get(pos).and_then(|d| (*d as char).to_digit(16)) {
                        Some(digit) => {
                            value = (value << 4) | digit as u8;
                            pos += 1;
                        }
                        None => break,
                    }
                }
                value
            }
            _ => {
                return Err(QuotedStringError::InvalidEscape {
                    offset: escape_offset,
                });
            }
        };
        result.push(decoded);
    }
    Ok(result)
}

fn is_printable(b: u8) -> bool {
    b == b' ' || b.is_ascii_graphic()
}

/// Encode `data` as a quoted string literal which
/// [`decode_quoted_string`] maps back to `data`.
///
/// Double quotes delimit the result unless `data` contains a double
/// quote but no single quote, in which case single quotes are used
/// so that no escaping is needed.
#[must_use]
pub fn encode_quoted_string(data: &[u8]) -> String {
    let has_double = data.contains(&b'"');
    let has_single = data.contains(&b'\'');
    let quote = if has_double && !has_single { '\'' } else { '"' };
    let mut result = String::with_capacity(data.len() * 4 + 2);
    result.push(quote);
    for &b in data {
        match b {
            b'\r' => result.push_str("\\r"),
            b'\n' => result.push_str("\\n"),
            0x0c => result.push_str("\\f"),
            b'\t' => result.push_str("\\t"),
            0x0b => result.push_str("\\v"),
            0x08 => result.push_str("\\b"),
            b'\\' => result.push_str("\\\\"),
            b'"' | b'\'' if b as char == quote => {
                result.push('\\');
                result.push(b as char);
            }
            b if is_printable(b) => result.push(b as char),
            b => result.push_str(&format!("\\{b:03o}")),
        }
    }
    result.push(quote);
    result
}

#[test]
fn test_decode_simple() {
    assert_eq!(decode_quoted_string("\"abc\""), Ok(b"abc".to_vec()));
    assert_eq!(decode_quoted_string("'abc'"), Ok(b"abc".to_vec()));
    assert_eq!(decode_quoted_string("\"\""), Ok(Vec::new()));
}

#[test]
fn test_decode_escapes() {
    assert_eq!(
        decode_quoted_string(r#""a\r\nb\t\\\e\?""#),
        Ok(b"a\r\nb\t\\\x1b?".to_vec())
    );
    assert_eq!(decode_quoted_string(r#""\101\0\7""#), Ok(vec![b'A', 0, 7]));
    assert_eq!(decode_quoted_string(r#""\1012""#), Ok(b"A2".to_vec()));
    assert_eq!(decode_quoted_string(r#""\x41\xfg""#), Ok(b"A\x0fg".to_vec()));
    assert_eq!(decode_quoted_string(r#"'it\'s'"#), Ok(b"it's".to_vec()));
    assert_eq!(decode_quoted_string(r#"'say "hi"'"#), Ok(b"say \"hi\"".to_vec()));
}

#[test]
fn test_decode_rejects() {
    assert_eq!(decode_quoted_string(""), Err(QuotedStringError::NotQuoted));
    assert_eq!(decode_quoted_string("\""), Err(QuotedStringError::NotQuoted));
    assert_eq!(decode_quoted_string("abc"), Err(QuotedStringError::NotQuoted));
    assert_eq!(
        decode_quoted_string("\"abc'"),
        Err(QuotedStringError::NotQuoted)
    );
    assert_eq!(
        decode_quoted_string("\"a\"b\""),
        Err(QuotedStringError::EmbeddedQuote { offset: 2 })
    );
    assert_eq!(
        decode_quoted_string(r#""\q""#),
        Err(QuotedStringError::InvalidEscape { offset: 1 })
    );
    assert_eq!(
        decode_quoted_string(r#""abc\""#),
        Err(QuotedStringError::InvalidEscape { offset: 4 })
    );
}

#[test]
fn test_encode_picks_quote() {
    assert_eq!(encode_quoted_string(b"plain"), "\"plain\"");
    assert_eq!(encode_quoted_string(b"say \"hi\""), "'say \"hi\"'");
    assert_eq!(encode_quoted_string(b"it's \"x\""), r#""it's \"x\"""#);
    assert_eq!(encode_quoted_string(b"\r\n\x01\xff"), r#""\r\n\001\377""#);
}

#[cfg(test)]
mod round_trip {
    use super::{decode_quoted_string, encode_quoted_string};
    use test_strategy::proptest;

    #[proptest]
    fn every_byte_string_survives_encoding(data: Vec<u8>) {
        let encoded = encode_quoted_string(&data);
        assert_eq!(decode_quoted_string(&encoded), Ok(data));
    }

    #[test]
    fn all_single_bytes() {
        for b in 0..=u8::MAX {
            let encoded = encode_quoted_string(&[b]);
            assert_eq!(decode_quoted_string(&encoded), Ok(vec![b]), "{encoded}");
        }
    }
}
