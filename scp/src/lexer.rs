//! Tokens of the command language.
//!
//! The same tokens serve the command parser, the splitting of
//! breakpoint and expect actions into commands, and the test bench's
//! program loader.  Some constructs (the text of `ECHO`, an action)
//! are taken verbatim from the input, so each token carries its span.
use std::fmt::{self, Display, Formatter};
use std::ops::Range;

use logos::Logos;

pub type Span = Range<usize>;

/// `KEY=n`, as in `HALTAFTER=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyValue<'a> {
    pub key: &'a str,
    pub value: u32,
}

fn capture_count<'a>(lex: &mut logos::Lexer<'a, Token<'a>>) -> Option<u32> {
    let digits = lex.slice().trim_start_matches('[').trim_end_matches(']');
    digits.trim().parse().ok()
}

fn capture_key_value<'a>(lex: &mut logos::Lexer<'a, Token<'a>>) -> Option<KeyValue<'a>> {
    let (key, value) = lex.slice().split_once('=')?;
    Some(KeyValue {
        key,
        value: value.parse().ok()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Logos)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token<'a> {
    /// A quoted string, quotes included.  Escapes are left for
    /// [`decode_quoted_string`](base::prelude::decode_quoted_string).
    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice())]
    #[regex(r"'([^'\\]|\\.)*'", |lex| lex.slice())]
    Quoted(&'a str),

    /// A repeat count, `[n]`.
    #[regex(r"\[[ \t]*[0-9]+[ \t]*\]", capture_count)]
    Count(u32),

    #[regex(r"[A-Za-z]+=[0-9]+", capture_key_value, priority = 10)]
    KeyValue(KeyValue<'a>),

    /// One or more switch letters, `-RW`.
    #[regex(r"-[A-Za-z]+", |lex| lex.slice(), priority = 10)]
    Switch(&'a str),

    #[token(";")]
    Semicolon,

    #[token(",")]
    Comma,

    /// Anything else, up to white space or punctuation.
    #[regex(r#"[^ \t\r\n\f;,"'\[]+"#, |lex| lex.slice())]
    Word(&'a str),
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Token::Quoted(s) | Token::Switch(s) | Token::Word(s) => f.write_str(s),
            Token::Count(n) => write!(f, "[{n}]"),
            Token::KeyValue(KeyValue { key, value }) => write!(f, "{key}={value}"),
            Token::Semicolon => f.write_str(";"),
            Token::Comma => f.write_str(","),
        }
    }
}

/// A token, or the text which could not be made into one.
pub type Lexeme<'a> = Result<Token<'a>, &'a str>;

/// Split `text` into tokens, each with its position in `text`.
#[must_use]
pub fn tokenize(text: &str) -> Vec<(Lexeme<'_>, Span)> {
    let mut lexer = Token::lexer(text);
    let mut result = Vec::new();
    while let Some(token) = lexer.next() {
        let token = token.map_err(|()| lexer.slice());
        result.push((token, lexer.span()));
    }
    result
}

/// Split an action into its commands.  Semicolons inside quoted
/// strings do not separate commands; after an unterminated quote
/// nothing does.
#[must_use]
pub fn split_commands(action: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut start = 0;
    for (token, span) in tokenize(action) {
        match token {
            Ok(Token::Semicolon) => {
                result.push(&action[start..span.start]);
                start = span.end;
            }
            Err(text) if text.starts_with(['"', '\'']) => break,
            _ => (),
        }
    }
    result.push(&action[start..]);
    result
        .into_iter()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
fn tokens(text: &str) -> Vec<Lexeme<'_>> {
    tokenize(text).into_iter().map(|(token, _)| token).collect()
}

#[test]
fn test_command_tokens() {
    assert_eq!(
        tokens(r#"expect -p tty1 [2] HALTAFTER=100,"a;b" echo x"#),
        vec![
            Ok(Token::Word("expect")),
            Ok(Token::Switch("-p")),
            Ok(Token::Word("tty1")),
            Ok(Token::Count(2)),
            Ok(Token::KeyValue(KeyValue {
                key: "HALTAFTER",
                value: 100
            })),
            Ok(Token::Comma),
            Ok(Token::Quoted("\"a;b\"")),
            Ok(Token::Word("echo")),
            Ok(Token::Word("x")),
        ]
    );
}

#[test]
fn test_address_tokens() {
    assert_eq!(
        tokens("100[3],200-210; 7:7 100/10 -5"),
        vec![
            Ok(Token::Word("100")),
            Ok(Token::Count(3)),
            Ok(Token::Comma),
            Ok(Token::Word("200-210")),
            Ok(Token::Semicolon),
            Ok(Token::Word("7:7")),
            Ok(Token::Word("100/10")),
            Ok(Token::Word("-5")),
        ]
    );
}

#[test]
fn test_quoted_tokens() {
    assert_eq!(
        tokens(r#"'say "hi"' "\"" "x\\""#),
        vec![
            Ok(Token::Quoted(r#"'say "hi"'"#)),
            Ok(Token::Quoted(r#""\"""#)),
            Ok(Token::Quoted(r#""x\\""#)),
        ]
    );
    let lexemes = tokens("send \"open");
    assert_eq!(lexemes[0], Ok(Token::Word("send")));
    assert!(matches!(lexemes[1], Err(text) if text.starts_with('"')));
}

#[test]
fn test_spans() {
    let spanned = tokenize("echo  hi");
    assert_eq!(spanned[1].1, 6..8);
}

#[test]
fn test_split_commands() {
    assert_eq!(
        split_commands(" echo a ;; step 3;"),
        vec!["echo a".to_string(), "step 3".to_string()]
    );
    assert_eq!(
        split_commands(r#"send "a;b"; echo 'x;y'"#),
        vec![r#"send "a;b""#.to_string(), "echo 'x;y'".to_string()]
    );
    assert_eq!(
        split_commands(r#"send "\";"; go"#),
        vec![r#"send "\";""#.to_string(), "go".to_string()]
    );
    assert_eq!(
        split_commands(r#"echo x; send "a; go"#),
        vec!["echo x".to_string(), r#"send "a; go"#.to_string()]
    );
    assert!(split_commands("  ").is_empty());
}
