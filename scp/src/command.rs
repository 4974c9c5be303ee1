//! The command language.
//!
//! [`parse_command`] turns one line of input (typed, read from a DO
//! file or taken from a pending action) into a [`Command`].  Command
//! keywords are case-insensitive and may be abbreviated, but not
//! below a minimum length (so `BR` is `BREAK` but `B` is nothing).
//! Addresses are octal; counts and delays are decimal.
use base::prelude::*;

use super::breakpoint::BreakTypes;
use super::lexer::{tokenize, Lexeme, Span, Token};
use super::status::ScpError;

/// The addresses named by one item of an address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressRange {
    All,
    /// Inclusive.
    Range { low: Address, high: Address },
}

impl AddressRange {
    #[must_use]
    pub fn single(addr: Address) -> AddressRange {
        AddressRange::Range {
            low: addr,
            high: addr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakTarget {
    pub range: AddressRange,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Until {
    Address(Address),
    /// A quoted string to wait for on the console.
    Output(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowWhat {
    /// An empty list means all breakpoints.
    Break(Vec<BreakTarget>),
    Expect {
        line: Option<String>,
        pattern: Option<String>,
    },
    Send {
        line: Option<String>,
    },
    Queue,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A blank line or a comment.
    Blank,
    /// An empty target list means the current program counter.
    Break {
        types: BreakTypes,
        targets: Vec<BreakTarget>,
        action: Option<String>,
    },
    NoBreak {
        types: BreakTypes,
        targets: Vec<BreakTarget>,
    },
    Expect {
        switches: Switches,
        line: Option<String>,
        count: u32,
        halt_after: u32,
        pattern: String,
        action: Option<String>,
    },
    NoExpect {
        line: Option<String>,
        pattern: Option<String>,
    },
    Send {
        switches: Switches,
        line: Option<String>,
        after: u32,
        delay: u32,
        data: String,
    },
    NoSend {
        line: Option<String>,
    },
    Show(ShowWhat),
    Step(u32),
    Next(u32),
    Go {
        start: Option<Address>,
        until: Option<Until>,
    },
    Run(Option<Address>),
    Continue,
    Load(String),
    Do(String),
    Echo(String),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Break,
    NoBreak,
    Expect,
    NoExpect,
    Send,
    NoSend,
    Show,
    Step,
    Next,
    Go,
    Run,
    Continue,
    Load,
    Do,
    Echo,
    Exit,
    Quit,
    Queue,
    Time,
}

/// Each keyword with the shortest abbreviation we accept.
const COMMANDS: &[(&str, usize, Keyword)] = &[
    ("BREAK", 2, Keyword::Break),
    ("NOBREAK", 4, Keyword::NoBreak),
    ("EXPECT", 3, Keyword::Expect),
    ("NOEXPECT", 5, Keyword::NoExpect),
    ("SEND", 3, Keyword::Send),
    ("NOSEND", 5, Keyword::NoSend),
    ("SHOW", 2, Keyword::Show),
    ("STEP", 2, Keyword::Step),
    ("NEXT", 3, Keyword::Next),
    ("GO", 2, Keyword::Go),
    ("RUN", 2, Keyword::Run),
    ("CONTINUE", 4, Keyword::Continue),
    ("LOAD", 2, Keyword::Load),
    ("DO", 2, Keyword::Do),
    ("ECHO", 2, Keyword::Echo),
    ("EXIT", 2, Keyword::Exit),
    ("QUIT", 4, Keyword::Quit),
];

const SHOW_ITEMS: &[(&str, usize, Keyword)] = &[
    ("BREAK", 2, Keyword::Break),
    ("EXPECT", 3, Keyword::Expect),
    ("SEND", 3, Keyword::Send),
    ("QUEUE", 3, Keyword::Queue),
    ("TIME", 3, Keyword::Time),
];

fn lookup(word: &str, table: &[(&str, usize, Keyword)]) -> Result<Keyword, ScpError> {
    let upper = word.to_ascii_uppercase();
    let found: Vec<Keyword> = table
        .iter()
        .filter(|(name, min, _)| upper.len() >= *min && name.starts_with(upper.as_str()))
        .map(|(_, _, kw)| *kw)
        .collect();
    match found.as_slice() {
        [] => Err(ScpError::UnknownCommand(word.to_string())),
        [kw] => Ok(*kw),
        _ => Err(ScpError::AmbiguousCommand(word.to_string())),
    }
}

/// Walks the tokens of one command line.
struct Scanner<'a> {
    source: &'a str,
    tokens: Vec<(Lexeme<'a>, Span)>,
    pos: usize,
}

fn lexical_error(text: &str) -> ScpError {
    if text.starts_with(['"', '\'']) {
        ScpError::InvalidQuotedString(QuotedStringError::NotQuoted)
    } else {
        ScpError::BadArgument(text.to_string())
    }
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Scanner<'a> {
        Scanner {
            source,
            tokens: tokenize(source),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<Lexeme<'a>> {
        self.tokens.get(self.pos).map(|(token, _)| *token)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn word(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(Ok(Token::Word(word))) => {
                self.advance();
                Some(word)
            }
            _ => None,
        }
    }

    /// The text of everything not yet scanned, trimmed; `None` if that
    /// is nothing.
    fn remainder(&mut self) -> Option<&'a str> {
        let (_, span) = self.tokens.get(self.pos)?;
        let rest = self.source[span.start..].trim();
        self.pos = self.tokens.len();
        Some(rest).filter(|r| !r.is_empty())
    }

    fn expect_end(&mut self) -> Result<(), ScpError> {
        match self.remainder() {
            None => Ok(()),
            Some(extra) => Err(ScpError::TooManyArguments(extra.to_string())),
        }
    }

    fn semicolon(&mut self) -> bool {
        let found = self.peek() == Some(Ok(Token::Semicolon));
        if found {
            self.advance();
        }
        found
    }

    fn switches(&mut self) -> Result<Switches, ScpError> {
        let mut result = Switches::NONE;
        while let Some(Ok(Token::Switch(token))) = self.peek() {
            self.advance();
            result |= Switches::parse_token(token)?;
        }
        Ok(result)
    }

    fn at_quote(&self) -> bool {
        matches!(self.peek(), Some(Ok(Token::Quoted(_))))
    }

    /// A quoted string, quotes included.
    fn quoted(&mut self) -> Result<&'a str, ScpError> {
        match self.peek() {
            Some(Ok(Token::Quoted(quoted))) => {
                self.advance();
                Ok(quoted)
            }
            Some(Err(text)) => Err(lexical_error(text)),
            Some(Ok(_)) => Err(ScpError::BadArgument(
                self.remainder().unwrap_or_default().to_string(),
            )),
            None => Err(ScpError::MissingArgument("quoted string")),
        }
    }

    fn count(&mut self) -> Option<u32> {
        match self.peek() {
            Some(Ok(Token::Count(n))) => {
                self.advance();
                Some(n)
            }
            _ => None,
        }
    }

    /// `KEY=n` optionally followed by a comma.
    fn keyword_value(&mut self, key: &str) -> Option<u32> {
        match self.peek() {
            Some(Ok(Token::KeyValue(kv))) if kv.key.eq_ignore_ascii_case(key) => {
                self.advance();
                if self.peek() == Some(Ok(Token::Comma)) {
                    self.advance();
                }
                Some(kv.value)
            }
            _ => None,
        }
    }

    fn address_list(&mut self) -> Result<Vec<BreakTarget>, ScpError> {
        let mut result = Vec::new();
        if !matches!(self.peek(), Some(Ok(Token::Word(_)))) {
            return Ok(result);
        }
        loop {
            let Some(item) = self.word() else {
                return Err(match self.peek() {
                    Some(Err(text)) => lexical_error(text),
                    Some(Ok(token)) => ScpError::BadArgument(token.to_string()),
                    None => ScpError::MissingArgument("address"),
                });
            };
            result.push(BreakTarget {
                range: parse_range(item)?,
                count: self.count().unwrap_or(0),
            });
            if self.peek() == Some(Ok(Token::Comma)) {
                self.advance();
            } else {
                return Ok(result);
            }
        }
    }
}

fn parse_decimal(text: &str) -> Result<u32, ScpError> {
    text.parse::<u32>()
        .map_err(|_| ScpError::BadArgument(text.to_string()))
}

fn parse_address(text: &str) -> Result<Address, ScpError> {
    text.trim()
        .parse::<Address>()
        .map_err(|_| ScpError::BadArgument(text.to_string()))
}

fn parse_range(text: &str) -> Result<AddressRange, ScpError> {
    if text.eq_ignore_ascii_case("ALL") {
        return Ok(AddressRange::All);
    }
    let bad = || ScpError::BadArgument(text.to_string());
    if let Some((low, len)) = text.split_once('/') {
        let low = parse_address(low)?;
        let len = u32::from_str_radix(len, 8).map_err(|_| bad())?;
        let high = len
            .checked_sub(1)
            .and_then(|n| low.checked_add(n))
            .ok_or_else(bad)?;
        return Ok(AddressRange::Range { low, high });
    }
    match text.split_once(['-', ':']) {
        Some((low, high)) => {
            let low = parse_address(low)?;
            let high = parse_address(high)?;
            if high < low {
                return Err(bad());
            }
            Ok(AddressRange::Range { low, high })
        }
        None => Ok(AddressRange::single(parse_address(text)?)),
    }
}

/// Parse a comma-separated address list such as `100[2],200-210,ALL`.
///
/// # Errors
///
/// [`ScpError::BadArgument`] for anything which is not an address,
/// range or count.
pub fn parse_address_list(text: &str) -> Result<Vec<BreakTarget>, ScpError> {
    let mut sc = Scanner::new(text);
    let targets = sc.address_list()?;
    sc.expect_end()?;
    Ok(targets)
}

fn optional_line(sc: &mut Scanner<'_>) -> Option<String> {
    sc.word().map(str::to_string)
}

fn parse_break(sc: &mut Scanner<'_>, with_action: bool) -> Result<Command, ScpError> {
    let types = BreakTypes::from_switches(sc.switches()?);
    let targets = sc.address_list()?;
    let action = if sc.semicolon() {
        if !with_action {
            return Err(ScpError::TooManyArguments(
                sc.remainder().unwrap_or(";").to_string(),
            ));
        }
        sc.remainder().map(str::to_string)
    } else {
        sc.expect_end()?;
        None
    };
    if with_action {
        Ok(Command::Break {
            types,
            targets,
            action,
        })
    } else {
        Ok(Command::NoBreak { types, targets })
    }
}

fn parse_expect(sc: &mut Scanner<'_>) -> Result<Command, ScpError> {
    let switches = sc.switches()?;
    let line = optional_line(sc);
    let count = sc.count().unwrap_or(0);
    let halt_after = sc.keyword_value("HALTAFTER").unwrap_or(0);
    let pattern = sc.quoted()?.to_string();
    let action = sc.remainder().map(str::to_string);
    Ok(Command::Expect {
        switches,
        line,
        count,
        halt_after,
        pattern,
        action,
    })
}

fn parse_noexpect(sc: &mut Scanner<'_>) -> Result<Command, ScpError> {
    let line = optional_line(sc);
    let pattern = if sc.at_quote() {
        Some(sc.quoted()?.to_string())
    } else {
        None
    };
    sc.expect_end()?;
    Ok(Command::NoExpect { line, pattern })
}

fn parse_send(sc: &mut Scanner<'_>) -> Result<Command, ScpError> {
    let switches = sc.switches()?;
    let line = optional_line(sc);
    let mut after = 0;
    let mut delay = 0;
    loop {
        if let Some(n) = sc.keyword_value("AFTER") {
            after = n;
        } else if let Some(n) = sc.keyword_value("DELAY") {
            delay = n;
        } else {
            break;
        }
    }
    let data = sc.quoted()?.to_string();
    sc.expect_end()?;
    Ok(Command::Send {
        switches,
        line,
        after,
        delay,
        data,
    })
}

fn parse_show(sc: &mut Scanner<'_>) -> Result<Command, ScpError> {
    let Some(word) = sc.word() else {
        return Err(ScpError::MissingArgument("what to show"));
    };
    let what = match lookup(word, SHOW_ITEMS)? {
        Keyword::Break => ShowWhat::Break(sc.address_list()?),
        Keyword::Expect => {
            let line = optional_line(sc);
            let pattern = if sc.at_quote() {
                Some(sc.quoted()?.to_string())
            } else {
                None
            };
            ShowWhat::Expect { line, pattern }
        }
        Keyword::Send => ShowWhat::Send {
            line: optional_line(sc),
        },
        Keyword::Queue => ShowWhat::Queue,
        _ => ShowWhat::Time,
    };
    sc.expect_end()?;
    Ok(Command::Show(what))
}

fn parse_repeat(sc: &mut Scanner<'_>) -> Result<u32, ScpError> {
    let n = match sc.word() {
        Some(word) => parse_decimal(word)?,
        None => 1,
    };
    sc.expect_end()?;
    if n == 0 {
        return Err(ScpError::BadArgument("0".to_string()));
    }
    Ok(n)
}

fn parse_go(sc: &mut Scanner<'_>) -> Result<Command, ScpError> {
    let mut start = None;
    let mut until = None;
    while let Some(word) = sc.word() {
        if word.eq_ignore_ascii_case("UNTIL") {
            if until.is_some() {
                return Err(ScpError::TooManyArguments(word.to_string()));
            }
            until = Some(if sc.at_quote() {
                Until::Output(sc.quoted()?.to_string())
            } else {
                match sc.word() {
                    Some(addr) => Until::Address(parse_address(addr)?),
                    None => return Err(ScpError::MissingArgument("UNTIL condition")),
                }
            });
        } else if start.is_none() && until.is_none() {
            start = Some(parse_address(word)?);
        } else {
            return Err(ScpError::TooManyArguments(word.to_string()));
        }
    }
    sc.expect_end()?;
    Ok(Command::Go { start, until })
}

fn required_text(sc: &mut Scanner<'_>, what: &'static str) -> Result<String, ScpError> {
    sc.remainder()
        .map(str::to_string)
        .ok_or(ScpError::MissingArgument(what))
}

/// Parse one command line.
///
/// # Errors
///
/// Unknown or ambiguous keywords and malformed arguments.
pub fn parse_command(line: &str) -> Result<Command, ScpError> {
    let mut sc = Scanner::new(line);
    let word = match sc.peek() {
        None | Some(Ok(Token::Semicolon)) => return Ok(Command::Blank),
        Some(Ok(Token::Word(word))) if word.starts_with('#') => return Ok(Command::Blank),
        Some(Ok(Token::Word(word))) => word,
        Some(Ok(token)) => return Err(ScpError::UnknownCommand(token.to_string())),
        Some(Err(text)) => return Err(ScpError::UnknownCommand(text.to_string())),
    };
    sc.advance();
    match lookup(word, COMMANDS)? {
        Keyword::Break => parse_break(&mut sc, true),
        Keyword::NoBreak => parse_break(&mut sc, false),
        Keyword::Expect => parse_expect(&mut sc),
        Keyword::NoExpect => parse_noexpect(&mut sc),
        Keyword::Send => parse_send(&mut sc),
        Keyword::NoSend => {
            let line = optional_line(&mut sc);
            sc.expect_end()?;
            Ok(Command::NoSend { line })
        }
        Keyword::Show => parse_show(&mut sc),
        Keyword::Step => Ok(Command::Step(parse_repeat(&mut sc)?)),
        Keyword::Next => Ok(Command::Next(parse_repeat(&mut sc)?)),
        Keyword::Go => parse_go(&mut sc),
        Keyword::Run => {
            let start = sc.word().map(parse_address).transpose()?;
            sc.expect_end()?;
            Ok(Command::Run(start))
        }
        Keyword::Continue => {
            sc.expect_end()?;
            Ok(Command::Continue)
        }
        Keyword::Load => Ok(Command::Load(required_text(&mut sc, "file name")?)),
        Keyword::Do => Ok(Command::Do(required_text(&mut sc, "file name")?)),
        Keyword::Echo => Ok(Command::Echo(
            sc.remainder().unwrap_or_default().to_string(),
        )),
        Keyword::Exit | Keyword::Quit => Ok(Command::Exit),
        Keyword::Queue | Keyword::Time => Err(ScpError::UnknownCommand(word.to_string())),
    }
}

#[cfg(test)]
fn range(low: u32, high: u32, count: u32) -> BreakTarget {
    BreakTarget {
        range: AddressRange::Range {
            low: Address::new(low),
            high: Address::new(high),
        },
        count,
    }
}

#[test]
fn test_keywords() {
    assert_eq!(parse_command("   "), Ok(Command::Blank));
    assert_eq!(parse_command("; a comment"), Ok(Command::Blank));
    assert_eq!(parse_command("# another"), Ok(Command::Blank));
    assert_eq!(parse_command("cont"), Ok(Command::Continue));
    assert_eq!(parse_command("QUIT"), Ok(Command::Exit));
    assert_eq!(parse_command("ex"), Ok(Command::Exit));
    assert_eq!(
        parse_command("b 100"),
        Err(ScpError::UnknownCommand("b".to_string()))
    );
    assert_eq!(
        parse_command("frobnicate"),
        Err(ScpError::UnknownCommand("frobnicate".to_string()))
    );
    assert_eq!(parse_command("st"), Ok(Command::Step(1)));
    assert_eq!(parse_command("step 20"), Ok(Command::Step(20)));
    assert_eq!(parse_command("next"), Ok(Command::Next(1)));
    assert!(parse_command("step 0").is_err());
}

#[test]
fn test_break() {
    assert_eq!(
        parse_command("BREAK"),
        Ok(Command::Break {
            types: BreakTypes::NONE,
            targets: vec![],
            action: None
        })
    );
    assert_eq!(
        parse_command("br -rw 100[3], 200-210 ; echo hit; step"),
        Ok(Command::Break {
            types: BreakTypes::letter('R') | BreakTypes::letter('W'),
            targets: vec![range(0o100, 0o100, 3), range(0o200, 0o210, 0)],
            action: Some("echo hit; step".to_string()),
        })
    );
    assert_eq!(
        parse_command("break 100/10,7:7;"),
        Ok(Command::Break {
            types: BreakTypes::NONE,
            targets: vec![range(0o100, 0o107, 0), range(7, 7, 0)],
            action: None,
        })
    );
    assert!(parse_command("break 210-200").is_err());
    assert!(parse_command("break 9").is_err());
    assert!(parse_command("break 100/0").is_err());
}

#[test]
fn test_nobreak() {
    assert_eq!(
        parse_command("nobr all"),
        Ok(Command::NoBreak {
            types: BreakTypes::NONE,
            targets: vec![BreakTarget {
                range: AddressRange::All,
                count: 0
            }],
        })
    );
    assert!(parse_command("nobreak 100; echo").is_err());
}

#[test]
fn test_expect() {
    assert_eq!(
        parse_command(r#"expect -p console [2] HALTAFTER=100,"login: " send "guest\r"; go"#),
        Ok(Command::Expect {
            switches: Switches::letter('P'),
            line: Some("console".to_string()),
            count: 2,
            halt_after: 100,
            pattern: "\"login: \"".to_string(),
            action: Some(r#"send "guest\r"; go"#.to_string()),
        })
    );
    assert_eq!(
        parse_command(r#"exp 'say "hi"'"#),
        Ok(Command::Expect {
            switches: Switches::NONE,
            line: None,
            count: 0,
            halt_after: 0,
            pattern: r#"'say "hi"'"#.to_string(),
            action: None,
        })
    );
    assert_eq!(
        parse_command("expect"),
        Err(ScpError::MissingArgument("quoted string"))
    );
    assert_eq!(
        parse_command(r#"expect "unterminated"#),
        Err(ScpError::InvalidQuotedString(QuotedStringError::NotQuoted))
    );
    assert_eq!(
        parse_command("expect console 'x"),
        Err(ScpError::InvalidQuotedString(QuotedStringError::NotQuoted))
    );
}

#[test]
fn test_noexpect_and_send() {
    assert_eq!(
        parse_command(r#"noexpect "login:""#),
        Ok(Command::NoExpect {
            line: None,
            pattern: Some("\"login:\"".to_string())
        })
    );
    assert_eq!(
        parse_command("noexp tty1"),
        Ok(Command::NoExpect {
            line: Some("tty1".to_string()),
            pattern: None
        })
    );
    assert_eq!(
        parse_command(r#"send -t DELAY=20,AFTER=5,"ls\r""#),
        Ok(Command::Send {
            switches: Switches::letter('T'),
            line: None,
            after: 5,
            delay: 20,
            data: "\"ls\\r\"".to_string(),
        })
    );
    assert_eq!(
        parse_command(r#"send tty1 "x""#),
        Ok(Command::Send {
            switches: Switches::NONE,
            line: Some("tty1".to_string()),
            after: 0,
            delay: 0,
            data: "\"x\"".to_string(),
        })
    );
    assert_eq!(
        parse_command("nosend"),
        Ok(Command::NoSend { line: None })
    );
}

#[test]
fn test_show() {
    assert_eq!(
        parse_command("sh br"),
        Ok(Command::Show(ShowWhat::Break(vec![])))
    );
    assert_eq!(
        parse_command("show queue"),
        Ok(Command::Show(ShowWhat::Queue))
    );
    assert_eq!(parse_command("show tim"), Ok(Command::Show(ShowWhat::Time)));
    assert_eq!(
        parse_command("show expect console"),
        Ok(Command::Show(ShowWhat::Expect {
            line: Some("console".to_string()),
            pattern: None
        }))
    );
    assert_eq!(
        parse_command("show send"),
        Ok(Command::Show(ShowWhat::Send { line: None }))
    );
    assert!(parse_command("show").is_err());
    assert!(parse_command("show s").is_err());
}

#[test]
fn test_go() {
    assert_eq!(
        parse_command("go"),
        Ok(Command::Go {
            start: None,
            until: None
        })
    );
    assert_eq!(
        parse_command("go 10 until 20"),
        Ok(Command::Go {
            start: Some(Address::new(0o10)),
            until: Some(Until::Address(Address::new(0o20))),
        })
    );
    assert_eq!(
        parse_command(r#"go until "done""#),
        Ok(Command::Go {
            start: None,
            until: Some(Until::Output("\"done\"".to_string())),
        })
    );
    assert!(parse_command("go until").is_err());
    assert_eq!(parse_command("run"), Ok(Command::Run(None)));
    assert_eq!(
        parse_command("run 4"),
        Ok(Command::Run(Some(Address::new(4))))
    );
}

#[test]
fn test_file_commands() {
    assert_eq!(
        parse_command("do setup.do"),
        Ok(Command::Do("setup.do".to_string()))
    );
    assert_eq!(
        parse_command("load prog.txt"),
        Ok(Command::Load("prog.txt".to_string()))
    );
    assert_eq!(
        parse_command("load"),
        Err(ScpError::MissingArgument("file name"))
    );
    assert_eq!(
        parse_command("echo  hello world "),
        Ok(Command::Echo("hello world".to_string()))
    );
    assert_eq!(
        parse_command(r#"echo a; "b"#),
        Ok(Command::Echo(r#"a; "b"#.to_string()))
    );
}
