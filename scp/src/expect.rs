//! Expect rules.
//!
//! An [`ExpectContext`] watches the output of one line.  Each output
//! byte is appended to a match buffer and the rules are tested, in
//! the order in which they were defined, against the most recently
//! written bytes.  The first rule to match wins.
//!
//! The buffer is linear.  When the insertion cursor reaches the end
//! it goes back to the start without moving anything, and a pattern
//! which straddles that point is still recognised by comparing its
//! tail with the start of the buffer and its head with the end.
//! After any match the cursor goes back to the start and the older
//! contents of the buffer are forgotten, so bytes which were part of
//! one match (or of some other partial match) are not seen again.
use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use super::status::ScpError;

/// Keep the rule after it fires.
pub const PERSIST: Switches = Switches::letter('P');
/// Delete all the rules of the line when this one fires.
pub const CLEAR_ALL: Switches = Switches::letter('C');
/// Regular expression rule (not supported).
pub const REGEX: Switches = Switches::letter('R');
/// Case-insensitive regular expression.
pub const CASE_INSENSITIVE: Switches = Switches::letter('I');
/// The halt-after delay is in microseconds, not instructions.
pub const TIME_IN_USECS: Switches = Switches::letter('T');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectRule {
    pattern: String,
    match_bytes: Vec<u8>,
    count: u32,
    switches: Switches,
    action: Option<String>,
}

impl ExpectRule {
    /// The pattern as it was written, quotes and all.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn match_bytes(&self) -> &[u8] {
        &self.match_bytes
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn switches(&self) -> Switches {
        self.switches
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }
}

/// Shows the rule as the command which would define it.
impl Display for ExpectRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("EXPECT")?;
        if !self.switches.is_empty() {
            write!(f, " {}", self.switches)?;
        }
        write!(f, " {}", self.pattern)?;
        if self.count > 0 {
            write!(f, " [{}]", self.count)?;
        }
        if let Some(action) = self.action.as_deref() {
            write!(f, " {action}")?;
        }
        Ok(())
    }
}

/// A rule which fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    pub pattern: String,
    pub action: Option<String>,
    /// Delay before the simulation should stop.
    pub after: u32,
    /// True when `after` is in microseconds.
    pub after_in_usecs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectContext {
    line: String,
    rules: Vec<ExpectRule>,
    /// Holds `buf_size` bytes plus a terminator.
    buf: Vec<u8>,
    buf_size: usize,
    buf_ins: usize,
    /// The cursor has gone back to the start because the buffer
    /// filled up, so the end of the buffer holds recent output.
    wrapped: bool,
    after: u32,
}

impl ExpectContext {
    #[must_use]
    pub fn new(line: &str) -> ExpectContext {
        ExpectContext {
            line: line.to_string(),
            rules: Vec::new(),
            buf: Vec::new(),
            buf_size: 0,
            buf_ins: 0,
            wrapped: false,
            after: 0,
        }
    }

    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn rules(&self) -> impl Iterator<Item = &ExpectRule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The halt-after delay which applies when a rule fires.
    #[must_use]
    pub fn after(&self) -> u32 {
        self.after
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buf_size
    }

    #[must_use]
    pub fn insertion_offset(&self) -> usize {
        self.buf_ins
    }

    #[must_use]
    pub fn find(&self, pattern: &str) -> Option<&ExpectRule> {
        self.rules.iter().find(|r| r.pattern == pattern)
    }

    /// Define (or redefine) the rule for the quoted string `pattern`.
    ///
    /// # Errors
    ///
    /// Nothing changes if the rule asks for regular expression
    /// matching, if `pattern` is not a valid quoted string, if a
    /// persistent rule for `pattern` already exists, or if `after` is
    /// nonzero while rules for other patterns exist.
    ///
    /// A nonzero `after` becomes the halt-after delay of the line.  A
    /// zero `after` leaves the delay of other rules alone, and clears
    /// it only when this is the line's only rule.
    pub fn set(
        &mut self,
        pattern: &str,
        count: u32,
        after: u32,
        switches: Switches,
        action: Option<&str>,
    ) -> Result<(), ScpError> {
        if switches.contains(REGEX) {
            return Err(ScpError::RegexUnsupported);
        }
        if switches.contains(CASE_INSENSITIVE) {
            return Err(ScpError::CaseInsensitiveNeedsRegex);
        }
        let match_bytes = decode_quoted_string(pattern)?;
        if match_bytes.is_empty() {
            return Err(ScpError::BadArgument(pattern.to_string()));
        }
        if let Some(existing) = self.find(pattern) {
            if existing.switches.contains(PERSIST) {
                return Err(ScpError::DuplicatePersistentRule(pattern.to_string()));
            }
        }
        let others = self.rules.iter().any(|r| r.pattern != pattern);
        if after != 0 && others {
            return Err(ScpError::HaltAfterConflict);
        }

        let index = match self.rules.iter().position(|r| r.pattern == pattern) {
            Some(index) => index,
            None => {
                self.rules.push(ExpectRule {
                    pattern: pattern.to_string(),
                    match_bytes,
                    count: 0,
                    switches: Switches::NONE,
                    action: None,
                });
                self.rules.len() - 1
            }
        };
        if after != 0 || !others {
            self.after = after;
        }
        let rule = &mut self.rules[index];
        rule.count = count;
        rule.switches = switches;
        rule.action = action
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        event!(Level::DEBUG, line = %self.line, "defined {}", rule);

        let needed = self
            .rules
            .iter()
            .map(|r| r.match_bytes.len() + 1)
            .max()
            .unwrap_or(0);
        if needed > self.buf_size {
            self.buf_size = needed;
            self.buf.resize(needed + 1, 0);
            self.wrapped = false;
        }
        Ok(())
    }

    fn release_buffer_if_unused(&mut self) {
        if self.rules.is_empty() {
            self.buf = Vec::new();
            self.buf_size = 0;
            self.buf_ins = 0;
            self.wrapped = false;
            self.after = 0;
        }
    }

    /// Remove the rule for `pattern`, if there is one.
    pub fn clear(&mut self, pattern: &str) {
        let before = self.rules.len();
        self.rules.retain(|r| r.pattern != pattern);
        if self.rules.len() != before {
            event!(Level::DEBUG, line = %self.line, "removed expect rule {}", pattern);
        }
        self.release_buffer_if_unused();
    }

    pub fn clear_all(&mut self) {
        if !self.rules.is_empty() {
            event!(Level::DEBUG, line = %self.line, "removing all expect rules");
        }
        self.rules.clear();
        self.release_buffer_if_unused();
    }

    fn rule_matches(&self, rule: &ExpectRule) -> bool {
        let pattern = rule.match_bytes.as_slice();
        let size = pattern.len();
        let ins = self.buf_ins;
        if ins < size {
            if !self.wrapped {
                return false;
            }
            // The pattern straddles the point at which the cursor
            // last went back to the start of the buffer.
            if ins > 0 && self.buf[..ins] != pattern[size - ins..] {
                return false;
            }
            let head = size - ins;
            self.buf[self.buf_size - head..self.buf_size] == pattern[..head]
        } else {
            self.buf[ins - size..ins] == *pattern
        }
    }

    /// Feed one output byte to the rules.
    ///
    /// A rule which matches while its count is positive counts down
    /// instead of firing.  A rule which fires is deleted unless it is
    /// persistent; a clear-all rule deletes every rule.
    pub fn check(&mut self, byte: u8) -> Option<ExpectMatch> {
        if self.rules.is_empty() {
            return None;
        }
        self.buf[self.buf_ins] = byte;
        self.buf_ins += 1;
        self.buf[self.buf_ins] = 0;
        let found = self.rules.iter().position(|r| self.rule_matches(r));
        if self.buf_ins == self.buf_size {
            self.buf_ins = 0;
            self.wrapped = true;
        }
        let index = found?;
        self.buf_ins = 0;
        self.wrapped = false;

        let rule = &mut self.rules[index];
        if rule.count > 0 {
            rule.count -= 1;
            event!(
                Level::TRACE,
                line = %self.line,
                "expect rule {} matched, {} more to go",
                rule.pattern,
                rule.count
            );
            return None;
        }
        let result = ExpectMatch {
            pattern: rule.pattern.clone(),
            action: rule.action.clone(),
            after: self.after,
            after_in_usecs: rule.switches.contains(TIME_IN_USECS),
        };
        let switches = rule.switches;
        event!(Level::DEBUG, line = %self.line, "expect rule {} fired", rule);
        if switches.contains(CLEAR_ALL) {
            self.clear_all();
        } else if !switches.contains(PERSIST) {
            self.rules.remove(index);
            self.release_buffer_if_unused();
        }
        Some(result)
    }

    /// The `SHOW EXPECT` report: the buffer state and the rules (only
    /// the rule for `pattern`, if given).
    #[must_use]
    pub fn show(&self, pattern: Option<&str>) -> String {
        if self.rules.is_empty() {
            return format!("No expect rules defined on {}\n", self.line);
        }
        let mut result = format!("{} expect rules:\n", self.line);
        result.push_str(&format!("  Match Buffer Size: {}\n", self.buf_size));
        result.push_str(&format!("  Buffer Insert Offset: {}\n", self.buf_ins));
        result.push_str(&format!(
            "  Buffer Contents: {}\n",
            encode_quoted_string(&self.buf[..self.buf_ins])
        ));
        if self.after != 0 {
            let units = if self.rules.iter().any(|r| r.switches.contains(TIME_IN_USECS)) {
                "usecs"
            } else {
                "instructions"
            };
            result.push_str(&format!("  Halt After: {} {units}\n", self.after));
        }
        let mut shown = 0;
        for rule in self
            .rules
            .iter()
            .filter(|r| pattern.map_or(true, |p| r.pattern == p))
        {
            result.push_str(&format!("  {rule}\n"));
            shown += 1;
        }
        if shown == 0 {
            if let Some(p) = pattern {
                result.push_str(&format!("  No rule for {p}\n"));
            }
        }
        result
    }
}

#[cfg(test)]
fn feed(ctx: &mut ExpectContext, bytes: &[u8]) -> Vec<ExpectMatch> {
    bytes.iter().filter_map(|b| ctx.check(*b)).collect()
}

#[test]
fn test_simple_match() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"login:\"", 0, 0, Switches::NONE, Some("send \"guest\\r\""))
        .expect("valid rule");
    let matches = feed(&mut ctx, b"Welcome\r\nlogin:");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].action.as_deref(), Some("send \"guest\\r\""));
    // Not persistent, so the rule is gone.
    assert!(ctx.is_empty());
    assert!(ctx.check(b'x').is_none());
}

#[test]
fn test_registration_order_and_cursor_reset() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"AB\"", 0, 0, Switches::NONE, Some("echo ab"))
        .expect("valid rule");
    ctx.set("\"ABC\"", 0, 0, Switches::NONE, Some("echo abc"))
        .expect("valid rule");
    assert!(ctx.check(b'A').is_none());
    let m = ctx.check(b'B').expect("AB matches first");
    assert_eq!(m.pattern, "\"AB\"");
    assert_eq!(ctx.insertion_offset(), 0);
    assert!(ctx.check(b'C').is_none());
    assert_eq!(ctx.rules().count(), 1);
}

#[test]
fn test_no_completion_from_bytes_before_a_match() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"AB\"", 0, 0, Switches::NONE, Some("echo ab"))
        .expect("valid rule");
    ctx.set("\"ABC\"", 0, 0, Switches::NONE, Some("echo abc"))
        .expect("valid rule");
    assert!(feed(&mut ctx, b"xxA").is_empty());
    let m = ctx.check(b'B').expect("AB matches first");
    assert_eq!(m.pattern, "\"AB\"");
    assert_eq!(ctx.insertion_offset(), 0);
    // "AB" is still in the buffer but belongs to the earlier match.
    assert!(ctx.check(b'C').is_none());
    assert_eq!(feed(&mut ctx, b"ABC").len(), 1);
    assert!(ctx.is_empty());
}

#[test]
fn test_straddle_after_a_match_needs_a_real_wrap() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"ok\"", 0, 0, PERSIST, None).expect("valid rule");
    ctx.set("\"cdef\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    assert_eq!(ctx.buffer_size(), 5);
    // The tail of the buffer holds "cde" once "abcdeok" is seen.
    assert!(feed(&mut ctx, b"abcde").is_empty());
    assert_eq!(feed(&mut ctx, b"ok").len(), 1);
    assert_eq!(ctx.insertion_offset(), 0);
    assert!(ctx.check(b'f').is_none());
    // Once the buffer really fills, a straddling match is found.
    assert!(feed(&mut ctx, b"xcde").is_empty());
    assert_eq!(ctx.insertion_offset(), 0);
    assert!(ctx.check(b'f').is_some());
}

#[test]
fn test_persistent_rule_with_count() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"ok\"", 2, 0, PERSIST, None).expect("valid rule");
    // The count is used up before the rule fires.
    assert!(feed(&mut ctx, b"ok ok").is_empty());
    assert_eq!(feed(&mut ctx, b" ok").len(), 1);
    assert_eq!(feed(&mut ctx, b"ok").len(), 1);
    assert_eq!(ctx.rules().count(), 1);
}

#[test]
fn test_clear_all_switch() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"x\"", 0, 0, PERSIST, None).expect("valid rule");
    ctx.set("\"done\"", 0, 0, CLEAR_ALL, None).expect("valid rule");
    assert_eq!(feed(&mut ctx, b"x").len(), 1);
    assert_eq!(ctx.rules().count(), 2);
    assert_eq!(feed(&mut ctx, b"done").len(), 1);
    assert!(ctx.is_empty());
    assert_eq!(ctx.buffer_size(), 0);
}

#[test]
fn test_match_straddles_wrap() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"abc\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    assert_eq!(ctx.buffer_size(), 4);
    // Four bytes fill the buffer and send the cursor back to the
    // start; "abc" then straddles the wrap.
    assert!(feed(&mut ctx, b"xxxa").is_empty());
    assert_eq!(ctx.insertion_offset(), 0);
    assert!(ctx.check(b'b').is_none());
    assert!(ctx.check(b'c').is_some());
}

#[test]
fn test_set_validation() {
    let mut ctx = ExpectContext::new("CONSOLE");
    assert_eq!(
        ctx.set("\"a\"", 0, 0, REGEX, None),
        Err(ScpError::RegexUnsupported)
    );
    assert_eq!(
        ctx.set("\"a\"", 0, 0, CASE_INSENSITIVE, None),
        Err(ScpError::CaseInsensitiveNeedsRegex)
    );
    assert!(matches!(
        ctx.set("a", 0, 0, Switches::NONE, None),
        Err(ScpError::InvalidQuotedString(_))
    ));
    ctx.set("\"a\"", 0, 0, PERSIST, None).expect("valid rule");
    assert_eq!(
        ctx.set("\"a\"", 0, 0, Switches::NONE, None),
        Err(ScpError::DuplicatePersistentRule("\"a\"".to_string()))
    );
    assert!(!ctx.is_empty());
}

#[test]
fn test_halt_after_conflict_leaves_rules_alone() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"one\"", 0, 100, Switches::NONE, Some("echo one"))
        .expect("valid rule");
    assert_eq!(ctx.after(), 100);
    let before = ctx.clone();
    assert_eq!(
        ctx.set("\"two\"", 0, 50, Switches::NONE, None),
        Err(ScpError::HaltAfterConflict)
    );
    assert_eq!(ctx, before);
    let m = feed(&mut ctx, b"one").pop().expect("fires");
    assert_eq!(m.after, 100);
    assert!(!m.after_in_usecs);
}

#[test]
fn test_halt_after_on_redefinition() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"ok\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    ctx.set("\"ok\"", 0, 100, Switches::NONE, None)
        .expect("redefining the only rule may add a halt-after");
    assert_eq!(ctx.after(), 100);
    assert_eq!(ctx.rules().count(), 1);
    ctx.set("\"ok\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    assert_eq!(ctx.after(), 0);
}

#[test]
fn test_later_rule_keeps_halt_after() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"one\"", 0, 100, Switches::NONE, None)
        .expect("valid rule");
    ctx.set("\"two\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    assert_eq!(ctx.after(), 100);
    let m = feed(&mut ctx, b"two").pop().expect("fires");
    assert_eq!(m.after, 100);
}

#[test]
fn test_redefine_replaces_action() {
    let mut ctx = ExpectContext::new("CONSOLE");
    ctx.set("\"a\"", 0, 0, Switches::NONE, Some("echo 1"))
        .expect("valid rule");
    ctx.set("\"a\"", 3, 0, TIME_IN_USECS, None).expect("valid rule");
    let rule = ctx.find("\"a\"").expect("defined");
    assert_eq!(rule.action(), None);
    assert_eq!(rule.count(), 3);
    assert_eq!(ctx.rules().count(), 1);
}

#[test]
fn test_clear_and_show() {
    let mut ctx = ExpectContext::new("CONSOLE");
    assert_eq!(ctx.show(None), "No expect rules defined on CONSOLE\n");
    ctx.set("\"login:\"", 2, 0, PERSIST, Some("echo hi"))
        .expect("valid rule");
    ctx.check(b'l');
    assert_eq!(
        ctx.show(None),
        concat!(
            "CONSOLE expect rules:\n",
            "  Match Buffer Size: 7\n",
            "  Buffer Insert Offset: 1\n",
            "  Buffer Contents: \"l\"\n",
            "  EXPECT -P \"login:\" [2] echo hi\n",
        )
    );
    ctx.clear("\"nothing\"");
    assert_eq!(ctx.rules().count(), 1);
    ctx.clear("\"login:\"");
    assert!(ctx.is_empty());
}
