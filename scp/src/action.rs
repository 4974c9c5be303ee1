//! Pending actions.
//!
//! Breakpoints and expect rules may carry an action: one or more
//! commands separated by semicolons.  When the trigger fires, the
//! action is staged here and the command loop runs the commands one
//! at a time before it reads any more input.  Actions staged in the
//! same instant run in the order in which they were staged.
use std::collections::VecDeque;

use tracing::{event, Level};

use super::lexer::split_commands;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionQueue {
    commands: VecDeque<String>,
}

impl ActionQueue {
    #[must_use]
    pub fn new() -> ActionQueue {
        ActionQueue::default()
    }

    /// Append the commands of `action`.
    pub fn stage(&mut self, action: &str) {
        let commands = split_commands(action);
        event!(Level::DEBUG, "staging action {:?}", commands);
        self.commands.extend(commands);
    }

    /// Remove and return the next command to run.
    pub fn next_command(&mut self) -> Option<String> {
        self.commands.pop_front()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[test]
fn test_stage_order() {
    let mut q = ActionQueue::new();
    assert_eq!(q.next_command(), None);
    q.stage(r#"echo first; send "x;y""#);
    q.stage("echo third");
    assert_eq!(q.len(), 3);
    assert_eq!(q.next_command().as_deref(), Some("echo first"));
    assert_eq!(q.next_command().as_deref(), Some(r#"send "x;y""#));
    assert_eq!(q.next_command().as_deref(), Some("echo third"));
    assert!(q.is_empty());
}

#[test]
fn test_clear() {
    let mut q = ActionQueue::new();
    q.stage("go");
    q.clear();
    assert_eq!(q.next_command(), None);
}
