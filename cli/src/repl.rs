//! The command loop.
//!
//! A [`Session`] owns the simulation context and the test bench
//! machine, and executes commands read from the terminal, from `DO`
//! files, and from the actions of breakpoints and expect rules.
use std::fmt::Display;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use base::prelude::*;
use scp::{
    parse_command, AddressRange, BreakTarget, BreakTypes, Command, ScpConfig, ScpError, ShowWhat,
    SimulationContext, StopReason, Until, CONSOLE, TIME_IN_USECS,
};

use super::machine::{break_types, parse_program, Instruction, Machine};

/// How deeply `DO` commands may nest.
pub const MAX_DO_NESTING: usize = 20;

pub const PROMPT: &str = "scp> ";

fn get_colour_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stderr) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn io_error(path: &Path, e: &io::Error) -> ScpError {
    ScpError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn decode(quoted: &str) -> Result<Vec<u8>, ScpError> {
    Ok(decode_quoted_string(quoted)?)
}

/// The most addresses a single range may set breakpoints on.
pub const MAX_BREAK_RANGE: u32 = 0o10000;

/// The ranges named by `targets`, with their counts; `ALL` is not
/// allowed here.
fn ranges(targets: &[BreakTarget]) -> Result<Vec<(Address, Address, u32)>, ScpError> {
    targets
        .iter()
        .map(|target| match target.range {
            AddressRange::All => Err(ScpError::BadArgument("ALL".to_string())),
            AddressRange::Range { low, high } => Ok((low, high, target.count)),
        })
        .collect()
}

/// Every address named by `targets`.
fn addresses(targets: &[BreakTarget]) -> Result<Vec<(Address, u32)>, ScpError> {
    let mut result = Vec::new();
    for (low, high, count) in ranges(targets)? {
        if u32::from(high) - u32::from(low) >= MAX_BREAK_RANGE {
            return Err(ScpError::RangeTooLarge { low, high });
        }
        let mut addr = low;
        loop {
            result.push((addr, count));
            if addr >= high {
                break;
            }
            addr = addr.successor();
        }
    }
    Ok(result)
}

pub struct Session<W: Write> {
    ctx: SimulationContext,
    machine: Machine,
    out: W,
    quiet: bool,
    do_depth: usize,
    exit_requested: bool,
}

impl<W: Write> Session<W> {
    pub fn new(config: ScpConfig, quiet: bool, out: W) -> Session<W> {
        let mut ctx = SimulationContext::new(config, break_types());
        let machine = Machine::new(&mut ctx);
        Session {
            ctx,
            machine,
            out,
            quiet,
            do_depth: 0,
            exit_requested: false,
        }
    }

    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    #[cfg(test)]
    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    #[cfg(test)]
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.out
    }

    fn say(&mut self, text: &str) -> Result<(), ScpError> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| io_error(Path::new("-"), &e))
    }

    /// Report an error on standard error, in red when that is a
    /// terminal.
    pub fn report_error(&mut self, e: &dyn Display) {
        event!(Level::DEBUG, "command failed: {}", e);
        let mut stderr = StandardStream::stderr(get_colour_choice());
        let mut colour = ColorSpec::new();
        colour.set_fg(Some(Color::Red)).set_bold(true);
        if let Err(err) = stderr.set_color(&colour) {
            event!(Level::WARN, "failed to select colour {:?}: {}", colour, err);
        }
        if let Err(err) = write!(stderr, "Error: {e}").and_then(|()| stderr.reset()) {
            event!(Level::WARN, "failed to report error: {}", err);
        }
        if let Err(err) = writeln!(stderr) {
            event!(Level::WARN, "failed to report error: {}", err);
        }
    }

    /// Load a program file.
    ///
    /// # Errors
    ///
    /// The file cannot be read, or it is not a valid program.
    pub fn load_program(&mut self, path: &Path) -> Result<(), ScpError> {
        let text = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
        let program = parse_program(&text)
            .map_err(|e| ScpError::BadArgument(format!("{}: {e}", path.display())))?;
        self.machine.load(program);
        self.machine.reset(&mut self.ctx, Address::ZERO);
        self.ctx.breakpoints_mut().new_pc(0);
        Ok(())
    }

    /// Run the commands staged by breakpoint and expect actions.
    pub fn run_pending_actions(&mut self) {
        while !self.exit_requested {
            let Some(command) = self.ctx.next_pending_command() else {
                break;
            };
            if !self.quiet {
                let echo = format!("{PROMPT}{command}\n");
                if let Err(e) = self.say(&echo) {
                    self.report_error(&e);
                }
            }
            if let Err(e) = self.execute(&command) {
                self.report_error(&e);
            }
        }
    }

    /// Read and execute commands until end of input or `EXIT`.
    ///
    /// # Errors
    ///
    /// Failure to read the input.
    pub fn interact<R: BufRead>(&mut self, input: R, prompt: bool) -> Result<(), io::Error> {
        let mut lines = input.lines();
        loop {
            self.run_pending_actions();
            if self.exit_requested {
                break;
            }
            if prompt {
                self.out.write_all(PROMPT.as_bytes())?;
                self.out.flush()?;
            }
            let Some(line) = lines.next() else {
                break;
            };
            if let Err(e) = self.execute(&line?) {
                self.report_error(&e);
            }
        }
        Ok(())
    }

    /// Execute the commands in a `DO` file.  The first failing
    /// command ends the file.
    ///
    /// # Errors
    ///
    /// The file cannot be read, `DO` files nest too deeply, or a
    /// command fails.
    pub fn do_file(&mut self, path: &Path) -> Result<(), ScpError> {
        if self.do_depth >= MAX_DO_NESTING {
            return Err(ScpError::NestingTooDeep(MAX_DO_NESTING));
        }
        let text = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
        event!(Level::DEBUG, "executing commands from {}", path.display());
        self.do_depth += 1;
        let result = self.execute_lines(&text);
        self.do_depth -= 1;
        result
    }

    fn execute_lines(&mut self, text: &str) -> Result<(), ScpError> {
        for line in text.lines() {
            self.run_pending_actions();
            if self.exit_requested {
                break;
            }
            self.execute(line)?;
        }
        Ok(())
    }

    /// Execute one command.
    ///
    /// # Errors
    ///
    /// The command is invalid or fails.
    pub fn execute(&mut self, line: &str) -> Result<(), ScpError> {
        match parse_command(line)? {
            Command::Blank => Ok(()),
            Command::Break {
                types,
                targets,
                action,
            } => self.set_breakpoints(types, &targets, action.as_deref()),
            Command::NoBreak { types, targets } => self.clear_breakpoints(types, &targets),
            Command::Expect {
                switches,
                line,
                count,
                halt_after,
                pattern,
                action,
            } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                self.ctx
                    .exp_set(id, &pattern, count, halt_after, switches, action.as_deref())
            }
            Command::NoExpect { line, pattern } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                let expect = &mut self.ctx.line_mut(id).expect;
                match pattern {
                    Some(pattern) => expect.clear(&pattern),
                    None => expect.clear_all(),
                }
                Ok(())
            }
            Command::Send {
                switches,
                line,
                after,
                delay,
                data,
            } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                let bytes = decode(&data)?;
                self.ctx.send_input(
                    id,
                    &bytes,
                    after,
                    delay,
                    switches.contains(TIME_IN_USECS),
                );
                Ok(())
            }
            Command::NoSend { line } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                self.ctx.line_mut(id).send.clear();
                Ok(())
            }
            Command::Show(what) => self.show(what),
            Command::Step(n) => {
                self.ctx.step(i32::try_from(n).unwrap_or(i32::MAX));
                let stop = self.run_machine();
                self.ctx.cancel_step();
                self.report_stop(&stop)
            }
            Command::Next(n) => self.next(n),
            Command::Go { start, until } => self.go(start, until),
            Command::Run(start) => {
                self.machine
                    .reset(&mut self.ctx, start.unwrap_or(Address::ZERO));
                self.ctx.breakpoints_mut().new_pc(0);
                let stop = self.run_machine();
                self.report_stop(&stop)
            }
            Command::Continue => {
                let stop = self.run_machine();
                self.report_stop(&stop)
            }
            Command::Load(file) => self.load_program(&PathBuf::from(file)),
            Command::Do(file) => self.do_file(&PathBuf::from(file)),
            Command::Echo(text) => self.say(&format!("{text}\n")),
            Command::Exit => {
                self.exit_requested = true;
                Ok(())
            }
        }
    }

    fn set_breakpoints(
        &mut self,
        types: BreakTypes,
        targets: &[BreakTarget],
        action: Option<&str>,
    ) -> Result<(), ScpError> {
        if targets.is_empty() {
            return self.ctx.brk_set(self.machine.pc(), types, 0, action);
        }
        for (addr, count) in addresses(targets)? {
            self.ctx.brk_set(addr, types, count, action)?;
        }
        Ok(())
    }

    fn clear_breakpoints(
        &mut self,
        types: BreakTypes,
        targets: &[BreakTarget],
    ) -> Result<(), ScpError> {
        if targets.is_empty() {
            self.ctx.brk_clr(self.machine.pc(), types);
            return Ok(());
        }
        if targets.iter().any(|t| t.range == AddressRange::All) {
            self.ctx.brk_clrall(types);
            return Ok(());
        }
        for (low, high, _) in ranges(targets)? {
            let present: Vec<Address> = self.ctx.breakpoints().addresses_in(low, high).collect();
            for addr in present {
                self.ctx.brk_clr(addr, types);
            }
        }
        Ok(())
    }

    fn show(&mut self, what: ShowWhat) -> Result<(), ScpError> {
        let text = match what {
            ShowWhat::Break(targets) => {
                if targets.is_empty() || targets.iter().any(|t| t.range == AddressRange::All) {
                    self.ctx.breakpoints().show_all(BreakTypes::NONE)
                } else {
                    let table = self.ctx.breakpoints();
                    ranges(&targets)?
                        .into_iter()
                        .flat_map(move |(low, high, _)| table.addresses_in(low, high))
                        .filter_map(move |addr| table.show(addr, BreakTypes::NONE))
                        .map(|text| format!("{text}\n"))
                        .collect()
                }
            }
            ShowWhat::Expect { line, pattern } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                self.ctx.line(id).expect.show(pattern.as_deref())
            }
            ShowWhat::Send { line } => {
                let id = self.ctx.resolve_line(line.as_deref())?;
                self.ctx.line(id).send.describe(self.ctx.gtime())
            }
            ShowWhat::Queue => self.ctx.scheduler().to_string(),
            ShowWhat::Time => format!("Time:\t{}\n", self.ctx.gtime()),
        };
        self.say(&text)
    }

    fn next(&mut self, count: u32) -> Result<(), ScpError> {
        for _ in 0..count {
            let pc = self.machine.pc();
            let calls = matches!(self.machine.instruction_at(pc), Some(Instruction::Call(_)));
            let stop = if calls {
                self.ctx
                    .brk_set(pc.successor(), BreakTypes::STEP_OVER, 0, None)?;
                let stop = self.run_machine();
                self.ctx.brk_clrall(BreakTypes::STEP_OVER);
                stop
            } else {
                self.ctx.step(1);
                let stop = self.run_machine();
                self.ctx.cancel_step();
                stop
            };
            let stepped = match &stop {
                StopReason::StepExpired => true,
                StopReason::Breakpoint { types, .. } => types.intersects(BreakTypes::STEP_OVER),
                _ => false,
            };
            if !stepped || self.exit_requested {
                return self.report_stop(&stop);
            }
        }
        self.report_stop(&StopReason::StepExpired)
    }

    fn go(&mut self, start: Option<Address>, until: Option<Until>) -> Result<(), ScpError> {
        let temporary_rule = match until {
            None => None,
            Some(Until::Address(addr)) => {
                let types = self.ctx.breakpoints().type_table().default_types();
                self.ctx.brk_set(addr, BreakTypes::TEMP | types, 0, None)?;
                None
            }
            Some(Until::Output(pattern)) => {
                // The temporary rule would replace (and then delete)
                // a rule of the user's with the same pattern.
                if self.ctx.line(CONSOLE).expect.find(&pattern).is_some() {
                    return Err(ScpError::ExpectRuleExists(pattern));
                }
                self.ctx
                    .exp_set(CONSOLE, &pattern, 0, 0, Switches::NONE, None)?;
                Some(pattern)
            }
        };
        if let Some(start) = start {
            self.machine.set_pc(start);
            self.ctx.breakpoints_mut().new_pc(0);
        }
        let stop = self.run_machine();
        self.ctx.brk_clrall(BreakTypes::TEMP);
        if let Some(pattern) = temporary_rule {
            self.ctx.line_mut(CONSOLE).expect.clear(&pattern);
        }
        self.report_stop(&stop)
    }

    fn run_machine(&mut self) -> StopReason {
        self.machine.run(&mut self.ctx, &mut self.out)
    }

    fn report_stop(&mut self, stop: &StopReason) -> Result<(), ScpError> {
        let pc = self.machine.pc();
        let message = match stop {
            StopReason::Breakpoint { types, .. } if types.intersects(BreakTypes::STEP_OVER) => {
                format!("Step expired, PC: {pc:>08o}")
            }
            StopReason::Breakpoint { message, .. } => message.clone(),
            StopReason::Halted { .. } => stop.to_string(),
            _ => format!("{stop}, PC: {pc:>08o}"),
        };
        self.say(&format!("\n{message}\n"))
    }
}

#[cfg(test)]
fn test_session() -> Session<Vec<u8>> {
    Session::new(ScpConfig::default(), false, Vec::new())
}

#[cfg(test)]
fn output_of(session: &Session<Vec<u8>>) -> String {
    String::from_utf8_lossy(session.output()).into_owned()
}

#[cfg(test)]
fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("should be able to write test file");
    path
}

#[test]
fn test_echo_and_exit() {
    let mut session = test_session();
    session
        .interact("echo hello\n; comment\nexit\necho unreachable\n".as_bytes(), false)
        .expect("input should be readable");
    assert_eq!(output_of(&session), "hello\n");
    assert!(session.exit_requested());
}

#[test]
fn test_errors_do_not_stop_the_loop() {
    let mut session = test_session();
    session
        .interact("frobnicate\nbreak -x 100\necho still here\n".as_bytes(), false)
        .expect("input should be readable");
    assert_eq!(output_of(&session), "still here\n");
}

#[test]
fn test_breakpoint_show_and_clear() {
    let mut session = test_session();
    session.execute("break 100-101").expect("valid command");
    session.execute("break -r 200[3]; echo hit").expect("valid command");
    session.execute("show break").expect("valid command");
    assert_eq!(
        output_of(&session),
        "100:\tE\n101:\tE\n200:\tR[3]; echo hit\n"
    );
    session.execute("nobreak 100").expect("valid command");
    session.execute("nobreak -r all").expect("valid command");
    let remaining: Vec<Address> = session
        .context()
        .breakpoints()
        .iter()
        .map(|bp| bp.address())
        .collect();
    assert_eq!(remaining, vec![Address::new(0o101)]);
    assert!(session.execute("break all").is_err());
}

#[test]
fn test_program_with_breakpoint_action() {
    let dir = tempfile::tempdir().expect("should be able to create a temporary directory");
    let program = write_file(&dir, "prog.txt", "NOP\nNOP\nADD 1\nHALT\n");
    let mut session = test_session();
    session.load_program(&program).expect("valid program");
    session
        .interact("break 2; echo at two\nrun\n".as_bytes(), false)
        .expect("input should be readable");
    assert_eq!(
        output_of(&session),
        concat!(
            "\nExecution Breakpoint: 00000002\n",
            "scp> echo at two\n",
            "at two\n",
        )
    );
    assert_eq!(session.machine().pc(), Address::new(2));
    session.execute("continue").expect("valid command");
    assert!(output_of(&session).ends_with("\nHALT instruction, PC: 00000003\n"));
    assert_eq!(session.machine().accumulator(), 1);
}

#[test]
fn test_step_and_next() {
    let dir = tempfile::tempdir().expect("should be able to create a temporary directory");
    let program = write_file(
        &dir,
        "prog.txt",
        "CALL 3\nADD 10\nHALT\nADD 1\nADD 1\nRETURN\n",
    );
    let mut session = test_session();
    session.load_program(&program).expect("valid program");
    session.execute("step").expect("valid command");
    assert_eq!(session.machine().pc(), Address::new(3));
    session.execute("step 2").expect("valid command");
    assert_eq!(session.machine().pc(), Address::new(5));
    session.execute("step").expect("valid command");
    assert_eq!(session.machine().pc(), Address::new(1));
    assert_eq!(session.machine().accumulator(), 2);

    session.execute("break 0").expect("valid command");
    session.execute("run").expect("valid command");
    assert_eq!(session.machine().pc(), Address::ZERO);
    session.execute("nobreak 0").expect("valid command");
    let before = output_of(&session).len();
    session.execute("next").expect("valid command");
    assert_eq!(session.machine().pc(), Address::new(1));
    assert_eq!(session.machine().accumulator(), 2);
    assert_eq!(
        &output_of(&session)[before..],
        "\nStep expired, PC: 00000001\n"
    );
    assert!(session.context().breakpoints().is_empty());
}

#[test]
fn test_go_until() {
    let dir = tempfile::tempdir().expect("should be able to create a temporary directory");
    let program = write_file(
        &dir,
        "prog.txt",
        concat!(
            "TYPE \"login: \"\n",
            "ADD 100\nADD -1\nJNZ 2\n",
            "READ\nJNZ 7\nHALT\n",
            "TYPE \"welcome\"\nJUMP 10\n",
        ),
    );
    let mut session = test_session();
    session.load_program(&program).expect("valid program");
    session.execute("go until 1").expect("valid command");
    assert_eq!(session.machine().pc(), Address::new(1));
    assert!(session.context().breakpoints().is_empty());

    session.execute(r#"go until "login: ""#).expect("valid command");
    assert!(output_of(&session).contains("login: \nExpect matched, PC: "));
    assert!(session.context().line(CONSOLE).expect.is_empty());

    session.execute(r#"send "x""#).expect("valid command");
    session.execute(r#"go until "come""#).expect("valid command");
    assert!(output_of(&session).contains("welcome\nExpect matched"));
    assert_eq!(session.machine().accumulator(), i64::from(b'x'));
}

#[test]
fn test_go_until_keeps_user_rule() {
    let mut session = test_session();
    session
        .execute(r#"expect "zz" echo user rule"#)
        .expect("valid command");
    assert_eq!(
        session.execute(r#"go until "zz""#),
        Err(ScpError::ExpectRuleExists("\"zz\"".to_string()))
    );
    let rules = session.context().expect_rules(CONSOLE);
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].action(), Some("echo user rule"));
    assert_eq!(session.machine().pc(), Address::ZERO);
}

#[test]
fn test_wide_address_ranges() {
    let mut session = test_session();
    assert!(matches!(
        session.execute("break 0-77777777"),
        Err(ScpError::RangeTooLarge { .. })
    ));
    assert!(session.context().breakpoints().is_empty());
    session.execute("break 5, 100-107").expect("valid command");
    session.execute("show break 0-77777777").expect("valid command");
    let shown = session.context().breakpoints().show_all(BreakTypes::NONE);
    assert_eq!(shown.lines().count(), 9);
    assert_eq!(output_of(&session), shown);
    session.execute("nobreak 0-77777777").expect("valid command");
    assert!(session.context().breakpoints().is_empty());
}

#[test]
fn test_expect_drives_send() {
    let dir = tempfile::tempdir().expect("should be able to create a temporary directory");
    let program = write_file(
        &dir,
        "prog.txt",
        concat!(
            "TYPE \"Password:\"\n",
            "ADD 200\nADD -1\nJNZ 2\n",
            "READ\nSTORE 100\n",
            "TYPE \"ok\"\nJUMP 7\n",
        ),
    );
    let script = write_file(
        &dir,
        "login.do",
        &format!(
            "load {}\nexpect \"word:\" send \"s\"; continue\nexpect -p \"ok\" echo done\nrun\n",
            program.display()
        ),
    );
    let mut session = Session::new(ScpConfig::default(), true, Vec::new());
    session
        .execute(&format!("do {}", script.display()))
        .expect("script should succeed");
    session.run_pending_actions();
    assert_eq!(session.machine().memory(Address::new(0o100)), i64::from(b's'));
    assert!(output_of(&session).ends_with(concat!(
        "Password:\nExpect matched, PC: 00000002\n",
        "ok\nExpect matched, PC: 00000007\n",
        "done\n",
    )));
    assert_eq!(session.context().expect_rules(CONSOLE).len(), 1);
}

#[test]
fn test_do_nesting_limit() {
    let dir = tempfile::tempdir().expect("should be able to create a temporary directory");
    let path = dir.path().join("self.do");
    fs::write(&path, format!("do {}\n", path.display())).expect("should be able to write");
    let mut session = test_session();
    assert_eq!(
        session.execute(&format!("do {}", path.display())),
        Err(ScpError::NestingTooDeep(MAX_DO_NESTING))
    );
    assert!(matches!(
        session.execute("do /nonexistent/file.do"),
        Err(ScpError::Io { .. })
    ));
}

#[test]
fn test_show_commands() {
    let mut session = test_session();
    session.execute("show queue").expect("valid command");
    session.execute("show time").expect("valid command");
    session.execute("show send").expect("valid command");
    session.execute("show expect").expect("valid command");
    assert_eq!(
        output_of(&session),
        concat!(
            "Event queue empty, time = 0\n",
            "Time:\t0\n",
            "No pending send data on CONSOLE\n",
            "No expect rules defined on CONSOLE\n",
        )
    );
    assert_eq!(
        session.execute("show send tty9"),
        Err(ScpError::UnknownLine("tty9".to_string()))
    );
}
