//! The simulation context.
//!
//! A [`SimulationContext`] owns the event scheduler, the breakpoint
//! table, the pending action queue and the expect/send state of each
//! line.  The command loop owns one of these and lends it to the
//! machine while the simulation runs.
use tracing::{event, Level};

use base::prelude::*;

use super::action::ActionQueue;
use super::breakpoint::{BreakTypeTable, BreakTypes, BreakpointTable};
use super::config::ScpConfig;
use super::expect::{ExpectContext, ExpectRule};
use super::scheduler::{EventHandler, Scheduler, SimTime, UnitId};
use super::send::{SendContext, SendPoll};
use super::status::{ScpError, StopReason};

/// Identifies a line (a console or terminal connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(usize);

/// The console line, which always exists.
pub const CONSOLE: LineId = LineId(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub name: String,
    pub expect: ExpectContext,
    pub send: SendContext,
}

/// Fires the context's own units and passes everything else on to
/// the machine.
struct ContextUnits<'a, H: ?Sized> {
    expect_unit: UnitId,
    step_unit: UnitId,
    machine: &'a mut H,
}

impl<H> EventHandler for ContextUnits<'_, H>
where
    H: EventHandler + ?Sized,
{
    fn on_event(&mut self, scheduler: &mut Scheduler, unit: UnitId) -> Result<(), StopReason> {
        if unit == self.expect_unit {
            Err(StopReason::ExpectMatched)
        } else if unit == self.step_unit {
            Err(StopReason::StepExpired)
        } else {
            self.machine.on_event(scheduler, unit)
        }
    }
}

#[derive(Debug)]
pub struct SimulationContext {
    config: ScpConfig,
    scheduler: Scheduler,
    breakpoints: BreakpointTable,
    actions: ActionQueue,
    lines: Vec<Line>,
    expect_unit: UnitId,
    step_unit: UnitId,
}

impl SimulationContext {
    #[must_use]
    pub fn new(config: ScpConfig, break_types: BreakTypeTable) -> SimulationContext {
        let mut scheduler = Scheduler::new(&config);
        let expect_unit = scheduler.register("EXPECT");
        let step_unit = scheduler.register("STEP");
        let mut context = SimulationContext {
            config,
            scheduler,
            breakpoints: BreakpointTable::new(break_types),
            actions: ActionQueue::new(),
            lines: Vec::new(),
            expect_unit,
            step_unit,
        };
        context.add_line("CONSOLE");
        context
    }

    #[must_use]
    pub fn config(&self) -> &ScpConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointTable {
        &mut self.breakpoints
    }

    #[must_use]
    pub fn gtime(&self) -> SimTime {
        self.scheduler.gtime()
    }

    /// Register a line.  Lines are named case-insensitively; adding
    /// a name which already exists returns the existing line.
    pub fn add_line(&mut self, name: &str) -> LineId {
        if let Some(id) = self.find_line(name) {
            return id;
        }
        let name = name.to_ascii_uppercase();
        event!(Level::DEBUG, "adding line {}", name);
        self.lines.push(Line {
            expect: ExpectContext::new(&name),
            send: SendContext::new(&name, self.config.send_default_delay),
            name,
        });
        LineId(self.lines.len() - 1)
    }

    #[must_use]
    pub fn find_line(&self, name: &str) -> Option<LineId> {
        self.lines
            .iter()
            .position(|line| line.name.eq_ignore_ascii_case(name))
            .map(LineId)
    }

    /// Look up a line by name; no name means the console.
    ///
    /// # Errors
    ///
    /// [`ScpError::UnknownLine`] if there is no such line.
    pub fn resolve_line(&self, name: Option<&str>) -> Result<LineId, ScpError> {
        match name {
            None => Ok(CONSOLE),
            Some(name) => self
                .find_line(name)
                .ok_or_else(|| ScpError::UnknownLine(name.to_string())),
        }
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this context.
    #[must_use]
    pub fn line(&self, id: LineId) -> &Line {
        &self.lines[id.0]
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this context.
    pub fn line_mut(&mut self, id: LineId) -> &mut Line {
        &mut self.lines[id.0]
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    /// Remove all breakpoints and forget any pending actions.
    pub fn brk_init(&mut self) {
        self.breakpoints.init();
        self.actions.clear();
    }

    /// # Errors
    ///
    /// See [`BreakpointTable::set`].
    pub fn brk_set(
        &mut self,
        addr: Address,
        types: BreakTypes,
        count: u32,
        action: Option<&str>,
    ) -> Result<(), ScpError> {
        self.breakpoints.set(addr, types, count, action)
    }

    pub fn brk_clr(&mut self, addr: Address, types: BreakTypes) {
        self.breakpoints.clear(addr, types);
    }

    pub fn brk_clrall(&mut self, types: BreakTypes) {
        self.breakpoints.clear_all(types);
    }

    /// Test for a breakpoint at the current simulated time.  When one
    /// fires its action is staged and the reason to stop is returned.
    pub fn brk_test(&mut self, addr: Address, types: BreakTypes) -> Option<StopReason> {
        let now = self.scheduler.gtime();
        let hit = self.breakpoints.test(addr, types, now)?;
        if let Some(action) = hit.action.as_deref() {
            self.actions.stage(action);
        }
        let message = self
            .breakpoints
            .last_match_message()
            .unwrap_or_else(|| format!("Breakpoint at {addr:>08o}"));
        Some(StopReason::Breakpoint {
            address: hit.address,
            types: hit.types,
            message,
        })
    }

    /// Stage commands to run before the command loop reads more
    /// input.
    pub fn stage_action(&mut self, action: &str) {
        self.actions.stage(action);
    }

    /// The next pending command, if any.
    pub fn next_pending_command(&mut self) -> Option<String> {
        self.actions.next_command()
    }

    pub fn clear_pending_commands(&mut self) {
        self.actions.clear();
    }

    /// # Errors
    ///
    /// See [`ExpectContext::set`].
    pub fn exp_set(
        &mut self,
        line: LineId,
        pattern: &str,
        count: u32,
        after: u32,
        switches: Switches,
        action: Option<&str>,
    ) -> Result<(), ScpError> {
        self.line_mut(line)
            .expect
            .set(pattern, count, after, switches, action)
    }

    /// Feed one byte of output on `line` to its expect rules.  When a
    /// rule fires its action is staged and the simulation is set to
    /// stop once the halt-after delay has passed.
    pub fn exp_check(&mut self, line: LineId, byte: u8) {
        let Some(matched) = self.line_mut(line).expect.check(byte) else {
            return;
        };
        if let Some(action) = matched.action.as_deref() {
            self.actions.stage(action);
        }
        let delay = if matched.after_in_usecs {
            self.config.usecs_to_instructions(matched.after)
        } else {
            i32::try_from(matched.after).unwrap_or(i32::MAX)
        };
        event!(
            Level::DEBUG,
            "expect {} matched, stopping in {} instructions",
            matched.pattern,
            delay
        );
        self.scheduler.activate(self.expect_unit, delay);
    }

    #[must_use]
    pub fn expect_rules(&self, line: LineId) -> Vec<&ExpectRule> {
        self.line(line).expect.rules().collect()
    }

    /// Queue `data` for injection on `line`.  When `usecs` is set,
    /// `after` and `delay` are in microseconds.
    pub fn send_input(&mut self, line: LineId, data: &[u8], after: u32, delay: u32, usecs: bool) {
        let (after, delay) = if usecs {
            (
                self.usecs_to_delay(after),
                self.usecs_to_delay(delay),
            )
        } else {
            (after, delay)
        };
        let now = self.scheduler.gtime();
        self.line_mut(line).send.input(data, after, delay, now);
    }

    fn usecs_to_delay(&self, usecs: u32) -> u32 {
        u32::try_from(self.config.usecs_to_instructions(usecs)).unwrap_or(0)
    }

    /// Poll `line` for injected input.
    pub fn send_poll(&mut self, line: LineId) -> SendPoll {
        let now = self.scheduler.gtime();
        self.line_mut(line).send.poll(now)
    }

    /// Stop after `count` more instructions.
    pub fn step(&mut self, count: i32) {
        self.scheduler.activate_abs(self.step_unit, count);
    }

    pub fn cancel_step(&mut self) {
        self.scheduler.cancel(self.step_unit);
    }

    /// Fire due events.  The context's own units stop the
    /// simulation; the others are passed to `machine`.
    ///
    /// # Errors
    ///
    /// The reason the simulation should stop.
    pub fn process_event<H>(&mut self, machine: &mut H) -> Result<(), StopReason>
    where
        H: EventHandler + ?Sized,
    {
        let mut units = ContextUnits {
            expect_unit: self.expect_unit,
            step_unit: self.step_unit,
            machine,
        };
        self.scheduler.process_event(&mut units)
    }

    /// Ask the simulation to stop at the next event.
    pub fn request_stop(&mut self) {
        self.scheduler.request_stop();
    }
}

#[cfg(test)]
fn no_devices(_: &mut Scheduler, unit: UnitId) -> Result<(), StopReason> {
    panic!("unexpected event for {unit}");
}

#[cfg(test)]
fn run_until_stop(ctx: &mut SimulationContext, limit: i32) -> Option<StopReason> {
    for _ in 0..limit {
        if ctx.scheduler().interval() <= 0 {
            if let Err(stop) = ctx.process_event(&mut no_devices) {
                return Some(stop);
            }
        }
        ctx.scheduler_mut().consume(1);
    }
    None
}

#[test]
fn test_console_always_exists() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    assert_eq!(ctx.resolve_line(None), Ok(CONSOLE));
    assert_eq!(ctx.resolve_line(Some("console")), Ok(CONSOLE));
    assert_eq!(
        ctx.resolve_line(Some("TTY1")),
        Err(ScpError::UnknownLine("TTY1".to_string()))
    );
    let tty = ctx.add_line("tty1");
    assert_eq!(ctx.resolve_line(Some("TTY1")), Ok(tty));
    assert_eq!(ctx.add_line("TTY1"), tty);
    assert_eq!(ctx.line(tty).name, "TTY1");
}

#[test]
fn test_breakpoint_stages_action() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    let e = BreakTypes::letter('E');
    let addr = Address::new(0o40);
    ctx.brk_set(addr, e, 0, Some("echo one; echo two"))
        .expect("valid breakpoint");
    let stop = ctx.brk_test(addr, e).expect("fires");
    assert_eq!(
        stop,
        StopReason::Breakpoint {
            address: addr,
            types: e,
            message: "Execution Breakpoint: 00000040".to_string(),
        }
    );
    // Same instant: debounced.
    assert_eq!(ctx.brk_test(addr, e), None);
    assert_eq!(ctx.next_pending_command().as_deref(), Some("echo one"));
    assert_eq!(ctx.next_pending_command().as_deref(), Some("echo two"));
    assert_eq!(ctx.next_pending_command(), None);
}

#[test]
fn test_two_triggers_run_in_order() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    let e = BreakTypes::letter('E');
    ctx.brk_set(Address::new(1), e, 0, Some("echo bp"))
        .expect("valid breakpoint");
    ctx.exp_set(CONSOLE, "\"!\"", 0, 0, Switches::NONE, Some("echo expect"))
        .expect("valid rule");
    ctx.exp_check(CONSOLE, b'!');
    assert!(ctx.brk_test(Address::new(1), e).is_some());
    assert_eq!(ctx.next_pending_command().as_deref(), Some("echo expect"));
    assert_eq!(ctx.next_pending_command().as_deref(), Some("echo bp"));
}

#[test]
fn test_brk_init_clears_pending_actions() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    ctx.stage_action("echo x");
    ctx.brk_set(Address::new(1), BreakTypes::NONE, 0, None)
        .expect("valid breakpoint");
    ctx.brk_init();
    assert!(ctx.breakpoints().is_empty());
    assert_eq!(ctx.next_pending_command(), None);
}

#[test]
fn test_expect_stops_after_halt_after_delay() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    ctx.exp_set(CONSOLE, "\"ok\"", 0, 25, Switches::NONE, None)
        .expect("valid rule");
    ctx.exp_check(CONSOLE, b'o');
    ctx.exp_check(CONSOLE, b'k');
    let start = ctx.gtime();
    assert_eq!(run_until_stop(&mut ctx, 100), Some(StopReason::ExpectMatched));
    assert_eq!(ctx.gtime() - start, 25);
}

#[test]
fn test_expect_halt_after_in_microseconds() {
    let config = ScpConfig {
        instructions_per_second: 2_000_000,
        ..ScpConfig::default()
    };
    let mut ctx = SimulationContext::new(config, BreakTypeTable::default());
    ctx.exp_set(CONSOLE, "\"!\"", 0, 10, super::expect::TIME_IN_USECS, None)
        .expect("valid rule");
    ctx.exp_check(CONSOLE, b'!');
    assert_eq!(run_until_stop(&mut ctx, 100), Some(StopReason::ExpectMatched));
    assert_eq!(ctx.gtime(), 20);
}

#[test]
fn test_step() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    ctx.step(7);
    assert_eq!(run_until_stop(&mut ctx, 100), Some(StopReason::StepExpired));
    assert_eq!(ctx.gtime(), 7);
    ctx.step(7);
    ctx.cancel_step();
    assert_eq!(run_until_stop(&mut ctx, 100), None);
}

#[test]
fn test_send_uses_simulated_time() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    ctx.send_input(CONSOLE, b"ab", 0, 3, false);
    assert_eq!(ctx.send_poll(CONSOLE), SendPoll::NotYet);
    ctx.scheduler_mut().consume(3);
    assert_eq!(ctx.send_poll(CONSOLE), SendPoll::Injected(b'a'));
    assert_eq!(ctx.send_poll(CONSOLE), SendPoll::NotYet);
    ctx.scheduler_mut().consume(3);
    assert_eq!(ctx.send_poll(CONSOLE), SendPoll::Injected(b'b'));
    assert_eq!(ctx.send_poll(CONSOLE), SendPoll::Idle);
}

#[test]
fn test_machine_units_reach_the_machine() {
    let mut ctx = SimulationContext::new(ScpConfig::default(), BreakTypeTable::default());
    let device = ctx.scheduler_mut().register("DEV");
    ctx.scheduler_mut().activate(device, 2);
    let mut seen = Vec::new();
    let mut machine = |_: &mut Scheduler, unit: UnitId| -> Result<(), StopReason> {
        seen.push(unit);
        Ok(())
    };
    ctx.scheduler_mut().consume(2);
    ctx.process_event(&mut machine).expect("device does not stop");
    assert_eq!(seen, vec![device]);
}
