//! The test bench machine.
//!
//! This is a deliberately tiny computer which exists to drive the
//! simulator control program end to end: it executes instructions one
//! per unit of simulated time, tests breakpoints where a real
//! processor would, writes to a paced console, and reads console input
//! injected by `SEND`.
//!
//! Programs are text, one instruction per line, loaded at address 0.
//! Blank lines and lines starting with `;` or `#` are ignored (and do
//! not occupy an address).  Addresses are octal, `ADD` operands are
//! signed decimal.
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io::Write;

use tracing::{event, Level};

use base::prelude::*;
use scp::{
    tokenize, BreakTypeTable, BreakTypes, Lexeme, SendPoll, SimulationContext, StopReason, Token,
    CONSOLE,
};

use super::console::ConsoleOutput;

/// Breakpoint types tested at every instruction.
pub const EXECUTE: BreakTypes = BreakTypes::letter('E');
/// Breakpoint types tested when an instruction is fetched.
pub const FETCH: BreakTypes = BreakTypes::letter('N');
pub const READ: BreakTypes = BreakTypes::letter('R');
pub const WRITE: BreakTypes = BreakTypes::letter('W');

const EXECUTE_SPACE: usize = 0;
const FETCH_SPACE: usize = 1;
const DATA_SPACE: usize = 2;

/// The breakpoint types this machine supports.
#[must_use]
pub fn break_types() -> BreakTypeTable {
    BreakTypeTable::new(
        'E',
        &[
            ('E', "Execution"),
            ('N', "Instruction fetch"),
            ('R', "Read"),
            ('W', "Write"),
        ],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Halt,
    Type(Vec<u8>),
    Read,
    Load(Address),
    Store(Address),
    Add(i64),
    Jump(Address),
    Jnz(Address),
    Call(Address),
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramError {
    pub line_number: usize,
    pub message: String,
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "line {}: {}", self.line_number, self.message)
    }
}

impl Error for ProgramError {}

fn describe(lexeme: Lexeme<'_>) -> String {
    match lexeme {
        Ok(token) => token.to_string(),
        Err(text) => text.to_string(),
    }
}

fn parse_instruction(text: &str) -> Result<Instruction, String> {
    // Anything after a semicolon is a comment.
    let mut lexemes = tokenize(text)
        .into_iter()
        .map(|(lexeme, _)| lexeme)
        .take_while(|lexeme| *lexeme != Ok(Token::Semicolon));
    let opcode = match lexemes.next() {
        Some(Ok(Token::Word(word))) => word.to_ascii_uppercase(),
        Some(other) => return Err(format!("expected an instruction, found {}", describe(other))),
        None => return Err("missing instruction".to_string()),
    };
    let operand = lexemes.next();
    if let Some(extra) = lexemes.next() {
        return Err(format!("{opcode}: unexpected {}", describe(extra)));
    }
    let address = || -> Result<Address, String> {
        match operand {
            Some(Ok(Token::Word(word))) => word
                .parse::<Address>()
                .map_err(|e| format!("{opcode}: {e}")),
            Some(other) => Err(format!("{opcode}: expected an address, found {}", describe(other))),
            None => Err(format!("{opcode} needs an address")),
        }
    };
    let no_operand = |instruction: Instruction| -> Result<Instruction, String> {
        match operand {
            None => Ok(instruction),
            Some(_) => Err(format!("{opcode} takes no operand")),
        }
    };
    match opcode.as_str() {
        "NOP" => no_operand(Instruction::Nop),
        "HALT" => no_operand(Instruction::Halt),
        "READ" => no_operand(Instruction::Read),
        "RETURN" => no_operand(Instruction::Return),
        "LOAD" => address().map(Instruction::Load),
        "STORE" => address().map(Instruction::Store),
        "JUMP" => address().map(Instruction::Jump),
        "JNZ" => address().map(Instruction::Jnz),
        "CALL" => address().map(Instruction::Call),
        "TYPE" => match operand {
            Some(Ok(Token::Quoted(quoted))) => decode_quoted_string(quoted)
                .map(Instruction::Type)
                .map_err(|e| format!("TYPE: {e}")),
            Some(Err(text)) => Err(format!("TYPE: unterminated string {text}")),
            _ => Err("TYPE needs a quoted string".to_string()),
        },
        "ADD" => match operand {
            Some(Ok(Token::Word(word))) => word
                .parse::<i64>()
                .map(Instruction::Add)
                .map_err(|_| format!("ADD: '{word}' is not a decimal number")),
            _ => Err("ADD needs a decimal number".to_string()),
        },
        _ => Err(format!("unknown instruction '{opcode}'")),
    }
}

/// Parse a program.
///
/// # Errors
///
/// The first line which is not a valid instruction.
pub fn parse_program(text: &str) -> Result<Vec<Instruction>, ProgramError> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !(line.is_empty() || line.starts_with(';') || line.starts_with('#')))
        .map(|(line_number, line)| {
            parse_instruction(line).map_err(|message| ProgramError {
                line_number,
                message,
            })
        })
        .collect()
}

fn check_break(
    ctx: &mut SimulationContext,
    addr: Address,
    types: BreakTypes,
    space: usize,
) -> Result<(), StopReason> {
    if ctx.breakpoints().summary().is_empty() {
        return Ok(());
    }
    match ctx.brk_test(addr, types.in_space(space)) {
        Some(stop) => Err(stop),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub struct Machine {
    program: Vec<Instruction>,
    memory: BTreeMap<Address, i64>,
    pc: Address,
    accumulator: i64,
    stack: Vec<Address>,
    console: ConsoleOutput,
}

impl Machine {
    pub fn new(ctx: &mut SimulationContext) -> Machine {
        Machine {
            program: Vec::new(),
            memory: BTreeMap::new(),
            pc: Address::ZERO,
            accumulator: 0,
            stack: Vec::new(),
            console: ConsoleOutput::new(ctx.scheduler_mut()),
        }
    }

    /// Replace the program and clear data memory.
    pub fn load(&mut self, program: Vec<Instruction>) {
        event!(Level::INFO, "loaded {} instructions", program.len());
        self.program = program;
        self.memory.clear();
    }

    /// Put the processor back in its initial state, starting at
    /// `start`.  Memory is kept.
    pub fn reset(&mut self, ctx: &mut SimulationContext, start: Address) {
        self.pc = start;
        self.accumulator = 0;
        self.stack.clear();
        self.console.reset(ctx.scheduler_mut());
    }

    #[must_use]
    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Address) {
        self.pc = pc;
    }

    #[cfg(test)]
    pub fn accumulator(&self) -> i64 {
        self.accumulator
    }

    #[must_use]
    pub fn memory(&self, addr: Address) -> i64 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn instruction_at(&self, addr: Address) -> Option<&Instruction> {
        self.program.get(usize::from(addr))
    }

    /// Run until something stops the simulation.  Console output is
    /// written to `out` as the console emits it.
    pub fn run<W: Write>(&mut self, ctx: &mut SimulationContext, out: &mut W) -> StopReason {
        event!(Level::DEBUG, "running from {:>08o}", self.pc);
        loop {
            if let Err(stop) = self.run_slice(ctx, out) {
                event!(Level::DEBUG, "stopped at {:>08o}: {}", self.pc, stop);
                return stop;
            }
        }
    }

    fn run_slice<W: Write>(
        &mut self,
        ctx: &mut SimulationContext,
        out: &mut W,
    ) -> Result<(), StopReason> {
        if ctx.scheduler().interval() <= 0 {
            let status = ctx.process_event(&mut self.console);
            self.flush_console(ctx, out)?;
            return status;
        }
        self.execute(ctx)
    }

    fn flush_console<W: Write>(
        &mut self,
        ctx: &mut SimulationContext,
        out: &mut W,
    ) -> Result<(), StopReason> {
        let emitted = self.console.take_emitted();
        if emitted.is_empty() {
            return Ok(());
        }
        out.write_all(&emitted)
            .and_then(|()| out.flush())
            .map_err(|e| StopReason::Device {
                unit: "CONSOLE".to_string(),
                message: e.to_string(),
            })?;
        for byte in emitted {
            ctx.exp_check(CONSOLE, byte);
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut SimulationContext) -> Result<(), StopReason> {
        let pc = self.pc;
        check_break(ctx, pc, EXECUTE, EXECUTE_SPACE)?;
        check_break(ctx, pc, FETCH, FETCH_SPACE)?;
        let Some(instruction) = self.program.get(usize::from(pc)).cloned() else {
            return Err(StopReason::Device {
                unit: "CPU".to_string(),
                message: format!("no instruction at {pc:>08o}"),
            });
        };
        let next = pc.successor();
        match instruction {
            Instruction::Nop => self.pc = next,
            Instruction::Halt => {
                ctx.scheduler_mut().consume(1);
                self.pc = next;
                return Err(StopReason::Halted { address: pc });
            }
            Instruction::Type(text) => {
                self.console.write(ctx.scheduler_mut(), &text);
                self.pc = next;
            }
            Instruction::Read => match ctx.send_poll(CONSOLE) {
                SendPoll::Injected(byte) => {
                    self.accumulator = i64::from(byte);
                    self.pc = next;
                }
                // Wait for the input to arrive.
                SendPoll::NotYet => (),
                SendPoll::Idle => {
                    return Err(StopReason::Device {
                        unit: "CONSOLE".to_string(),
                        message: "no input available".to_string(),
                    });
                }
            },
            Instruction::Load(addr) => {
                check_break(ctx, addr, READ, DATA_SPACE)?;
                self.accumulator = self.memory(addr);
                self.pc = next;
            }
            Instruction::Store(addr) => {
                check_break(ctx, addr, WRITE, DATA_SPACE)?;
                self.memory.insert(addr, self.accumulator);
                self.pc = next;
            }
            Instruction::Add(n) => {
                self.accumulator = self.accumulator.wrapping_add(n);
                self.pc = next;
            }
            Instruction::Jump(addr) => self.pc = addr,
            Instruction::Jnz(addr) => {
                self.pc = if self.accumulator != 0 { addr } else { next };
            }
            Instruction::Call(addr) => {
                self.stack.push(next);
                self.pc = addr;
            }
            Instruction::Return => match self.stack.pop() {
                Some(addr) => self.pc = addr,
                None => {
                    return Err(StopReason::Device {
                        unit: "CPU".to_string(),
                        message: format!("RETURN with empty stack at {pc:>08o}"),
                    });
                }
            },
        }
        ctx.scheduler_mut().consume(1);
        Ok(())
    }
}

#[cfg(test)]
fn test_machine(program: &str) -> (SimulationContext, Machine) {
    let mut ctx = SimulationContext::new(scp::ScpConfig::default(), break_types());
    let mut machine = Machine::new(&mut ctx);
    machine.load(parse_program(program).expect("test program should be valid"));
    (ctx, machine)
}

#[test]
fn test_parse_program() {
    let program = parse_program(
        "; count down\n\
         LOAD 100\n\
         \n\
         add -1 ; decrement\n\
         STORE 100\n\
         JNZ 0\n\
         TYPE \"done\\r\\n\"\n\
         halt\n",
    )
    .expect("valid program");
    assert_eq!(
        program,
        vec![
            Instruction::Load(Address::new(0o100)),
            Instruction::Add(-1),
            Instruction::Store(Address::new(0o100)),
            Instruction::Jnz(Address::ZERO),
            Instruction::Type(b"done\r\n".to_vec()),
            Instruction::Halt,
        ]
    );
    assert_eq!(
        parse_program("NOP\nFLY 3\n"),
        Err(ProgramError {
            line_number: 2,
            message: "unknown instruction 'FLY'".to_string(),
        })
    );
    assert!(parse_program("JUMP 8").is_err());
    assert!(parse_program("HALT 1").is_err());
    assert!(parse_program("TYPE hello").is_err());
    assert!(parse_program("TYPE \"open").is_err());
    assert_eq!(
        parse_program("TYPE \"a;b\" ; says a;b\nADD 1 2\n"),
        Err(ProgramError {
            line_number: 2,
            message: "ADD: unexpected 2".to_string(),
        })
    );
}

#[test]
fn test_halt() {
    let (mut ctx, mut machine) = test_machine("NOP\nADD 5\nHALT\n");
    let mut out = Vec::new();
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Halted {
            address: Address::new(2)
        }
    );
    assert_eq!(machine.pc(), Address::new(3));
    assert_eq!(machine.accumulator(), 5);
    assert_eq!(ctx.gtime(), 3);
}

#[test]
fn test_running_off_the_end() {
    let (mut ctx, mut machine) = test_machine("NOP\n");
    let mut out = Vec::new();
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Device {
            unit: "CPU".to_string(),
            message: "no instruction at 00000001".to_string(),
        }
    );
}

#[test]
fn test_console_output_and_expect() {
    let (mut ctx, mut machine) = test_machine("TYPE \"hello\"\nJUMP 1\n");
    ctx.exp_set(CONSOLE, "\"ll\"", 0, 0, Switches::NONE, None)
        .expect("valid rule");
    let mut out = Vec::new();
    assert_eq!(machine.run(&mut ctx, &mut out), StopReason::ExpectMatched);
    assert_eq!(out, b"hell");
    assert_eq!(ctx.gtime(), 40);
}

#[test]
fn test_execution_breakpoint_and_resume() {
    let (mut ctx, mut machine) = test_machine("NOP\nNOP\nHALT\n");
    ctx.brk_set(Address::new(1), EXECUTE, 0, None)
        .expect("valid breakpoint");
    let mut out = Vec::new();
    let stop = machine.run(&mut ctx, &mut out);
    assert_eq!(stop.to_string(), "Execution Breakpoint: 00000001");
    assert_eq!(machine.pc(), Address::new(1));
    // Resuming at the same instant does not hit the same breakpoint.
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Halted {
            address: Address::new(2)
        }
    );
}

#[test]
fn test_data_breakpoints() {
    let (mut ctx, mut machine) = test_machine("ADD 7\nSTORE 40\nLOAD 40\nHALT\n");
    ctx.brk_set(Address::new(0o40), READ | WRITE, 0, None)
        .expect("valid breakpoint");
    let mut out = Vec::new();
    let stop = machine.run(&mut ctx, &mut out);
    assert_eq!(machine.pc(), Address::new(1));
    assert!(matches!(stop, StopReason::Breakpoint { types, .. } if types == WRITE));
    assert_eq!(machine.memory(Address::new(0o40)), 0);
    let stop = machine.run(&mut ctx, &mut out);
    assert!(matches!(stop, StopReason::Breakpoint { types, .. } if types == READ));
    assert_eq!(machine.memory(Address::new(0o40)), 7);
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Halted {
            address: Address::new(3)
        }
    );
    assert_eq!(machine.accumulator(), 7);
}

#[test]
fn test_read_waits_for_send() {
    let (mut ctx, mut machine) = test_machine("READ\nHALT\n");
    let mut out = Vec::new();
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Device {
            unit: "CONSOLE".to_string(),
            message: "no input available".to_string(),
        }
    );
    ctx.send_input(CONSOLE, b"A", 0, 50, false);
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Halted {
            address: Address::new(1)
        }
    );
    assert_eq!(machine.accumulator(), 65);
    assert_eq!(ctx.gtime(), 52);
}

#[test]
fn test_call_and_return() {
    let (mut ctx, mut machine) = test_machine("CALL 3\nHALT\nNOP\nADD 2\nRETURN\n");
    let mut out = Vec::new();
    assert_eq!(
        machine.run(&mut ctx, &mut out),
        StopReason::Halted {
            address: Address::new(1)
        }
    );
    assert_eq!(machine.accumulator(), 2);
    machine.reset(&mut ctx, Address::new(4));
    assert!(matches!(
        machine.run(&mut ctx, &mut out),
        StopReason::Device { unit, .. } if unit == "CPU"
    ));
}
