//! The breakpoint table.
//!
//! Each address may carry several breakpoint records, at most one per
//! exact set of types.  The machine calls [`BreakpointTable::test`]
//! at instruction boundaries and memory accesses; the command loop
//! sets, clears and shows breakpoints.
//!
//! A record remembers, for each debounce space, the simulated time
//! at which it last matched.  It cannot match again in the same space
//! at the same instant, so a single access checked from more than
//! one place (or re-checked after the simulation resumes) only
//! counts once.
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use super::scheduler::SimTime;
use super::status::ScpError;

mod types;

pub use types::{BreakTypeDesc, BreakTypeTable, BreakTypes, SPACES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    address: Address,
    types: BreakTypes,
    count: u32,
    action: Option<String>,
    time_fired: [Option<SimTime>; SPACES],
}

impl Breakpoint {
    fn new(address: Address, types: BreakTypes) -> Breakpoint {
        Breakpoint {
            address,
            types,
            count: 0,
            action: None,
            time_fired: [None; SPACES],
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn types(&self) -> BreakTypes {
        self.types
    }

    /// The number of further matches needed before this breakpoint
    /// fires.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    #[must_use]
    pub fn time_fired(&self, space: usize) -> Option<SimTime> {
        self.time_fired.get(space).copied().flatten()
    }
}

/// Shows the record the way `SHOW BREAK` lists it, for example
/// `100:\tE[3]; echo hit`.
impl Display for Breakpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:\t{}", self.address, self.types)?;
        if self.count > 0 {
            write!(f, "[{}]", self.count)?;
        }
        if let Some(action) = self.action.as_deref() {
            write!(f, "; {action}")?;
        }
        Ok(())
    }
}

/// A breakpoint which fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointHit {
    pub address: Address,
    /// The tested types which the breakpoint matched.
    pub types: BreakTypes,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointTable {
    type_table: BreakTypeTable,
    records: BTreeMap<Address, Vec<Breakpoint>>,
    summary: BreakTypes,
    last_match: Option<(Address, BreakTypes)>,
}

impl BreakpointTable {
    #[must_use]
    pub fn new(type_table: BreakTypeTable) -> BreakpointTable {
        BreakpointTable {
            type_table,
            records: BTreeMap::new(),
            summary: BreakTypes::NONE,
            last_match: None,
        }
    }

    #[must_use]
    pub fn type_table(&self) -> &BreakTypeTable {
        &self.type_table
    }

    /// Remove every breakpoint.
    pub fn init(&mut self) {
        event!(Level::DEBUG, "clearing the breakpoint table");
        self.records.clear();
        self.summary = BreakTypes::NONE;
        self.last_match = None;
    }

    /// The union of the types of all breakpoints (except the
    /// temporary flag).  Callers check this before calling
    /// [`BreakpointTable::test`].
    #[must_use]
    pub fn summary(&self) -> BreakTypes {
        self.summary
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.records.values().flatten()
    }

    /// The addresses from `low` to `high` (inclusive) which have
    /// breakpoints.
    pub fn addresses_in(&self, low: Address, high: Address) -> impl Iterator<Item = Address> + '_ {
        self.records.range(low..=high).map(|(addr, _)| *addr)
    }

    /// The record at `addr` whose types are exactly `types`.
    #[must_use]
    pub fn find(&self, addr: Address, types: BreakTypes) -> Option<&Breakpoint> {
        let types = types.without_space();
        self.records
            .get(&addr)
            .and_then(|chain| chain.iter().find(|bp| bp.types == types))
    }

    fn position_ex(
        &self,
        addr: Address,
        types: BreakTypes,
        any_type: bool,
        space: usize,
        now: SimTime,
    ) -> Option<usize> {
        let types = types.without_space();
        let chain = self.records.get(&addr)?;
        chain.iter().position(|bp| {
            if any_type {
                bp.types.intersects(types) && bp.time_fired(space) != Some(now)
            } else {
                bp.types == types
            }
        })
    }

    /// Find a record at `addr`.  When `any_type` is false, the record
    /// whose types are exactly `types`.  Otherwise the first record
    /// with any of `types` which has not already matched in `space`
    /// at time `now`.
    #[must_use]
    pub fn find_ex(
        &self,
        addr: Address,
        types: BreakTypes,
        any_type: bool,
        space: usize,
        now: SimTime,
    ) -> Option<&Breakpoint> {
        let index = self.position_ex(addr, types, any_type, space, now)?;
        self.records.get(&addr).and_then(|chain| chain.get(index))
    }

    /// Set (or update) the breakpoint at `addr` with exactly `types`.
    ///
    /// No types (or only the step-over type) means the machine's
    /// default types.  A missing or empty `action` leaves any existing
    /// action alone.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if `types` names a letter the
    /// machine does not support, or if an action is given for a
    /// dynamic breakpoint.
    pub fn set(
        &mut self,
        addr: Address,
        types: BreakTypes,
        count: u32,
        action: Option<&str>,
    ) -> Result<(), ScpError> {
        let mut types = types.without_space();
        if types.is_empty() || types == BreakTypes::STEP_OVER {
            types |= self.type_table.default_types();
        }
        let unsupported = types.letters() & !self.type_table.supported().letters();
        if !unsupported.is_empty() {
            return Err(ScpError::UnknownBreakpointType(unsupported));
        }
        let action = action.map(str::trim).filter(|a| !a.is_empty());
        if types.intersects(BreakTypes::DYNAMIC) && action.is_some() {
            return Err(ScpError::ActionOnDynamicBreakpoint);
        }
        let chain = self.records.entry(addr).or_default();
        let index = match chain.iter().position(|bp| bp.types == types) {
            Some(index) => index,
            None => {
                chain.push(Breakpoint::new(addr, types));
                chain.len() - 1
            }
        };
        let bp = &mut chain[index];
        bp.count = count;
        if let Some(action) = action {
            bp.action = Some(action.to_string());
        }
        event!(Level::DEBUG, "set breakpoint {}", bp);
        self.summary |= types & !BreakTypes::TEMP;
        Ok(())
    }

    fn recompute_summary(&mut self) {
        self.summary = self
            .iter()
            .fold(BreakTypes::NONE, |acc, bp| acc | (bp.types & !BreakTypes::TEMP));
    }

    fn clear_matching(chain: &mut Vec<Breakpoint>, types: BreakTypes) {
        chain.retain(|bp| {
            let doomed = bp.types.intersects(types);
            if doomed {
                event!(Level::DEBUG, "clearing breakpoint {}", bp);
            }
            !doomed
        });
    }

    fn clear_mask(types: BreakTypes) -> BreakTypes {
        let types = types.without_space();
        if types.is_empty() {
            !BreakTypes::NONE
        } else {
            types
        }
    }

    /// Remove the breakpoints at `addr` which have any of `types`
    /// (all of them, if `types` is empty).
    pub fn clear(&mut self, addr: Address, types: BreakTypes) {
        let types = BreakpointTable::clear_mask(types);
        if let Some(chain) = self.records.get_mut(&addr) {
            BreakpointTable::clear_matching(chain, types);
            if chain.is_empty() {
                self.records.remove(&addr);
            }
        }
        self.recompute_summary();
    }

    /// Remove the breakpoints at every address which have any of
    /// `types` (all of them, if `types` is empty).
    pub fn clear_all(&mut self, types: BreakTypes) {
        let types = BreakpointTable::clear_mask(types);
        for chain in self.records.values_mut() {
            BreakpointTable::clear_matching(chain, types);
        }
        self.records.retain(|_, chain| !chain.is_empty());
        self.recompute_summary();
    }

    /// Test for a breakpoint at `addr` with any of `types`; the space
    /// encoded in `types` selects the debounce space.  Dynamic
    /// breakpoints match any test while they exist.
    ///
    /// A record which matches but still has a positive count counts
    /// down and does not fire.
    pub fn test(&mut self, addr: Address, types: BreakTypes, now: SimTime) -> Option<BreakpointHit> {
        let space = types.space();
        let mut types = types.without_space();
        if self.summary.intersects(BreakTypes::DYNAMIC) {
            types |= BreakTypes::DYNAMIC;
        }
        let index = self.position_ex(addr, types, true, space, now)?;
        let chain = self.records.get_mut(&addr)?;
        let bp = chain.get_mut(index)?;
        bp.time_fired[space] = Some(now);
        if bp.count > 1 {
            bp.count -= 1;
            event!(
                Level::TRACE,
                "breakpoint {} matched, {} more to go",
                bp,
                bp.count
            );
            return None;
        }
        bp.count = 0;
        let matched = types & bp.types;
        let hit = BreakpointHit {
            address: addr,
            types: matched,
            action: bp.action.clone(),
        };
        event!(Level::DEBUG, "breakpoint {} fired at time {}", bp, now);
        if bp.types.intersects(BreakTypes::TEMP) {
            chain.remove(index);
            if chain.is_empty() {
                self.records.remove(&addr);
            }
            self.recompute_summary();
        }
        self.last_match = Some((addr, matched));
        Some(hit)
    }

    /// Forget when breakpoints with any of `types` last matched in
    /// `space`, so that they can match again at the current instant.
    pub fn clear_space(&mut self, space: usize, types: BreakTypes) {
        let types = BreakpointTable::clear_mask(types);
        for bp in self.records.values_mut().flatten() {
            if bp.types.intersects(types) {
                if let Some(stamp) = bp.time_fired.get_mut(space) {
                    *stamp = None;
                }
            }
        }
    }

    /// The machine has started executing at a new program counter:
    /// forget the last match times in the first `spaces` spaces (all
    /// of them, if `spaces` is zero or too large).
    pub fn new_pc(&mut self, spaces: usize) {
        let spaces = if spaces == 0 || spaces > SPACES {
            SPACES
        } else {
            spaces
        };
        for bp in self.records.values_mut().flatten() {
            for stamp in bp.time_fired.iter_mut().take(spaces) {
                *stamp = None;
            }
        }
    }

    /// The message describing the most recent breakpoint to fire.
    #[must_use]
    pub fn last_match_message(&self) -> Option<String> {
        let (addr, types) = self.last_match?;
        Some(match self.type_table.describe(types) {
            Some(description) => format!("{description} Breakpoint: {addr:>08o}"),
            None => format!("{} Breakpoint at: {addr:>08o}", types.letters()),
        })
    }

    /// `SHOW BREAK` output for `addr`, or `None` if there is no
    /// breakpoint there with any of `types`.
    #[must_use]
    pub fn show(&self, addr: Address, types: BreakTypes) -> Option<String> {
        let types = BreakpointTable::clear_mask(types);
        let lines: Vec<String> = self
            .records
            .get(&addr)?
            .iter()
            .filter(|bp| bp.types.intersects(types))
            .map(ToString::to_string)
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// `SHOW BREAK` output for all breakpoints with any of `types`.
    #[must_use]
    pub fn show_all(&self, types: BreakTypes) -> String {
        let types = BreakpointTable::clear_mask(types);
        self.iter()
            .filter(|bp| bp.types.intersects(types))
            .map(|bp| format!("{bp}\n"))
            .collect()
    }
}

#[cfg(test)]
fn test_table() -> BreakpointTable {
    BreakpointTable::new(BreakTypeTable::new(
        'E',
        &[('E', "Execution"), ('R', "Read"), ('W', "Write")],
    ))
}

#[cfg(test)]
const E: BreakTypes = BreakTypes::letter('E');
#[cfg(test)]
const R: BreakTypes = BreakTypes::letter('R');
#[cfg(test)]
const W: BreakTypes = BreakTypes::letter('W');

#[test]
fn test_set_defaults_and_summary() {
    let mut table = test_table();
    let a = Address::new(0o100);
    table.set(a, BreakTypes::NONE, 0, None).expect("valid");
    assert_eq!(table.find(a, E).map(Breakpoint::types), Some(E));
    table.set(a, R, 0, Some("echo read")).expect("valid");
    assert_eq!(table.summary(), E | R);
    assert_eq!(
        table.find(a, R).and_then(Breakpoint::action),
        Some("echo read")
    );
    table.set(a, R, 2, None).expect("valid");
    let bp = table.find(a, R).expect("still there");
    assert_eq!(bp.action(), Some("echo read"));
    assert_eq!(bp.count(), 2);
    assert_eq!(table.iter().count(), 2);
}

#[test]
fn test_set_rejects_unknown_types() {
    let mut table = test_table();
    let a = Address::new(0o100);
    let bad = BreakTypes::letter('X') | BreakTypes::letter('Y') | E;
    match table.set(a, bad, 0, None) {
        Err(ScpError::UnknownBreakpointType(sw)) => assert_eq!(sw.to_string(), "-XY"),
        other => panic!("expected unknown type error, got {other:?}"),
    }
    assert!(table.is_empty());
    assert_eq!(table.summary(), BreakTypes::NONE);
}

#[test]
fn test_set_rejects_action_on_dynamic() {
    let mut table = test_table();
    let a = Address::new(0o100);
    assert_eq!(
        table.set(a, BreakTypes::STEP_OVER, 0, Some("go")),
        Err(ScpError::ActionOnDynamicBreakpoint)
    );
    assert!(table.is_empty());
    table.set(a, BreakTypes::STEP_OVER, 0, None).expect("valid");
    assert_eq!(
        table.find(a, BreakTypes::STEP_OVER | E).map(Breakpoint::types),
        Some(BreakTypes::STEP_OVER | E)
    );
}

#[test]
fn test_count_fires_on_last_match() {
    let mut table = test_table();
    let a = Address::new(0o200);
    table.set(a, E, 3, None).expect("valid");
    assert_eq!(table.test(a, E, 1), None);
    assert_eq!(table.test(a, E, 2), None);
    let hit = table.test(a, E, 3).expect("third match fires");
    assert_eq!(hit.address, a);
    assert_eq!(hit.types, E);
    assert_eq!(table.find(a, E).map(Breakpoint::count), Some(0));
    // Now the count is exhausted, every later match fires.
    assert!(table.test(a, E, 4).is_some());
}

#[test]
fn test_debounce_within_one_instant() {
    let mut table = test_table();
    let a = Address::new(0o200);
    table.set(a, E, 0, None).expect("valid");
    assert!(table.test(a, E, 10).is_some());
    assert_eq!(table.test(a, E, 10), None);
    // A different space is debounced separately.
    assert!(table.test(a, E.in_space(1), 10).is_some());
    assert!(table.test(a, E, 11).is_some());
    // Forgetting the stamp makes it eligible again.
    table.clear_space(0, E);
    assert!(table.test(a, E, 11).is_some());
    table.new_pc(0);
    assert!(table.test(a, E.in_space(1), 10).is_some());
}

#[test]
fn test_temporary_breakpoint_deletes_itself() {
    let mut table = test_table();
    let a = Address::new(0o300);
    table.set(a, BreakTypes::TEMP | E, 0, None).expect("valid");
    assert_eq!(table.summary(), E);
    let hit = table.test(a, E, 5).expect("fires");
    assert_eq!(hit.types, E);
    assert!(table.is_empty());
    assert_eq!(table.summary(), BreakTypes::NONE);
    assert_eq!(table.test(a, E, 6), None);
}

#[test]
fn test_dynamic_breakpoints_match_any_test() {
    let mut table = test_table();
    let a = Address::new(0o300);
    table.set(a, BreakTypes::STEP_OVER, 0, None).expect("valid");
    let hit = table.test(a, R, 1).expect("step-over matches anything");
    assert!(hit.types.intersects(BreakTypes::STEP_OVER));
}

#[test]
fn test_clear_intersecting_types() {
    let mut table = test_table();
    let a = Address::new(0o400);
    let b = Address::new(0o500);
    table.set(a, E, 0, None).expect("valid");
    table.set(a, R | W, 0, None).expect("valid");
    table.set(b, W, 0, None).expect("valid");
    table.clear(a, R);
    assert!(table.find(a, R | W).is_none());
    assert!(table.find(a, E).is_some());
    assert_eq!(table.summary(), E | W);
    table.clear(a, BreakTypes::NONE);
    assert!(table.show(a, BreakTypes::NONE).is_none());
    // Clearing where there is nothing is harmless.
    table.clear(Address::new(0o7), E);
    table.clear_all(W);
    assert!(table.is_empty());
    assert_eq!(table.summary(), BreakTypes::NONE);
}

#[test]
fn test_clear_all_keeps_other_types() {
    let mut table = test_table();
    for n in 0..5 {
        table.set(Address::new(n), E, 0, None).expect("valid");
        table.set(Address::new(n), R, 0, None).expect("valid");
    }
    table.clear_all(E);
    assert_eq!(table.iter().count(), 5);
    assert!(table.iter().all(|bp| bp.types() == R));
    table.clear_all(BreakTypes::NONE);
    assert!(table.is_empty());
}

#[test]
fn test_last_match_message() {
    let mut table = test_table();
    let a = Address::new(0o100);
    assert_eq!(table.last_match_message(), None);
    table.set(a, E, 0, None).expect("valid");
    table.test(a, E, 0);
    assert_eq!(
        table.last_match_message().as_deref(),
        Some("Execution Breakpoint: 00000100")
    );
    table.set(a, R | W, 0, None).expect("valid");
    table.test(a, R | W, 1);
    assert_eq!(
        table.last_match_message().as_deref(),
        Some("-RW Breakpoint at: 00000100")
    );
}

#[test]
fn test_show() {
    let mut table = test_table();
    table
        .set(Address::new(0o100), E, 3, Some("echo hit; step"))
        .expect("valid");
    table.set(Address::new(0o20), R, 0, None).expect("valid");
    assert_eq!(
        table.show(Address::new(0o100), E).as_deref(),
        Some("100:\tE[3]; echo hit; step")
    );
    assert_eq!(table.show(Address::new(0o100), R), None);
    assert_eq!(
        table.show_all(BreakTypes::NONE),
        "20:\tR\n100:\tE[3]; echo hit; step\n"
    );
}

#[test]
fn test_init() {
    let mut table = test_table();
    table.set(Address::new(1), E, 0, None).expect("valid");
    table.test(Address::new(1), E, 0);
    table.init();
    assert!(table.is_empty());
    assert_eq!(table.summary(), BreakTypes::NONE);
    assert_eq!(table.last_match_message(), None);
}
