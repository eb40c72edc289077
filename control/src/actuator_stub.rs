// In-memory actuator used by tests and the simulation demo

use crate::actuator::{Actuator, MouseButton};
use crate::error::{ControlError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedCommand {
    Move { dx: i32, dy: i32, at: Instant },
    Click { button: MouseButton, hold: Duration, at: Instant },
}

#[derive(Debug)]
struct StubState {
    commands: Vec<RecordedCommand>,
    connected: bool,
    failing: bool,
    fail_next: u32,
}

/// Records every command; clones share the same record
#[derive(Debug, Clone)]
pub struct StubActuator {
    state: Arc<Mutex<StubState>>,
}

impl Default for StubActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl StubActuator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                commands: Vec::new(),
                connected: true,
                failing: false,
                fail_next: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().commands.clone()
    }

    /// Recorded moves as (dx, dy)
    pub fn moves(&self) -> Vec<(i32, i32)> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Move { dx, dy, .. } => Some((*dx, *dy)),
                _ => None,
            })
            .collect()
    }

    pub fn move_times(&self) -> Vec<Instant> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Move { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    /// Sum of all recorded moves
    pub fn total_motion(&self) -> (i64, i64) {
        self.moves()
            .iter()
            .fold((0, 0), |(x, y), (dx, dy)| (x + *dx as i64, y + *dy as i64))
    }

    pub fn clear(&self) {
        self.state().commands.clear();
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Fail every command until turned off
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Fail the next `n` commands
    pub fn fail_next(&self, n: u32) {
        self.state().fail_next = n;
    }

    fn check_write(state: &mut StubState) -> Result<()> {
        if state.failing {
            return Err(ControlError::actuator_write("stub write failure"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ControlError::actuator_write("stub write failure"));
        }
        Ok(())
    }
}

impl Actuator for StubActuator {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&mut state)?;
        state.commands.push(RecordedCommand::Move {
            dx,
            dy,
            at: Instant::now(),
        });
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.state().connected
    }

    fn click(&mut self, button: MouseButton, hold: Duration) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&mut state)?;
        state.commands.push(RecordedCommand::Click {
            button,
            hold,
            at: Instant::now(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "stub"
    }
}
