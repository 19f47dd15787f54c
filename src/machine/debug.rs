//! Run-state control for an external debugger (spec.md §5, SPEC_FULL.md
//! §5 "the optional debug thread"). The GDB remote-debug wire protocol
//! itself is out of scope (SPEC_FULL.md Non-goals) -- this module is
//! only the condvar handshake that protocol would drive: a debugger
//! thread requests `Stopped`/`SingleStep`/`Running`, the emulation
//! thread's own run loop blocks on the condvar while `Stopped` and
//! polls it once per instruction otherwise, and
//! [`MachineError::DebugTrap`] is how a breakpoint handler asks the
//! run loop to drop back to `Stopped`.
//!
//! Grounded on the teacher's `player::spawn_player`/`player_loop` shape
//! (a `crossbeam_channel` command/status pair plus a named spawned
//! thread) for the outer transport, and on `original_source/gdb.h`'s
//! own pairing of a socket thread with a condition variable for the
//! inner one.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::TrapSignal;

/// The three states a debugger can put the run loop in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Blocked, waiting for `Continue` or `Step`.
    Stopped,
    /// Run exactly one instruction, then fall back to `Stopped`.
    SingleStep,
    /// Run freely until a breakpoint traps or `Stop` is requested.
    Running,
}

/// Commands a debugger thread sends to control the run loop.
#[derive(Debug, Clone, Copy)]
pub enum DebugCmd {
    Continue,
    Step,
    Stop,
    Quit,
}

/// Notifications the run loop sends back to the debugger thread.
#[derive(Debug, Clone, Copy)]
pub enum DebugEvent {
    Stopped { pc: u16, signal: TrapSignal },
    Running,
}

/// Shared run-state handshake: one side (the emulation thread) calls
/// [`Handshake::poll`] once per instruction; the other (a debugger)
/// calls [`Handshake::request`] to change state and wake it up.
#[derive(Clone)]
pub struct Handshake {
    inner: Arc<(Mutex<RunState>, Condvar)>,
}

impl Handshake {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(RunState::Stopped), Condvar::new())) }
    }

    /// Change the run state and wake anyone blocked in `poll`.
    pub fn request(&self, state: RunState) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = state;
        cvar.notify_all();
    }

    /// Called once per instruction by the run loop. Blocks while the
    /// state is `Stopped`; on `SingleStep`, consumes the single step
    /// (falling back to `Stopped`) and lets the caller execute one
    /// instruction; on `Running`, returns immediately.
    pub fn poll(&self) -> RunState {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        while *state == RunState::Stopped {
            state = cvar.wait(state).unwrap();
        }
        let to_run = *state;
        if to_run == RunState::SingleStep {
            *state = RunState::Stopped;
        }
        to_run
    }

    /// Force `Stopped` without waking a waiter -- used by a breakpoint
    /// handler reporting [`crate::error::MachineError::DebugTrap`].
    pub fn halt(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap() = RunState::Stopped;
    }

    pub fn current(&self) -> RunState {
        *self.inner.0.lock().unwrap()
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a named thread that owns a [`Handshake`] and forwards
/// debugger commands/events over a bounded channel pair, mirroring
/// `player::spawn_player`'s command/status channel shape. The returned
/// `Handshake` clone is what the emulation thread's own run loop polls.
pub fn spawn(handshake: Handshake) -> (Sender<DebugCmd>, Receiver<DebugEvent>) {
    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<DebugCmd>(16);
    let (event_tx, event_rx) = crossbeam_channel::bounded::<DebugEvent>(16);

    thread::Builder::new()
        .name("dragoncore-debug".into())
        .spawn(move || debug_loop(handshake, cmd_rx, event_tx))
        .expect("failed to spawn debug thread");

    (cmd_tx, event_rx)
}

fn debug_loop(handshake: Handshake, cmd_rx: Receiver<DebugCmd>, event_tx: Sender<DebugEvent>) {
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DebugCmd::Continue => {
                handshake.request(RunState::Running);
                let _ = event_tx.send(DebugEvent::Running);
            }
            DebugCmd::Step => handshake.request(RunState::SingleStep),
            DebugCmd::Stop => handshake.request(RunState::Stopped),
            DebugCmd::Quit => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_blocks_until_running_is_requested() {
        let hs = Handshake::new();
        let hs2 = hs.clone();
        let handle = thread::spawn(move || hs2.poll());
        thread::sleep(std::time::Duration::from_millis(20));
        hs.request(RunState::Running);
        assert_eq!(handle.join().unwrap(), RunState::Running);
    }

    #[test]
    fn single_step_falls_back_to_stopped_after_one_poll() {
        let hs = Handshake::new();
        hs.request(RunState::SingleStep);
        assert_eq!(hs.poll(), RunState::SingleStep);
        assert_eq!(hs.current(), RunState::Stopped);
    }

    #[test]
    fn halt_stops_a_running_loop() {
        let hs = Handshake::new();
        hs.request(RunState::Running);
        assert_eq!(hs.current(), RunState::Running);
        hs.halt();
        assert_eq!(hs.current(), RunState::Stopped);
    }
}
