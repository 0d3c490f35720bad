//! Program-pointer and parameter-snapshot stacks (C5).
//!
//! Grounded on `gcode-state.c`'s `stacks_push_program`/`stacks_pop_program`
//! and `stacks_push_parameters`/`stacks_pop_parameters`, called in lockstep
//! with `M98`/`M99`: a subcall pushes a program frame twice (the return
//! point, then the loop-top offset) and, for a macro call, a parameter
//! snapshot once; a return pops once, restoring the snapshot only when the
//! popped frame says it came from a macro call.

use crate::error::CoreError;
use std::collections::HashMap;

/// A saved position in the input stream plus the state needed to resume a
/// loop (`M98 P.. L..`) or a plain subcall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramFrame {
    pub offset: u64,
    pub macro_call: bool,
    pub repeat_count: u32,
}

/// LIFO stack of saved program pointers. Two-deep push per `M98`, one pop
/// per `M99` (see `GCodeState::m98`/`m99` in [`crate::state`]).
#[derive(Debug, Default)]
pub struct ProgramStack {
    frames: Vec<ProgramFrame>,
}

impl ProgramStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ProgramFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<ProgramFrame, CoreError> {
        self.frames.pop().ok_or(CoreError::StackUnderflow)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// LIFO stack of macro-local parameter snapshots (`#1`..`#33`), saved around
/// a macro call (`G65`/`M98` with `macroCall` set) and restored on return.
#[derive(Debug, Default)]
pub struct ParamSnapshotStack {
    snapshots: Vec<HashMap<u32, f64>>,
}

impl ParamSnapshotStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: HashMap<u32, f64>) {
        self.snapshots.push(snapshot);
    }

    pub fn pop(&mut self) -> Result<HashMap<u32, f64>, CoreError> {
        self.snapshots.pop().ok_or(CoreError::StackUnderflow)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
