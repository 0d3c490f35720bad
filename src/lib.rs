//! Canonical G-code interpreter core: block parsing, modal state,
//! coordinate math, canned-cycle expansion, sub-program call/return and
//! parameter storage, plus the ambient collaborators (input, machine,
//! persistence) that let the core run standalone.

pub mod cycles;
pub mod error;
pub mod input;
pub mod lexer;
pub mod machine;
pub mod math;
pub mod params;
pub mod params_file;
pub mod stacks;
pub mod state;
pub mod tools;

pub use error::{AppError, CoreError};
pub use state::GCodeState;

#[cfg(test)]
mod tests {
    use super::*;
    use input::StackInput;
    use machine::RecordingMachine;

    #[test]
    fn a_minimal_program_runs_to_completion() {
        let mut state = GCodeState::new();
        let mut input = StackInput::new("G20 G90 G00 X1 Y1\nM30\n");
        let mut machine = RecordingMachine::new();
        let mut buf = String::new();
        while input.fetch_line(&mut buf) && state.still_running {
            state.update(&buf, &mut input, &mut machine).unwrap();
        }
        assert!(!state.still_running);
        assert_eq!(machine.calls.len(), 1);
    }
}
