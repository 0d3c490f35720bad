//! Machine collaborator (C9): the narrow trait through which the state
//! machine drives physical (or simulated) motion, spindle, coolant and
//! tool-change actions, plus two reference implementations used by tests
//! and the CLI's default `--trace` mode.
//!
//! Grounded on `gcode-canon.c`'s canonical-command call sites (`move_line`,
//! `move_arc`, `move_home`, `start_spindle`, `change_tool`, `do_stop`, ...)
//! and, for the trace rendering, the teacher's `postprocessor/formatter.rs`
//! numeric-formatting style (trim trailing zeros, no unnecessary decimals).

use crate::error::CoreError;
use crate::math::{Plane, RadiusCompMode};
use crate::state::{CornerMode, FeedMode};

/// `feed` value passed on every rapid `move_line`/`move_arc`, alongside
/// `FeedMode::PerMinute` — mirrors the reference's
/// `GCODE_MACHINE_FEED_TRAVERSE`.
pub const TRAVERSE_FEED: f64 = -1.0;

/// Everything the state machine needs from the thing actually moving the
/// machine. A block normally drives a handful of these calls; none of them
/// are expected to block past the physical move they request.
pub trait MachineCollaborator {
    /// True while a previously issued move is still executing; the state
    /// machine polls this before issuing another to honor G-code's
    /// block-to-block motion semantics.
    fn running(&self) -> bool;
    #[allow(clippy::too_many_arguments)]
    fn move_line(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        rapid: bool,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    ) -> Result<(), CoreError>;
    #[allow(clippy::too_many_arguments)]
    fn move_arc(
        &mut self,
        end: (f64, f64, f64),
        center: (f64, f64),
        i: f64,
        j: f64,
        k: f64,
        r: f64,
        clockwise: bool,
        plane: Plane,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    ) -> Result<(), CoreError>;
    fn move_home(&mut self, axis_mask: u8) -> Result<(), CoreError>;
    /// Auxiliary (non-linear/arc) motion: 4th/5th axis or tool-length moves
    /// the core doesn't interpolate itself.
    fn move_aux(&mut self, axis: u8, value: f64) -> Result<(), CoreError>;
    /// `G04 P⟨seconds⟩`: pause motion for `seconds` before the next command.
    fn dwell(&mut self, seconds: f64);
    fn set_spindle_speed(&mut self, rpm: f64);
    fn start_spindle(&mut self, clockwise: bool);
    fn stop_spindle(&mut self);
    fn start_coolant(&mut self, flood: bool, mist: bool);
    fn select_probe_input(&mut self, input: u32);
    fn select_probe_mode(&mut self, mode: u32);
    fn select_path_mode(&mut self, exact_stop: bool);
    fn enable_mirror(&mut self, axis_mask: u8, on: bool);
    fn enable_override(&mut self, on: bool);
    fn change_tool(&mut self, tool: u32) -> Result<(), CoreError>;
    fn preselect_tool(&mut self, tool: u32);
    /// `M00`/`M01`/`M02`/`M30`/`M60`-style program stop, with `optional`
    /// true only for the operator-stop variant (`M01`).
    fn do_stop(&mut self, optional: bool);
    fn enable_power(&mut self, on: bool);
    /// Apply the feed override and return the resulting feed rate the move
    /// should actually be dispatched at.
    fn override_feed(&mut self, feed: f64) -> f64;
    /// Apply the spindle-speed override and return the resulting RPM.
    fn override_speed(&mut self, speed: f64) -> f64;
}

/// One canonical call the state machine made, captured verbatim for test
/// assertions. Variant names mirror [`MachineCollaborator`]'s methods.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MoveLine {
        x: f64,
        y: f64,
        z: f64,
        rapid: bool,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    },
    MoveArc {
        end: (f64, f64, f64),
        center: (f64, f64),
        i: f64,
        j: f64,
        k: f64,
        r: f64,
        clockwise: bool,
        plane: Plane,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    },
    MoveHome { axis_mask: u8 },
    MoveAux { axis: u8, value: f64 },
    Dwell(f64),
    SpindleSpeed(f64),
    SpindleStart { clockwise: bool },
    SpindleStop,
    Coolant { flood: bool, mist: bool },
    ProbeInput(u32),
    ProbeMode(u32),
    PathMode { exact_stop: bool },
    Mirror { axis_mask: u8, on: bool },
    Override(bool),
    ChangeTool(u32),
    PreselectTool(u32),
    Stop { optional: bool },
    Power(bool),
    OverrideFeed(f64),
    OverrideSpeed(f64),
}

/// A [`MachineCollaborator`] that just records every call it receives, for
/// assertions in state-machine tests. Moves complete immediately, so
/// `running()` is always false.
#[derive(Debug, Default)]
pub struct RecordingMachine {
    pub calls: Vec<Call>,
}

impl RecordingMachine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MachineCollaborator for RecordingMachine {
    fn running(&self) -> bool {
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn move_line(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        rapid: bool,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    ) -> Result<(), CoreError> {
        self.calls.push(Call::MoveLine { x, y, z, rapid, feed_mode, feed, rad_comp, corner });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn move_arc(
        &mut self,
        end: (f64, f64, f64),
        center: (f64, f64),
        i: f64,
        j: f64,
        k: f64,
        r: f64,
        clockwise: bool,
        plane: Plane,
        feed_mode: FeedMode,
        feed: f64,
        rad_comp: RadiusCompMode,
        corner: CornerMode,
    ) -> Result<(), CoreError> {
        self.calls.push(Call::MoveArc {
            end, center, i, j, k, r, clockwise, plane, feed_mode, feed, rad_comp, corner,
        });
        Ok(())
    }

    fn move_home(&mut self, axis_mask: u8) -> Result<(), CoreError> {
        self.calls.push(Call::MoveHome { axis_mask });
        Ok(())
    }

    fn move_aux(&mut self, axis: u8, value: f64) -> Result<(), CoreError> {
        self.calls.push(Call::MoveAux { axis, value });
        Ok(())
    }

    fn dwell(&mut self, seconds: f64) {
        self.calls.push(Call::Dwell(seconds));
    }

    fn set_spindle_speed(&mut self, rpm: f64) {
        self.calls.push(Call::SpindleSpeed(rpm));
    }

    fn start_spindle(&mut self, clockwise: bool) {
        self.calls.push(Call::SpindleStart { clockwise });
    }

    fn stop_spindle(&mut self) {
        self.calls.push(Call::SpindleStop);
    }

    fn start_coolant(&mut self, flood: bool, mist: bool) {
        self.calls.push(Call::Coolant { flood, mist });
    }

    fn select_probe_input(&mut self, input: u32) {
        self.calls.push(Call::ProbeInput(input));
    }

    fn select_probe_mode(&mut self, mode: u32) {
        self.calls.push(Call::ProbeMode(mode));
    }

    fn select_path_mode(&mut self, exact_stop: bool) {
        self.calls.push(Call::PathMode { exact_stop });
    }

    fn enable_mirror(&mut self, axis_mask: u8, on: bool) {
        self.calls.push(Call::Mirror { axis_mask, on });
    }

    fn enable_override(&mut self, on: bool) {
        self.calls.push(Call::Override(on));
    }

    fn change_tool(&mut self, tool: u32) -> Result<(), CoreError> {
        self.calls.push(Call::ChangeTool(tool));
        Ok(())
    }

    fn preselect_tool(&mut self, tool: u32) {
        self.calls.push(Call::PreselectTool(tool));
    }

    fn do_stop(&mut self, optional: bool) {
        self.calls.push(Call::Stop { optional });
    }

    fn enable_power(&mut self, on: bool) {
        self.calls.push(Call::Power(on));
    }

    fn override_feed(&mut self, feed: f64) -> f64 {
        self.calls.push(Call::OverrideFeed(feed));
        feed
    }

    fn override_speed(&mut self, speed: f64) -> f64 {
        self.calls.push(Call::OverrideSpeed(speed));
        speed
    }
}

fn fnum(n: f64) -> String {
    let mut s = format!("{n:.4}");
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    s
}

/// A [`MachineCollaborator`] that renders each call as a human-readable
/// G-code-shaped line through `tracing::info!`, for the CLI's `--trace`
/// mode where there's no physical machine to drive.
#[derive(Debug, Default)]
pub struct TraceMachine;

impl TraceMachine {
    pub fn new() -> Self {
        Self
    }
}

impl MachineCollaborator for TraceMachine {
    fn running(&self) -> bool {
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn move_line(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        rapid: bool,
        _feed_mode: FeedMode,
        feed: f64,
        _rad_comp: RadiusCompMode,
        _corner: CornerMode,
    ) -> Result<(), CoreError> {
        if rapid {
            tracing::info!("G00 X{} Y{} Z{}", fnum(x), fnum(y), fnum(z));
        } else {
            tracing::info!("G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn move_arc(
        &mut self,
        end: (f64, f64, f64),
        _center: (f64, f64),
        i: f64,
        j: f64,
        _k: f64,
        _r: f64,
        clockwise: bool,
        _plane: Plane,
        _feed_mode: FeedMode,
        feed: f64,
        _rad_comp: RadiusCompMode,
        _corner: CornerMode,
    ) -> Result<(), CoreError> {
        tracing::info!(
            "{} X{} Y{} Z{} I{} J{} F{}",
            if clockwise { "G02" } else { "G03" },
            fnum(end.0),
            fnum(end.1),
            fnum(end.2),
            fnum(i),
            fnum(j),
            fnum(feed)
        );
        Ok(())
    }

    fn move_home(&mut self, axis_mask: u8) -> Result<(), CoreError> {
        tracing::info!("G28 (axis_mask={axis_mask:#04b})");
        Ok(())
    }

    fn move_aux(&mut self, axis: u8, value: f64) -> Result<(), CoreError> {
        tracing::info!("aux axis {axis} -> {}", fnum(value));
        Ok(())
    }

    fn dwell(&mut self, seconds: f64) {
        tracing::info!("G04 P{}", fnum(seconds));
    }

    fn set_spindle_speed(&mut self, rpm: f64) {
        tracing::info!("S{}", fnum(rpm));
    }

    fn start_spindle(&mut self, clockwise: bool) {
        tracing::info!("{}", if clockwise { "M03" } else { "M04" });
    }

    fn stop_spindle(&mut self) {
        tracing::info!("M05");
    }

    fn start_coolant(&mut self, flood: bool, mist: bool) {
        if flood {
            tracing::info!("M08");
        }
        if mist {
            tracing::info!("M07");
        }
        if !flood && !mist {
            tracing::info!("M09");
        }
    }

    fn select_probe_input(&mut self, input: u32) {
        tracing::info!("probe input -> {input}");
    }

    fn select_probe_mode(&mut self, mode: u32) {
        tracing::info!("probe mode -> {mode}");
    }

    fn select_path_mode(&mut self, exact_stop: bool) {
        tracing::info!("{}", if exact_stop { "G61" } else { "G64" });
    }

    fn enable_mirror(&mut self, axis_mask: u8, on: bool) {
        tracing::info!(
            "mirror axis_mask={axis_mask:#04b} {}",
            if on { "on" } else { "off" }
        );
    }

    fn enable_override(&mut self, on: bool) {
        tracing::info!("{}", if on { "M48" } else { "M49" });
    }

    fn change_tool(&mut self, tool: u32) -> Result<(), CoreError> {
        tracing::info!("M06 T{tool}");
        Ok(())
    }

    fn preselect_tool(&mut self, tool: u32) {
        tracing::info!("T{tool}");
    }

    fn do_stop(&mut self, optional: bool) {
        tracing::info!("{}", if optional { "M01" } else { "M00" });
    }

    fn enable_power(&mut self, on: bool) {
        tracing::info!("power {}", if on { "on" } else { "off" });
    }

    fn override_feed(&mut self, feed: f64) -> f64 {
        feed
    }

    fn override_speed(&mut self, speed: f64) -> f64 {
        speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_machine_captures_calls_in_order() {
        let mut machine = RecordingMachine::new();
        machine
            .move_line(1.0, 2.0, 3.0, true, FeedMode::PerMinute, TRAVERSE_FEED, RadiusCompMode::Off, CornerMode::default())
            .unwrap();
        machine.start_spindle(true);
        machine.change_tool(5).unwrap();
        assert_eq!(
            machine.calls,
            vec![
                Call::MoveLine {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                    rapid: true,
                    feed_mode: FeedMode::PerMinute,
                    feed: TRAVERSE_FEED,
                    rad_comp: RadiusCompMode::Off,
                    corner: CornerMode::default(),
                },
                Call::SpindleStart { clockwise: true },
                Call::ChangeTool(5),
            ]
        );
    }

    #[test]
    fn recording_machine_never_reports_running() {
        let machine = RecordingMachine::new();
        assert!(!machine.running());
    }

    #[test]
    fn trace_machine_accepts_every_call_without_erroring() {
        let mut machine = TraceMachine::new();
        machine
            .move_line(0.0, 0.0, 0.0, false, FeedMode::PerMinute, 100.0, RadiusCompMode::Off, CornerMode::default())
            .unwrap();
        machine
            .move_arc(
                (1.0, 0.0, 0.0),
                (0.5, 0.0),
                0.5,
                0.0,
                0.0,
                0.0,
                true,
                Plane::Xy,
                FeedMode::PerMinute,
                100.0,
                RadiusCompMode::Off,
                CornerMode::default(),
            )
            .unwrap();
        machine.move_home(0b111).unwrap();
        machine.set_spindle_speed(1200.0);
        machine.start_coolant(true, false);
        machine.do_stop(false);
    }
}
