//! Canned-cycle expansion (C6): turns one `G73`..`G89`/probe block into a
//! synthetic multi-line G-code sub-program, which the state machine splices
//! back into the input so the ordinary per-block pipeline re-interprets it.
//!
//! `gcode-cycles.c` was not part of the retrieved reference sources (only
//! `gcode-state.c`, `gcode-math.c`, `gcode-tools.c` and `gcode-canon.c`
//! were), so the exact per-cycle move sequences below are this crate's own
//! composition from the cycle semantics §4.6 of the write-up describes —
//! each one consults exactly the fields the write-up names (`R`, feed, `Q`,
//! `P`, `K`, back-bore `I`/`J`/`K`) and leaves the actual coordinate math to
//! the ordinary `move_math` pass the spliced lines go through on replay.
//! The G-code numbers assigned to each cycle id are an assumption recorded
//! in `DESIGN.md`.

use std::fmt::Write as _;

/// Which of the thirteen `G73`/`G74`/`G76`/`G77`/`G81`..`G89` canned cycles
/// is active. Probe variants reuse the same dispatch path but consult none
/// of the drilling-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleId {
    ProbeIn,
    ProbeOut,
    PeckDrillFast,
    TapLeft,
    DrillNoDwell,
    DrillDwell,
    PeckDrill,
    TapRight,
    BoreFeedOutNoStop,
    BoreDwellStop,
    BackBore,
    BoreManualRetract,
    BoreDwellNoStop,
}

/// The modal fields a cycle body needs, snapshotted at expansion time so the
/// generator stays a pure function of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct CycleParams {
    pub id: CycleId,
    /// Retract plane, in the word-address frame (absolute level or relative
    /// delta, matching the block's current G90/G91 mode).
    pub r: f64,
    pub feed: f64,
    /// Number of times to repeat the cycle body (`L`, default 1).
    pub repeats: u32,
    /// Chip-break peck increment (`Q`), peck cycles only.
    pub chip_break: f64,
    /// Dwell time in seconds (`P`), dwell cycles only.
    pub dwell: f64,
    /// Thread pitch (`K`), tapping cycles only.
    pub thread_pitch: f64,
    /// Back-bore lateral clearance and depth (`I`, `J`, `K`).
    pub back_bore: (f64, f64, f64),
    pub absolute: bool,
}

const CHIP_CLEARANCE: f64 = 0.5;

fn fnum(n: f64) -> String {
    let mut s = format!("{n:.4}");
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    s
}

/// One cycle repetition's body, not including the `L` replication.
fn body(p: &CycleParams, x: f64, y: f64, z: f64) -> String {
    let mut out = String::new();
    let feed = p.feed;
    match p.id {
        CycleId::ProbeIn | CycleId::ProbeOut => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
        }
        CycleId::DrillNoDwell => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "G00 Z{}", fnum(p.r));
        }
        CycleId::DrillDwell => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "G04 P{}", fnum(p.dwell));
            let _ = writeln!(out, "G00 Z{}", fnum(p.r));
        }
        CycleId::PeckDrill => {
            let _ = writeln!(out, "X{} Y{}", fnum(x), fnum(y));
            for peck_z in peck_depths(p, z) {
                let _ = writeln!(out, "G01 Z{} F{}", fnum(peck_z), fnum(feed));
                let _ = writeln!(out, "G00 Z{}", fnum(p.r));
            }
        }
        CycleId::PeckDrillFast => {
            let _ = writeln!(out, "X{} Y{}", fnum(x), fnum(y));
            for peck_z in peck_depths(p, z) {
                let _ = writeln!(out, "G01 Z{} F{}", fnum(peck_z), fnum(feed));
                let clearance = if p.absolute {
                    peck_z + CHIP_CLEARANCE
                } else {
                    CHIP_CLEARANCE
                };
                let _ = writeln!(out, "G00 Z{}", fnum(clearance));
            }
            let _ = writeln!(out, "G00 Z{}", fnum(p.r));
        }
        CycleId::TapRight => {
            let _ = writeln!(out, "X{} Y{}", fnum(x), fnum(y));
            let _ = writeln!(out, "M03");
            let _ = writeln!(out, "G01 Z{} F{}", fnum(z), fnum(p.thread_pitch.max(feed)));
            let _ = writeln!(out, "M04");
            let _ = writeln!(out, "G01 Z{} F{}", fnum(p.r), fnum(p.thread_pitch.max(feed)));
            let _ = writeln!(out, "M03");
        }
        CycleId::TapLeft => {
            let _ = writeln!(out, "X{} Y{}", fnum(x), fnum(y));
            let _ = writeln!(out, "M04");
            let _ = writeln!(out, "G01 Z{} F{}", fnum(z), fnum(p.thread_pitch.max(feed)));
            let _ = writeln!(out, "M03");
            let _ = writeln!(out, "G01 Z{} F{}", fnum(p.r), fnum(p.thread_pitch.max(feed)));
            let _ = writeln!(out, "M04");
        }
        CycleId::BoreFeedOutNoStop => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "G01 Z{} F{}", fnum(p.r), fnum(feed));
        }
        CycleId::BoreDwellNoStop => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "G04 P{}", fnum(p.dwell));
            let _ = writeln!(out, "G01 Z{} F{}", fnum(p.r), fnum(feed));
        }
        CycleId::BoreDwellStop => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "G04 P{}", fnum(p.dwell));
            let _ = writeln!(out, "M19 P0");
            let _ = writeln!(out, "M05");
            let _ = writeln!(out, "G00 Z{}", fnum(p.r));
            let _ = writeln!(out, "M03");
        }
        CycleId::BoreManualRetract => {
            let _ = writeln!(out, "G01 X{} Y{} Z{} F{}", fnum(x), fnum(y), fnum(z), fnum(feed));
            let _ = writeln!(out, "M00");
            let _ = writeln!(out, "G00 Z{}", fnum(p.r));
        }
        CycleId::BackBore => {
            let (bi, bj, bk) = p.back_bore;
            let _ = writeln!(out, "G91 G00 X{} Y{}", fnum(bi), fnum(bj));
            let _ = writeln!(out, "G90 G00 Z{}", fnum(z - bk));
            let _ = writeln!(out, "G91 G00 X{} Y{}", fnum(-bi), fnum(-bj));
            let _ = writeln!(out, "G01 Z{} F{}", fnum(z), fnum(feed));
            let _ = writeln!(out, "G91 G00 X{} Y{}", fnum(bi), fnum(bj));
            let _ = writeln!(out, "G90 G00 Z{}", fnum(p.r));
            let _ = writeln!(out, "G91 G00 X{} Y{}", fnum(-bi), fnum(-bj));
        }
    }
    out
}

/// Classic full-retract peck sequence: step down by `chip_break` each pass,
/// clamped to the final depth on the last pass.
fn peck_depths(p: &CycleParams, z: f64) -> Vec<f64> {
    let step = p.chip_break.abs().max(1e-6);
    if p.absolute {
        let mut depths = Vec::new();
        let mut current = p.r;
        loop {
            current = (current - step).max(z);
            depths.push(current);
            if current <= z {
                break;
            }
        }
        depths
    } else {
        let mut depths = Vec::new();
        let mut remaining = z.abs();
        while remaining > 0.0 {
            let this_step = remaining.min(step);
            remaining -= this_step;
            depths.push(-(z.abs() - remaining));
        }
        if depths.is_empty() {
            depths.push(z);
        }
        depths
    }
}

/// Expand `params` for a hole at `(x, y, z)` into a spliceable G-code
/// program, replicating the body `params.repeats` times.
pub fn generate(params: &CycleParams, x: f64, y: f64, z: f64) -> String {
    let one = body(params, x, y, z);
    let mut program = String::with_capacity(one.len() * params.repeats.max(1) as usize);
    for _ in 0..params.repeats.max(1) {
        program.push_str(&one);
    }
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: CycleId) -> CycleParams {
        CycleParams {
            id,
            r: 1.0,
            feed: 50.0,
            repeats: 1,
            chip_break: 2.0,
            dwell: 0.5,
            thread_pitch: 1.0,
            back_bore: (0.0, 0.0, 0.0),
            absolute: true,
        }
    }

    #[test]
    fn drill_no_dwell_feeds_then_retracts() {
        let program = generate(&base(CycleId::DrillNoDwell), 5.0, 5.0, -3.0);
        assert_eq!(program.lines().count(), 2);
        assert!(program.lines().next().unwrap().starts_with("G01 X5 Y5 Z-3"));
        assert!(program.lines().nth(1).unwrap().starts_with("G00 Z1"));
    }

    #[test]
    fn drill_dwell_inserts_a_g04() {
        let program = generate(&base(CycleId::DrillDwell), 0.0, 0.0, -2.0);
        assert!(program.contains("G04 P0.5"));
    }

    #[test]
    fn repeats_replicate_the_whole_body() {
        let mut params = base(CycleId::DrillNoDwell);
        params.repeats = 3;
        let program = generate(&params, 0.0, 0.0, -1.0);
        assert_eq!(program.lines().count(), 6);
    }

    #[test]
    fn peck_drill_steps_down_to_final_depth_absolute() {
        let mut params = base(CycleId::PeckDrill);
        params.chip_break = 1.0;
        let program = generate(&params, 0.0, 0.0, -2.5);
        // Retract level 1.0, stepping down by 1.0 each peck: 0.0, -1.0, -2.0, -2.5
        let feed_lines: Vec<_> = program
            .lines()
            .filter(|l| l.starts_with("G01"))
            .collect();
        assert_eq!(feed_lines.len(), 4);
        assert!(feed_lines.last().unwrap().contains("-2.5"));
    }

    #[test]
    fn tap_right_reverses_spindle_between_feed_and_retract() {
        let program = generate(&base(CycleId::TapRight), 0.0, 0.0, -10.0);
        let lines: Vec<_> = program.lines().collect();
        assert_eq!(lines[1], "M03");
        assert_eq!(lines[3], "M04");
        assert_eq!(lines[5], "M03");
    }

    #[test]
    fn back_bore_shifts_sideways_before_and_after_the_bore() {
        let mut params = base(CycleId::BackBore);
        params.back_bore = (2.0, 0.0, 5.0);
        let program = generate(&params, 10.0, 10.0, -8.0);
        assert!(program.lines().next().unwrap().contains("X2"));
    }
}
