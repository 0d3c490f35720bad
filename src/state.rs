//! The per-block interpreter (C7): orchestrates the parameter store, tool
//! table, math pipeline, stacks and cycle generator against one block of
//! G-code, in the fixed stage order `gcode-state.c`'s `update_gcode_line`
//! follows. Every stage that consumes axis words sets `axis_words_consumed`
//! so the sequence point at the end of the pipeline knows whether this
//! block's X/Y/Z belong to a motion command or were already spent elsewhere.
//!
//! G-code number -> cycle id and a few other many-to-one mappings are this
//! crate's own assumption where the retrieved reference sources didn't cover
//! `gcode-cycles.c`; each is called out in `DESIGN.md`.

use crate::cycles::{self, CycleId, CycleParams};
use crate::error::CoreError;
use crate::input::InputSource;
use crate::lexer::Block;
use crate::machine::MachineCollaborator;
use crate::math::{
    self, AxisWords, LengthCompMode, MoveContext, Plane, RadiusCompMode, RotationSpec, ScalingSpec,
};
use crate::params::{self, ParameterStore};
use crate::stacks::{ParamSnapshotStack, ProgramFrame, ProgramStack};
use crate::tools::ToolTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    #[default]
    PerMinute,
    InverseTime,
    PerRev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetractMode {
    #[default]
    Last,
    R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CornerMode {
    #[default]
    Chamfer,
    Fillet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    #[default]
    Off,
    Rapid,
    Linear,
    Arc,
    Cycle,
    Store,
    Macro,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorSpec {
    pub on: bool,
    /// Bit 0 = X, bit 1 = Y, bit 2 = Z.
    pub axis_mask: u8,
    pub pivot: (f64, f64, f64),
}

/// Block-local state the cycle dispatch must remember across several
/// subsequent `update()` calls, until the spliced cycle body is fully
/// consumed and the input collaborator reports `end_of_spliced()`.
#[derive(Debug, Clone, Copy)]
struct CycleSaved {
    c: (f64, f64, f64),
    last_z: f64,
}

/// The full modal G-code state (§3): the coordinate-system record plus feed,
/// tool, spindle, coolant and motion-mode bookkeeping. Owns the parameter
/// store, tool table and both stacks — everything the reference's
/// `GCodeState` struct bundles together — and is the sole mutator of all of
/// them.
pub struct GCodeState {
    pub params: ParameterStore,
    pub tools: ToolTable,
    program_stack: ProgramStack,
    param_stack: ParamSnapshotStack,
    ctx: MoveContext,

    feed_mode: FeedMode,
    feed: f64,
    spindle_speed: f64,
    tool: u32,
    preselected_tool: u32,
    probe_input: u32,
    probe_mode: u32,
    retract_mode: RetractMode,
    spindle_on: bool,
    spindle_cw: bool,
    coolant_flood: bool,
    coolant_mist: bool,
    exact_stop_check: bool,
    corner_mode: CornerMode,
    radius_comp: RadiusCompMode,
    radius_comp_tool: u32,
    mirror: MirrorSpec,
    override_enabled: bool,

    motion_mode: MotionMode,
    old_motion_mode: MotionMode,
    ccw: bool,
    cycle_id: Option<CycleId>,
    /// Modal cycle retract level (`R`), persists across cycle blocks until a
    /// new `R` is given.
    cycle_r: f64,
    last_i: f64,
    last_j: f64,
    last_k: f64,
    last_r: f64,
    /// Whether the current block's arc gave `R` directly, vs. inheriting
    /// modal `I`/`J`/`K`.
    arc_r_given_this_block: bool,

    /// Set for exactly the block that used `G53` (non-modal MCS); restored
    /// at post-block cleanup.
    saved_wcs_for_block: Option<u8>,
    /// Set for exactly the block that used `G09` (non-modal exact-stop);
    /// restored at post-block cleanup.
    saved_path_mode_for_block: Option<bool>,
    cycle_saved: Option<CycleSaved>,

    pub still_running: bool,
}

impl Default for GCodeState {
    fn default() -> Self {
        Self {
            params: ParameterStore::new(),
            tools: ToolTable::new(),
            program_stack: ProgramStack::new(),
            param_stack: ParamSnapshotStack::new(),
            ctx: MoveContext::default(),
            feed_mode: FeedMode::default(),
            feed: 0.0,
            spindle_speed: 0.0,
            tool: 0,
            preselected_tool: 0,
            probe_input: 0,
            probe_mode: 0,
            retract_mode: RetractMode::default(),
            spindle_on: false,
            spindle_cw: true,
            coolant_flood: false,
            coolant_mist: false,
            exact_stop_check: false,
            corner_mode: CornerMode::default(),
            radius_comp: RadiusCompMode::default(),
            radius_comp_tool: 0,
            mirror: MirrorSpec::default(),
            override_enabled: false,
            motion_mode: MotionMode::default(),
            old_motion_mode: MotionMode::default(),
            ccw: false,
            cycle_id: None,
            cycle_r: 0.0,
            last_i: 0.0,
            last_j: 0.0,
            last_k: 0.0,
            last_r: 0.0,
            arc_r_given_this_block: false,
            saved_wcs_for_block: None,
            saved_path_mode_for_block: None,
            cycle_saved: None,
            still_running: true,
        }
    }
}

/// Maps a bare (non-dotted) canned-cycle G-code to the cycle body it
/// expands to. `gcode-cycles.c` was not among the retrieved reference
/// sources, so this mapping — and the doubling-up of G77/G89 onto cycle
/// bodies already used by G76/G86 — is this crate's own assumption,
/// recorded in `DESIGN.md`.
fn cycle_id_for_code(code: u32) -> Option<CycleId> {
    use CycleId::*;
    match code {
        73 => Some(PeckDrillFast),
        74 => Some(TapLeft),
        76 => Some(BoreDwellStop),
        77 => Some(BoreDwellStop),
        81 => Some(DrillNoDwell),
        82 => Some(DrillDwell),
        83 => Some(PeckDrill),
        84 => Some(TapRight),
        85 => Some(BoreFeedOutNoStop),
        86 => Some(BoreDwellNoStop),
        87 => Some(BackBore),
        88 => Some(BoreManualRetract),
        89 => Some(BoreDwellNoStop),
        31 => Some(ProbeIn),
        38 => Some(ProbeOut),
        _ => None,
    }
}

/// The letter -> macro-local-parameter map a `G65`/macro-mode block copies
/// its word values through (§4.7 MACRO finalize).
fn macro_param_for(letter: char) -> Option<u32> {
    match letter.to_ascii_uppercase() {
        'A' => Some(1),
        'B' => Some(2),
        'C' => Some(3),
        'I' => Some(4),
        'J' => Some(5),
        'K' => Some(6),
        'D' => Some(7),
        'H' => Some(11),
        'L' => Some(12),
        'P' => Some(16),
        'Q' => Some(17),
        'R' => Some(18),
        'U' => Some(21),
        'V' => Some(22),
        'W' => Some(23),
        'X' => Some(24),
        'Y' => Some(25),
        'Z' => Some(26),
        _ => None,
    }
}

/// A matched `has_word` candidate value, with the spec's 0 -> 100
/// disambiguation undone, for codes (`G00`, `M00`) where zero is itself a
/// meaningful candidate.
fn undisambiguate(code: u32) -> Option<u32> {
    match code {
        0 => None,
        100 => Some(0),
        other => Some(other),
    }
}

/// Resolve a WCS origin triplet from the parameter store (§4.4 `move_math`'s
/// `wcs_origin` argument). WCS numbering is 1-based; MCS (0) has no origin
/// and is never looked up (`move_math` skips it via `is_mcs`).
fn wcs_origin(params: &ParameterStore, wcs: u8) -> (f64, f64, f64) {
    if wcs == 0 {
        return (0.0, 0.0, 0.0);
    }
    let base = params::PARM_FIRST_OFFSET + (wcs as u32 - 1) * 3;
    (
        params.fetch(base + params::AXIS_X),
        params.fetch(base + params::AXIS_Y),
        params.fetch(base + params::AXIS_Z),
    )
}

impl GCodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the parameter store from a persisted snapshot (e.g. loaded from
    /// the parameter file at startup).
    pub fn with_parameters(mut self, params: ParameterStore) -> Self {
        self.params = params;
        self
    }

    pub fn current_pos(&self) -> (f64, f64, f64) {
        self.ctx.pos
    }

    /// Drive one block through the full interpreter pipeline (§4.7).
    pub fn update<I, M>(&mut self, line: &str, input: &mut I, machine: &mut M) -> Result<(), CoreError>
    where
        I: InputSource,
        M: MachineCollaborator,
    {
        if line.len() > crate::input::MAX_BLOCK_LEN {
            return Err(CoreError::BlockTooLong);
        }
        let block = Block::new(line);
        let mut axis_words_consumed = false;
        self.saved_wcs_for_block = None;
        self.saved_path_mode_for_block = None;

        self.stage_feed(&block, &mut axis_words_consumed, machine);
        self.stage_spindle_speed(&block, machine);
        self.stage_tool(&block, machine)?;
        self.stage_probe(&block, machine);
        self.stage_spindle_direction(&block, machine);
        self.stage_coolant(&block, machine);
        self.stage_override_enable(&block, machine);
        self.stage_dwell(&block, machine);
        self.stage_modal_group(&block, &mut axis_words_consumed, machine)?;
        self.stage_data_input(&block, &mut axis_words_consumed)?;
        self.stage_offset(&block, &mut axis_words_consumed);
        self.stage_motion_mode(&block);
        self.stage_cycle_select(&block);
        self.stage_aux_motion(&block, machine)?;
        self.stage_macro_call(&block, &mut axis_words_consumed, input)?;

        let (null_move, computed) = self.sequence_point(&block, axis_words_consumed)?;

        if !null_move {
            self.dispatch(&block, computed, input, machine)?;
        }

        self.post_block_cleanup(&block, input, machine)?;
        Ok(())
    }

    // ---- Stage 1: feed mode + F-word ----
    fn stage_feed<M: MachineCollaborator>(&mut self, block: &Block, _axis_words_consumed: &mut bool, machine: &mut M) {
        match undisambiguate(block.has_word(&self.params, 'G', &[93, 94, 95])) {
            Some(93) => self.feed_mode = FeedMode::InverseTime,
            Some(94) => self.feed_mode = FeedMode::PerMinute,
            Some(95) => self.feed_mode = FeedMode::PerRev,
            _ => {}
        }
        if let Some(f) = block.get_real(&self.params, 'F') {
            let converted = if self.feed_mode == FeedMode::InverseTime {
                f
            } else {
                math::inch(f, self.ctx.units_inch)
            };
            self.feed = machine.override_feed(converted);
        }
    }

    // ---- Stage 2: spindle speed ----
    fn stage_spindle_speed<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        if let Some(s) = block.get_real(&self.params, 'S') {
            self.spindle_speed = machine.override_speed(s);
        }
    }

    // ---- Stage 3: tool preselect + change ----
    fn stage_tool<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) -> Result<(), CoreError> {
        if let Some(t) = block.get_integer(&self.params, 'T') {
            self.preselected_tool = t;
            machine.preselect_tool(t);
        }
        if let Some(6) = undisambiguate(block.has_word(&self.params, 'M', &[6])) {
            self.tool = self.preselected_tool;
            machine.change_tool(self.tool)?;
        }
        if let Some(52) = undisambiguate(block.has_word(&self.params, 'M', &[52])) {
            self.tool = 0;
            machine.change_tool(0)?;
        }
        Ok(())
    }

    // ---- Stage 4: probe selection / mode ----
    fn stage_probe<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        // No probe-select G/M-codes were named by the write-up; `M76`/`M77`
        // with a `P` argument is this crate's own convention (DESIGN.md).
        if undisambiguate(block.has_word(&self.params, 'M', &[76])).is_some() {
            self.probe_input = block.get_integer_default(&self.params, 'P', self.probe_input);
            machine.select_probe_input(self.probe_input);
        }
        if undisambiguate(block.has_word(&self.params, 'M', &[77])).is_some() {
            self.probe_mode = block.get_integer_default(&self.params, 'P', self.probe_mode);
            machine.select_probe_mode(self.probe_mode);
        }
    }

    // ---- Stage 5: spindle on/off/direction ----
    fn stage_spindle_direction<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        match undisambiguate(block.has_word(&self.params, 'M', &[3, 4, 5])) {
            Some(3) => {
                self.spindle_on = true;
                self.spindle_cw = true;
                machine.start_spindle(true);
            }
            Some(4) => {
                self.spindle_on = true;
                self.spindle_cw = false;
                machine.start_spindle(false);
            }
            Some(5) => {
                self.spindle_on = false;
                machine.stop_spindle();
            }
            _ => {}
        }
    }

    // ---- Stage 6: coolant ----
    fn stage_coolant<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        match undisambiguate(block.has_word(&self.params, 'M', &[7, 8, 9, 13, 14])) {
            Some(7) => self.coolant_mist = true,
            Some(8) => self.coolant_flood = true,
            Some(9) => {
                self.coolant_flood = false;
                self.coolant_mist = false;
            }
            Some(13) => {
                self.coolant_flood = true;
                self.spindle_on = true;
                self.spindle_cw = true;
                machine.start_spindle(true);
            }
            Some(14) => {
                self.coolant_flood = true;
                self.spindle_on = true;
                self.spindle_cw = false;
                machine.start_spindle(false);
            }
            _ => return,
        }
        machine.start_coolant(self.coolant_flood, self.coolant_mist);
    }

    // ---- Stage 7: override enable ----
    fn stage_override_enable<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        match undisambiguate(block.has_word(&self.params, 'M', &[48, 49])) {
            Some(48) => {
                self.override_enabled = true;
                machine.enable_override(true);
            }
            Some(49) => {
                self.override_enabled = false;
                machine.enable_override(false);
            }
            _ => {}
        }
    }

    // ---- Stage 8: dwell ----
    fn stage_dwell<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) {
        if undisambiguate(block.has_word(&self.params, 'G', &[4])).is_some() {
            let seconds = block.get_real_default(&self.params, 'P', 0.0);
            machine.dwell(seconds);
        }
    }

    // ---- Stage 9: plane/units/comp/corner/WCS/mirror/rotation/exact-stop/
    //      abs-rel/polar/scaling/retract/home-cycles ----
    fn stage_modal_group<M: MachineCollaborator>(
        &mut self,
        block: &Block,
        axis_words_consumed: &mut bool,
        machine: &mut M,
    ) -> Result<(), CoreError> {
        match undisambiguate(block.has_word(&self.params, 'G', &[17, 18, 19])) {
            Some(17) => self.ctx.plane = Plane::Xy,
            Some(18) => self.ctx.plane = Plane::Zx,
            Some(19) => self.ctx.plane = Plane::Yz,
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[20, 21])) {
            Some(20) => self.ctx.units_inch = true,
            Some(21) => self.ctx.units_inch = false,
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[40, 41, 42])) {
            Some(40) => self.radius_comp = RadiusCompMode::Off,
            Some(41) => {
                self.radius_comp_tool = block.get_integer_default(&self.params, 'D', self.radius_comp_tool);
                self.radius_comp = RadiusCompMode::Left;
            }
            Some(42) => {
                self.radius_comp_tool = block.get_integer_default(&self.params, 'D', self.radius_comp_tool);
                self.radius_comp = RadiusCompMode::Right;
            }
            _ => {}
        }
        if block.dotted('G', 39, 1) {
            self.corner_mode = CornerMode::Fillet;
        } else if undisambiguate(block.has_word(&self.params, 'G', &[39])).is_some() {
            self.corner_mode = CornerMode::Chamfer;
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[43, 44, 49])) {
            Some(43) | Some(44) => {
                let h = block.get_integer_default(&self.params, 'H', self.tool);
                let length = self.tools.length_of(&self.params, h);
                let mode = if block.has_word(&self.params, 'G', &[43]) != 0 {
                    LengthCompMode::Positive
                } else {
                    LengthCompMode::Negative
                };
                self.ctx.length_comp = (mode, length);
            }
            Some(49) => self.ctx.length_comp = (LengthCompMode::Off, 0.0),
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[53, 54, 55, 56, 57, 58, 59])) {
            Some(53) => {
                self.saved_wcs_for_block = Some(self.ctx.current_wcs);
                self.ctx.current_wcs = 0;
            }
            Some(code @ 54..=59) => {
                self.ctx.current_wcs = (code - 53) as u8;
            }
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'M', &[21, 22, 23])) {
            Some(21) => {
                self.mirror.on = true;
                self.mirror.axis_mask |= 0b001;
                machine.enable_mirror(0b001, true);
            }
            Some(22) => {
                self.mirror.on = true;
                self.mirror.axis_mask |= 0b010;
                machine.enable_mirror(0b010, true);
            }
            Some(23) => {
                self.mirror.on = false;
                self.mirror.axis_mask = 0;
                machine.enable_mirror(0b111, false);
            }
            _ => {}
        }
        if block.dotted('G', 51, 1) {
            let x = block.get_real(&self.params, 'X');
            let y = block.get_real(&self.params, 'Y');
            let z = block.get_real(&self.params, 'Z');
            let mut mask = 0u8;
            if let Some(x) = x {
                self.mirror.pivot.0 = x;
                mask |= 0b001;
            }
            if let Some(y) = y {
                self.mirror.pivot.1 = y;
                mask |= 0b010;
            }
            if let Some(z) = z {
                self.mirror.pivot.2 = z;
                mask |= 0b100;
            }
            self.mirror.on = true;
            self.mirror.axis_mask |= mask;
            *axis_words_consumed = x.is_some() || y.is_some() || z.is_some();
            machine.enable_mirror(self.mirror.axis_mask, true);
        } else if undisambiguate(block.has_word(&self.params, 'G', &[51])).is_some() {
            let i = block.get_real_default(&self.params, 'I', 1.0);
            let j = block.get_real_default(&self.params, 'J', 1.0);
            let k = block.get_real_default(&self.params, 'K', 1.0);
            let x = block.get_real(&self.params, 'X');
            let y = block.get_real(&self.params, 'Y');
            let z = block.get_real(&self.params, 'Z');
            if let Some(x) = x {
                self.ctx.scaling.pivot.0 = x;
            }
            if let Some(y) = y {
                self.ctx.scaling.pivot.1 = y;
            }
            if let Some(z) = z {
                self.ctx.scaling.pivot.2 = z;
            }
            self.ctx.scaling.factor = (i, j, k);
            self.ctx.scaling.on = true;
            *axis_words_consumed = x.is_some() || y.is_some() || z.is_some();
        }
        if block.dotted('G', 50, 1) {
            self.mirror.on = false;
            self.mirror.axis_mask = 0;
            machine.enable_mirror(0b111, false);
        } else if undisambiguate(block.has_word(&self.params, 'G', &[50])).is_some() {
            self.ctx.scaling.on = false;
            self.ctx.scaling.factor = (1.0, 1.0, 1.0);
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[68, 69])) {
            Some(68) => {
                let x = block.get_real(&self.params, 'X');
                let y = block.get_real(&self.params, 'Y');
                let angle = block.get_real_default(&self.params, 'R', self.ctx.rotation.angle_deg);
                self.ctx.rotation = RotationSpec {
                    on: true,
                    pivot: (x.unwrap_or(self.ctx.rotation.pivot.0), y.unwrap_or(self.ctx.rotation.pivot.1)),
                    angle_deg: angle,
                };
                *axis_words_consumed = x.is_some() || y.is_some();
            }
            Some(69) => self.ctx.rotation.on = false,
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[61, 64])) {
            Some(61) => self.exact_stop_check = true,
            Some(64) => self.exact_stop_check = false,
            _ => {}
        }
        if undisambiguate(block.has_word(&self.params, 'G', &[9])).is_some() {
            self.saved_path_mode_for_block = Some(self.exact_stop_check);
            self.exact_stop_check = true;
            machine.select_path_mode(true);
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[90, 91])) {
            Some(90) => self.ctx.absolute = true,
            Some(91) => self.ctx.absolute = false,
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[15, 16])) {
            Some(15) => self.ctx.polar = false,
            Some(16) => self.ctx.polar = true,
            _ => {}
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[98, 99])) {
            Some(98) => self.retract_mode = RetractMode::Last,
            Some(99) => self.retract_mode = RetractMode::R,
            _ => {}
        }
        self.stage_home_cycles(block, axis_words_consumed, machine)?;
        Ok(())
    }

    fn stage_home_cycles<M: MachineCollaborator>(
        &mut self,
        block: &Block,
        axis_words_consumed: &mut bool,
        machine: &mut M,
    ) -> Result<(), CoreError> {
        if block.dotted('G', 92, 1) {
            self.ctx.local_offset = (0.0, 0.0, 0.0);
            *axis_words_consumed = true;
            return Ok(());
        }
        match undisambiguate(block.has_word(&self.params, 'G', &[28, 29, 30, 80])) {
            Some(28) | Some(30) => {
                let x = block.get_real(&self.params, 'X');
                let y = block.get_real(&self.params, 'Y');
                let z = block.get_real(&self.params, 'Z');
                let mut mask = 0u8;
                if x.is_some() {
                    mask |= 0b001;
                }
                if y.is_some() {
                    mask |= 0b010;
                }
                if z.is_some() {
                    mask |= 0b100;
                }
                machine.move_home(mask)?;
                *axis_words_consumed = true;
            }
            Some(29) => {
                machine.move_home(0)?;
            }
            Some(80) => {
                if self.motion_mode == MotionMode::Cycle {
                    self.motion_mode = MotionMode::Off;
                }
                self.cycle_id = None;
            }
            _ => {}
        }
        Ok(())
    }

    // ---- Stage 10: data-input mode (G10/G11) ----
    fn stage_data_input(&mut self, block: &Block, axis_words_consumed: &mut bool) -> Result<(), CoreError> {
        if undisambiguate(block.has_word(&self.params, 'G', &[10])).is_some() {
            if self.motion_mode != MotionMode::Store {
                self.old_motion_mode = self.motion_mode;
            }
            self.motion_mode = MotionMode::Store;
            *axis_words_consumed = true;
            let l = block.get_integer_default(&self.params, 'L', 1);
            let p = block.get_integer_default(&self.params, 'P', 0);
            match l {
                1 => {
                    // L1 takes a radius via `R`, not a diameter: doubled
                    // before storing, per the reference's
                    // `tool.diameter = inch_math(get_gcode_word_real('R'), ...) * 2.0`.
                    if let Some(r) = block.get_real(&self.params, 'R') {
                        let mut tool = self.tools.fetch(&self.params, p);
                        tool.index = p;
                        tool.diameter = math::inch(r, self.ctx.units_inch) * 2.0;
                        self.tools.update(&mut self.params, tool)?;
                    }
                }
                2 => {
                    if p >= 1 && p <= 6 {
                        let base = params::PARM_FIRST_OFFSET + (p - 1) * 3;
                        if let Some(x) = block.get_real(&self.params, 'X') {
                            self.params.update(base + params::AXIS_X, x)?;
                        }
                        if let Some(y) = block.get_real(&self.params, 'Y') {
                            self.params.update(base + params::AXIS_Y, y)?;
                        }
                        if let Some(z) = block.get_real(&self.params, 'Z') {
                            self.params.update(base + params::AXIS_Z, z)?;
                        }
                        self.params.commit();
                    }
                }
                3 => {
                    let mut tool = self.tools.fetch(&self.params, p);
                    tool.index = p;
                    if let Some(h) = block.get_real(&self.params, 'H') {
                        tool.length = math::inch(h, self.ctx.units_inch);
                    }
                    if let Some(d) = block.get_real(&self.params, 'D') {
                        tool.diameter = math::inch(d, self.ctx.units_inch);
                    }
                    self.tools.update(&mut self.params, tool)?;
                }
                _ => {}
            }
            return Ok(());
        }
        if undisambiguate(block.has_word(&self.params, 'G', &[11])).is_some() {
            self.motion_mode = self.old_motion_mode;
        }
        Ok(())
    }

    // ---- Stage 11: G92/G52 offset set ----
    fn stage_offset(&mut self, block: &Block, axis_words_consumed: &mut bool) {
        if undisambiguate(block.has_word(&self.params, 'G', &[92])).is_none()
            && undisambiguate(block.has_word(&self.params, 'G', &[52])).is_none()
        {
            return;
        }
        let x = block.get_real(&self.params, 'X');
        let y = block.get_real(&self.params, 'Y');
        let z = block.get_real(&self.params, 'Z');
        if let Some(x) = x {
            self.ctx.local_offset.0 = x;
        }
        if let Some(y) = y {
            self.ctx.local_offset.1 = y;
        }
        if let Some(z) = z {
            self.ctx.local_offset.2 = z;
        }
        *axis_words_consumed = x.is_some() || y.is_some() || z.is_some();
    }

    // ---- Stage 12: motion mode ----
    fn stage_motion_mode(&mut self, block: &Block) {
        match undisambiguate(block.has_word(&self.params, 'G', &[0, 1, 2, 3])) {
            Some(0) => self.motion_mode = MotionMode::Rapid,
            Some(1) => self.motion_mode = MotionMode::Linear,
            Some(2) => {
                self.motion_mode = MotionMode::Arc;
                self.ccw = false;
            }
            Some(3) => {
                self.motion_mode = MotionMode::Arc;
                self.ccw = true;
            }
            _ => {}
        }
    }

    // ---- Stage 13: canned cycle select ----
    fn stage_cycle_select(&mut self, block: &Block) {
        let candidates = [73, 74, 76, 77, 81, 82, 83, 84, 85, 86, 87, 88, 89, 31, 38];
        let code = block.has_word(&self.params, 'G', &candidates);
        if code == 0 {
            return;
        }
        if let Some(id) = cycle_id_for_code(code) {
            self.cycle_id = Some(id);
            self.motion_mode = MotionMode::Cycle;
        }
    }

    // ---- Stage 14: aux motion (M19 orient, indexer, Z retract) ----
    fn stage_aux_motion<M: MachineCollaborator>(&mut self, block: &Block, machine: &mut M) -> Result<(), CoreError> {
        if undisambiguate(block.has_word(&self.params, 'M', &[19])).is_some() {
            let p = block.get_real_default(&self.params, 'P', 0.0);
            machine.move_aux(0xFF, p)?;
        }
        Ok(())
    }

    // ---- Stage 15: macro call (G65) ----
    fn stage_macro_call<I: InputSource>(
        &mut self,
        block: &Block,
        axis_words_consumed: &mut bool,
        input: &mut I,
    ) -> Result<(), CoreError> {
        if undisambiguate(block.has_word(&self.params, 'G', &[65])).is_none() {
            return Ok(());
        }
        self.motion_mode = MotionMode::Macro;

        // Snapshot the macro-local range *before* the new call's arguments
        // overwrite it, so `M99` can restore the caller's locals.
        let snapshot = self.params.snapshot_locals();

        // `P` doubles as both a macro argument (param 16) and the
        // subroutine number; axis words on a macro-call line (rare) are
        // considered spent by the call itself.
        for letter in "ABCIJKDHLPQRUVWXYZ".chars() {
            if let Some(v) = block.get_real(&self.params, letter) {
                if let Some(param) = macro_param_for(letter) {
                    self.params.update(param, v)?;
                }
            }
        }
        self.params.commit();
        self.param_stack.push(snapshot);

        let p = block.get_integer_default(&self.params, 'P', 0);
        let return_offset = input.tell();
        self.program_stack.push(ProgramFrame {
            offset: return_offset,
            macro_call: true,
            repeat_count: 0,
        });
        let target = input.get_program(p).ok_or(CoreError::ProgramNotFound(p))?;
        input.seek(target);
        self.program_stack.push(ProgramFrame {
            offset: input.tell(),
            macro_call: true,
            repeat_count: 1,
        });

        *axis_words_consumed = true;
        Ok(())
    }

    /// The sequence point: decide whether this block has a motion target,
    /// and if so, transform it (§4.7 "Sequence point" / "Per-motion-mode
    /// finalize"). Returns `(null_move, Some(machine_frame_target))`.
    fn sequence_point(
        &mut self,
        block: &Block,
        axis_words_consumed: bool,
    ) -> Result<(bool, (f64, f64, f64)), CoreError> {
        if axis_words_consumed
            || matches!(self.motion_mode, MotionMode::Off | MotionMode::Store | MotionMode::Macro)
        {
            return Ok((true, (0.0, 0.0, 0.0)));
        }
        let wx = block.get_real(&self.params, 'X');
        let wy = block.get_real(&self.params, 'Y');
        let wz = block.get_real(&self.params, 'Z');
        if wx.is_none() && wy.is_none() && wz.is_none() {
            return Ok((true, (0.0, 0.0, 0.0)));
        }
        if self.motion_mode == MotionMode::Arc {
            self.fetch_arc_words(block);
        }
        let target = if self.motion_mode == MotionMode::Cycle {
            let cx = wx.unwrap_or(if self.ctx.absolute { self.ctx.c.0 } else { 0.0 });
            let cy = wy.unwrap_or(if self.ctx.absolute { self.ctx.c.1 } else { 0.0 });
            let cz = wz.unwrap_or(if self.ctx.absolute { self.ctx.c.2 } else { 0.0 });
            self.ctx.c = (cx, cy, cz);
            (cx, cy, cz)
        } else {
            let origin = wcs_origin(&self.params, self.ctx.current_wcs);
            math::move_math(
                &mut self.ctx,
                AxisWords { x: wx, y: wy, z: wz },
                origin,
            )
        };
        Ok((false, target))
    }

    fn fetch_arc_words(&mut self, block: &Block) {
        let i = block.get_real(&self.params, 'I');
        let j = block.get_real(&self.params, 'J');
        let k = block.get_real(&self.params, 'K');
        let r = block.get_real(&self.params, 'R');
        if let Some(i) = i {
            self.last_i = math::inch(i, self.ctx.units_inch);
        }
        if let Some(j) = j {
            self.last_j = math::inch(j, self.ctx.units_inch);
        }
        if let Some(k) = k {
            self.last_k = math::inch(k, self.ctx.units_inch);
        }
        if let Some(r) = r {
            self.last_r = math::inch(r, self.ctx.units_inch);
        }
        self.arc_r_given_this_block = r.is_some();
    }

    /// Commit the end-of-block machine pose to the well-known CEOB
    /// parameter range, per §3's "end-of-block machine pose" scalar slots.
    fn commit_ceob(&mut self, pos: (f64, f64, f64)) -> Result<(), CoreError> {
        self.params.update(params::PARM_FIRST_CEOB + params::AXIS_X, pos.0)?;
        self.params.update(params::PARM_FIRST_CEOB + params::AXIS_Y, pos.1)?;
        self.params.update(params::PARM_FIRST_CEOB + params::AXIS_Z, pos.2)?;
        self.params.update(params::PARM_CURRENT_WCS, self.ctx.current_wcs as f64)?;
        self.params.commit();
        Ok(())
    }

    fn dispatch<I, M>(
        &mut self,
        block: &Block,
        target: (f64, f64, f64),
        input: &mut I,
        machine: &mut M,
    ) -> Result<(), CoreError>
    where
        I: InputSource,
        M: MachineCollaborator,
    {
        match self.motion_mode {
            MotionMode::Rapid => {
                machine.move_line(
                    target.0,
                    target.1,
                    target.2,
                    true,
                    FeedMode::PerMinute,
                    crate::machine::TRAVERSE_FEED,
                    self.radius_comp,
                    self.corner_mode,
                )?;
                self.commit_ceob(target)?;
            }
            MotionMode::Linear => {
                let prev = self.ctx.pos;
                let (origin, comped_target) = if self.radius_comp != RadiusCompMode::Off {
                    let radius = self.tools.radius_of(&self.params, self.radius_comp_tool);
                    math::offset_linear((prev.0, prev.1), (target.0, target.1), self.radius_comp, radius)
                } else {
                    ((prev.0, prev.1), (target.0, target.1))
                };
                // Only the target shift is dispatched; the next move derives its own
                // start point from `ctx.pos` (uncompensated), same as the reference.
                let _ = origin;
                machine.move_line(
                    comped_target.0,
                    comped_target.1,
                    target.2,
                    false,
                    self.feed_mode,
                    self.feed,
                    self.radius_comp,
                    self.corner_mode,
                )?;
                self.commit_ceob(target)?;
            }
            MotionMode::Arc => {
                let (i, j, _k) = math::arc(
                    (self.ctx.pos.0, self.ctx.pos.1),
                    (target.0, target.1),
                    if self.arc_r_given_this_block { Some(self.last_r) } else { None },
                    Some((self.last_i, self.last_j)),
                    self.ccw,
                )?;
                let center = (self.ctx.pos.0 + i, self.ctx.pos.1 + j);
                let (_start, end) = if self.radius_comp != RadiusCompMode::Off {
                    let radius = self.tools.radius_of(&self.params, self.radius_comp_tool);
                    math::offset_arc(
                        center,
                        (self.ctx.pos.0, self.ctx.pos.1),
                        (target.0, target.1),
                        self.ccw,
                        self.radius_comp,
                        radius,
                    )
                } else {
                    ((self.ctx.pos.0, self.ctx.pos.1), (target.0, target.1))
                };
                machine.move_arc(
                    (end.0, end.1, target.2),
                    center,
                    self.last_i,
                    self.last_j,
                    self.last_k,
                    self.last_r,
                    !self.ccw,
                    self.ctx.plane,
                    self.feed_mode,
                    self.feed,
                    self.radius_comp,
                    self.corner_mode,
                )?;
                self.commit_ceob(target)?;
            }
            MotionMode::Cycle => {
                self.dispatch_cycle(block, target, input, machine)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_cycle<I, M>(
        &mut self,
        block: &Block,
        target: (f64, f64, f64),
        input: &mut I,
        machine: &mut M,
    ) -> Result<(), CoreError>
    where
        I: InputSource,
        M: MachineCollaborator,
    {
        let Some(id) = self.cycle_id else { return Ok(()) };

        if let Some(r) = block.get_real(&self.params, 'R') {
            self.cycle_r = math::inch(r, self.ctx.units_inch);
        }
        let repeats = block.get_integer_default(&self.params, 'L', 1).max(1);
        let chip_break = math::inch(block.get_real_default(&self.params, 'Q', 0.0), self.ctx.units_inch);
        let dwell = block.get_real_default(&self.params, 'P', 0.0);
        let thread_pitch = math::inch(block.get_real_default(&self.params, 'K', 0.0), self.ctx.units_inch);
        let back_bore = (
            math::inch(block.get_real_default(&self.params, 'I', 0.0), self.ctx.units_inch),
            math::inch(block.get_real_default(&self.params, 'J', 0.0), self.ctx.units_inch),
            math::inch(block.get_real_default(&self.params, 'K', 0.0), self.ctx.units_inch),
        );

        let cz_before = self.ctx.pos.2;
        self.cycle_saved = Some(CycleSaved {
            c: self.ctx.c,
            last_z: cz_before,
        });

        let to_r_first = if self.ctx.absolute {
            self.ctx.c.2 < self.cycle_r
        } else {
            self.cycle_r > 0.0
        };
        if to_r_first {
            let origin = wcs_origin(&self.params, self.ctx.current_wcs);
            let prep = math::move_math(
                &mut self.ctx,
                AxisWords { x: Some(target.0), y: Some(target.1), z: Some(self.cycle_r) },
                origin,
            );
            machine.move_line(
                prep.0,
                prep.1,
                prep.2,
                true,
                FeedMode::PerMinute,
                crate::machine::TRAVERSE_FEED,
                self.radius_comp,
                self.corner_mode,
            )?;
            // move_math mutated ctx.pos/g to the prep target; restore so the
            // splice's own G-code re-derives the real target from scratch.
            self.ctx.pos = prep;
        }
        if !self.ctx.absolute {
            self.cycle_r = 0.0;
        }

        let params = CycleParams {
            id,
            r: self.cycle_r,
            feed: self.feed,
            repeats,
            chip_break,
            dwell,
            thread_pitch,
            back_bore,
            absolute: self.ctx.absolute,
        };
        let program = cycles::generate(&params, target.0, target.1, target.2);
        input.splice(&program);
        Ok(())
    }

    fn post_block_cleanup<I, M>(&mut self, block: &Block, input: &mut I, machine: &mut M) -> Result<(), CoreError>
    where
        I: InputSource,
        M: MachineCollaborator,
    {
        if let Some(old) = self.saved_path_mode_for_block.take() {
            self.exact_stop_check = old;
            machine.select_path_mode(old);
        }
        if let Some(old) = self.saved_wcs_for_block.take() {
            self.ctx.current_wcs = old;
        }
        if block.scan_assignments(&mut self.params)? {
            self.params.commit();
        }

        self.program_control(block, input, machine)?;
        self.subcall(block, input)?;

        if input.end_of_spliced() {
            self.motion_mode = MotionMode::Cycle;
            if let Some(saved) = self.cycle_saved.take() {
                if self.retract_mode == RetractMode::Last {
                    let origin = wcs_origin(&self.params, self.ctx.current_wcs);
                    let pos = math::move_math(
                        &mut self.ctx,
                        AxisWords { x: Some(saved.c.0), y: Some(saved.c.1), z: Some(saved.last_z) },
                        origin,
                    );
                    machine.move_line(
                        pos.0,
                        pos.1,
                        pos.2,
                        true,
                        FeedMode::PerMinute,
                        crate::machine::TRAVERSE_FEED,
                        self.radius_comp,
                        self.corner_mode,
                    )?;
                    self.commit_ceob(pos)?;
                }
                self.ctx.c = saved.c;
            }
        }
        Ok(())
    }

    fn program_control<I, M>(&mut self, block: &Block, input: &mut I, machine: &mut M) -> Result<(), CoreError>
    where
        I: InputSource,
        M: MachineCollaborator,
    {
        if let Some(17) = undisambiguate(block.has_word(&self.params, 'M', &[17])) {
            machine.enable_power(true);
        }
        if let Some(18) = undisambiguate(block.has_word(&self.params, 'M', &[18])) {
            machine.enable_power(false);
        }
        for code in 61..=63u32 {
            if undisambiguate(block.has_word(&self.params, 'M', &[code])).is_some() {
                machine.move_aux(0xF0 + (code - 61) as u8, 0.0)?;
            }
        }
        if undisambiguate(block.has_word(&self.params, 'M', &[112])).is_some() {
            machine.do_stop(false);
            machine.enable_power(false);
            self.still_running = false;
            return Ok(());
        }
        if undisambiguate(block.has_word(&self.params, 'M', &[92])).is_some() {
            machine.do_stop(false);
            input.rewind();
            self.still_running = false;
            return Ok(());
        }
        match undisambiguate(block.has_word(&self.params, 'M', &[0, 1, 2, 30, 60])) {
            Some(0) => machine.do_stop(false),
            Some(1) => machine.do_stop(true),
            Some(2) | Some(30) => {
                machine.do_stop(false);
                input.rewind();
                self.still_running = false;
            }
            Some(60) => machine.do_stop(false),
            _ => {}
        }
        Ok(())
    }

    fn subcall<I: InputSource>(&mut self, block: &Block, input: &mut I) -> Result<(), CoreError> {
        if undisambiguate(block.has_word(&self.params, 'M', &[98])).is_some() {
            let p = block.get_integer_default(&self.params, 'P', 0);
            let l = block.get_integer_default(&self.params, 'L', 1);
            let return_offset = input.tell();
            self.program_stack.push(ProgramFrame {
                offset: return_offset,
                macro_call: false,
                repeat_count: 0,
            });
            let target = input.get_program(p).ok_or(CoreError::ProgramNotFound(p))?;
            input.seek(target);
            self.program_stack.push(ProgramFrame {
                offset: input.tell(),
                macro_call: false,
                repeat_count: l.max(1),
            });
            return Ok(());
        }
        if undisambiguate(block.has_word(&self.params, 'M', &[99])).is_some() {
            let mut frame = self.program_stack.pop()?;
            if frame.repeat_count > 1 {
                frame.repeat_count -= 1;
                let loop_top = frame.offset;
                self.program_stack.push(frame);
                input.seek(loop_top);
            } else {
                let outer = self.program_stack.pop()?;
                input.seek(outer.offset);
                if outer.macro_call {
                    let snapshot = self.param_stack.pop()?;
                    self.params.restore_locals(&snapshot);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::StackInput;
    use crate::machine::RecordingMachine;

    fn run(gcode: &str, state: &mut GCodeState) -> RecordingMachine {
        let mut input = StackInput::new(gcode);
        let mut machine = RecordingMachine::new();
        let mut buf = String::new();
        while input.fetch_line(&mut buf) {
            state.update(&buf, &mut input, &mut machine).unwrap();
        }
        machine
    }

    #[test]
    fn scenario_inch_rapid_traverse() {
        // G20 G90 G00 X1 Y1 -> machine line to (25.4, 25.4, 0), rapid.
        let mut state = GCodeState::new();
        let machine = run("G20 G90 G00 X1 Y1\n", &mut state);
        assert_eq!(
            machine.calls,
            vec![crate::machine::Call::MoveLine {
                x: 25.4,
                y: 25.4,
                z: 0.0,
                rapid: true,
                feed_mode: FeedMode::PerMinute,
                feed: crate::machine::TRAVERSE_FEED,
                rad_comp: RadiusCompMode::Off,
                corner: CornerMode::default(),
            }]
        );
    }

    #[test]
    fn scenario_relative_linear_moves_accumulate() {
        // G21 G91 G01 X10 Y0 F100 twice -> two linear moves ending at (20,0,0).
        let mut state = GCodeState::new();
        let machine = run("G21 G91 G01 X10 Y0 F100\nX10 Y0\n", &mut state);
        assert_eq!(machine.calls.len(), 2);
        assert_eq!(
            machine.calls[1],
            crate::machine::Call::MoveLine {
                x: 20.0,
                y: 0.0,
                z: 0.0,
                rapid: false,
                feed_mode: FeedMode::PerMinute,
                feed: 100.0,
                rad_comp: RadiusCompMode::Off,
                corner: CornerMode::default(),
            }
        );
    }

    #[test]
    fn scenario_arc_cw_in_xy() {
        // G17 G02 X10 Y0 I5 J0 from (0,0) -> arc to (10,0), center (5,0).
        let mut state = GCodeState::new();
        let machine = run("G17 G90 G02 X10 Y0 I5 J0\n", &mut state);
        match &machine.calls[0] {
            crate::machine::Call::MoveArc { end, center, clockwise, .. } => {
                assert!((end.0 - 10.0).abs() < 1e-6);
                assert!((end.1 - 0.0).abs() < 1e-6);
                assert!((center.0 - 5.0).abs() < 1e-6);
                assert!((center.1 - 0.0).abs() < 1e-6);
                assert!(*clockwise);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn scenario_g92_offset_applies_to_subsequent_move() {
        // G92 X0 Y0 Z5 then G00 X10 -> machine line to (10,0,5).
        let mut state = GCodeState::new();
        let machine = run("G90 G92 X0 Y0 Z5\nG00 X10\n", &mut state);
        assert_eq!(
            machine.calls,
            vec![crate::machine::Call::MoveLine {
                x: 10.0,
                y: 0.0,
                z: 5.0,
                rapid: true,
                feed_mode: FeedMode::PerMinute,
                feed: crate::machine::TRAVERSE_FEED,
                rad_comp: RadiusCompMode::Off,
                corner: CornerMode::default(),
            }]
        );
    }

    #[test]
    fn scenario_parameter_indirection_in_motion() {
        // #100=3.5 then G00 X#100 -> traverse to X=3.5.
        let mut state = GCodeState::new();
        let machine = run("#100=3.5\nG90 G00 X#100\n", &mut state);
        assert_eq!(
            machine.calls,
            vec![crate::machine::Call::MoveLine {
                x: 3.5,
                y: 0.0,
                z: 0.0,
                rapid: true,
                feed_mode: FeedMode::PerMinute,
                feed: crate::machine::TRAVERSE_FEED,
                rad_comp: RadiusCompMode::Off,
                corner: CornerMode::default(),
            }]
        );
    }

    #[test]
    fn m98_call_returns_to_the_line_after_the_call_and_restores_locals() {
        let gcode = "%100\nG00 X1\nM99\nM98 P100\nG00 X9\n";
        let mut input = StackInput::new(gcode);
        let mut machine = RecordingMachine::new();
        let mut state = GCodeState::new();
        state.params.update(1, 42.0).unwrap();
        state.params.commit();
        let mut buf = String::new();
        while input.fetch_line(&mut buf) {
            state.update(&buf, &mut input, &mut machine).unwrap();
        }
        assert_eq!(state.params.fetch(1), 42.0);
        assert_eq!(
            machine.calls,
            vec![
                crate::machine::Call::MoveLine {
                    x: 1.0,
                    y: 0.0,
                    z: 0.0,
                    rapid: true,
                    feed_mode: FeedMode::PerMinute,
                    feed: crate::machine::TRAVERSE_FEED,
                    rad_comp: RadiusCompMode::Off,
                    corner: CornerMode::default(),
                },
                crate::machine::Call::MoveLine {
                    x: 9.0,
                    y: 0.0,
                    z: 0.0,
                    rapid: true,
                    feed_mode: FeedMode::PerMinute,
                    feed: crate::machine::TRAVERSE_FEED,
                    rad_comp: RadiusCompMode::Off,
                    corner: CornerMode::default(),
                },
            ]
        );
    }

    #[test]
    fn m99_without_a_matching_call_is_a_stack_underflow() {
        let mut input = StackInput::new("M99\n");
        let mut machine = RecordingMachine::new();
        let mut state = GCodeState::new();
        let mut buf = String::new();
        input.fetch_line(&mut buf);
        assert!(matches!(
            state.update(&buf, &mut input, &mut machine),
            Err(CoreError::StackUnderflow)
        ));
    }

    #[test]
    fn g65_macro_call_binds_args_to_locals_and_restores_them_on_return() {
        let gcode = "%100\nG00 X#1\nM99\nG65 P100 A7\nG00 X9\n";
        let mut input = StackInput::new(gcode);
        let mut machine = RecordingMachine::new();
        let mut state = GCodeState::new();
        state.params.update(1, 3.0).unwrap();
        state.params.commit();
        let mut buf = String::new();
        while input.fetch_line(&mut buf) {
            state.update(&buf, &mut input, &mut machine).unwrap();
        }
        assert_eq!(state.params.fetch(1), 3.0);
        assert_eq!(
            machine.calls,
            vec![
                crate::machine::Call::MoveLine {
                    x: 7.0,
                    y: 0.0,
                    z: 0.0,
                    rapid: true,
                    feed_mode: FeedMode::PerMinute,
                    feed: crate::machine::TRAVERSE_FEED,
                    rad_comp: RadiusCompMode::Off,
                    corner: CornerMode::default(),
                },
                crate::machine::Call::MoveLine {
                    x: 9.0,
                    y: 0.0,
                    z: 0.0,
                    rapid: true,
                    feed_mode: FeedMode::PerMinute,
                    feed: crate::machine::TRAVERSE_FEED,
                    rad_comp: RadiusCompMode::Off,
                    corner: CornerMode::default(),
                },
            ]
        );
    }

    #[test]
    fn g41_radius_comp_displaces_linear_target_left_of_travel() {
        let mut state = GCodeState::new();
        let mut tool = crate::tools::Tool { index: 1, kind: 0.0, diameter: 4.0, length: 0.0 };
        state.tools.update(&mut state.params, tool).unwrap();
        tool.diameter = 4.0;
        let machine = run("G90 G00 X0 Y0\nG41 D1 G01 X10 Y0\n", &mut state);
        match machine.calls.last().unwrap() {
            crate::machine::Call::MoveLine { x, y, .. } => {
                assert!((x - 10.0).abs() < 1e-6);
                assert!((y - 2.0).abs() < 1e-6);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn g10_l1_stores_double_the_given_radius_as_diameter() {
        let mut state = GCodeState::new();
        run("G21 G10 L1 P1 R2.5\n", &mut state);
        assert_eq!(state.tools.fetch(&state.params, 1).diameter, 5.0);
    }

    #[test]
    fn g10_l1_converts_inch_radius_before_doubling() {
        let mut state = GCodeState::new();
        run("G20 G10 L1 P1 R1.0\n", &mut state);
        assert_eq!(state.tools.fetch(&state.params, 1).diameter, 2.0 * 25.4);
    }

    #[test]
    fn g10_l3_converts_length_and_diameter_to_inches() {
        let mut state = GCodeState::new();
        run("G20 G10 L3 P2 H1.0 D0.5\n", &mut state);
        let tool = state.tools.fetch(&state.params, 2);
        assert_eq!(tool.length, 25.4);
        assert_eq!(tool.diameter, 0.5 * 25.4);
    }

    #[test]
    fn g81_drill_cycle_preps_to_r_then_splices_feed_and_retract() {
        let mut state = GCodeState::new();
        state.ctx.pos.2 = 10.0;
        state.ctx.c.2 = 10.0;
        let machine = run("G90 G81 X5 Y5 Z-3 R1 F50\n", &mut state);
        // First dispatched call is the preparatory rapid to R.
        assert_eq!(
            machine.calls[0],
            crate::machine::Call::MoveLine {
                x: 5.0,
                y: 5.0,
                z: 1.0,
                rapid: true,
                feed_mode: FeedMode::PerMinute,
                feed: crate::machine::TRAVERSE_FEED,
                rad_comp: RadiusCompMode::Off,
                corner: CornerMode::default(),
            }
        );
        // The spliced cycle body then feeds down to Z and retracts to R.
        assert!(machine.calls.iter().any(|c| matches!(
            c,
            crate::machine::Call::MoveLine { x, y, z, rapid: false, .. }
                if (*x - 5.0).abs() < 1e-6 && (*y - 5.0).abs() < 1e-6 && (*z - (-3.0)).abs() < 1e-6
        )));
    }

    #[test]
    fn parameter_assignment_is_committed_not_left_staged() {
        // A bare `#100=...` assignment block must flush to the committed map
        // so `persistent_snapshot` (and so the on-disk parameter file) sees
        // it, not just `fetch` (which sees staged-over-committed anyway).
        let mut state = GCodeState::new();
        run("#100=42.0\n", &mut state);
        assert_eq!(
            state.params.persistent_snapshot().get(&params::PARM_FIRST_OFFSET),
            Some(&42.0)
        );
    }

    #[test]
    fn block_longer_than_max_is_rejected() {
        let mut state = GCodeState::new();
        let mut input = StackInput::new("");
        let mut machine = RecordingMachine::new();
        let long = "X".repeat(300);
        assert!(matches!(
            state.update(&long, &mut input, &mut machine),
            Err(CoreError::BlockTooLong)
        ));
    }
}
