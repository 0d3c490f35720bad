//! Coordinate transformation pipeline (C4).
//!
//! Grounded on `gcode-math.c`: a chain of small pure functions
//! (`relative_math`, `system_math`, `length_comp_math`, `inch_math`,
//! `polar_math`, `rotation_math`, `scaling_math`, `arc_math`,
//! `vector_side_math`, `offset_math`) composed by `move_math` into the full
//! word-value -> machine-frame transform. Each step is kept as its own
//! function (rather than one long pass) so it can be unit tested in
//! isolation, per the design note in the write-up this crate follows.

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    Xy,
    Yz,
    Zx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthCompMode {
    #[default]
    Off,
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadiusCompMode {
    #[default]
    Off,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Collinear,
}

pub type Point3 = (f64, f64, f64);

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationSpec {
    pub on: bool,
    pub pivot: (f64, f64),
    pub angle_deg: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ScalingSpec {
    pub on: bool,
    pub pivot: Point3,
    pub factor: Point3,
}

impl Default for ScalingSpec {
    fn default() -> Self {
        Self {
            on: false,
            pivot: (0.0, 0.0, 0.0),
            factor: (1.0, 1.0, 1.0),
        }
    }
}

/// Missing-word words arriving into one block's motion resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// The mutable coordinate-system state `move_math` reads and updates.
/// Owned by the interpreter's [`crate::state::GCodeState`].
#[derive(Debug, Clone, Copy)]
pub struct MoveContext {
    pub plane: Plane,
    pub absolute: bool,
    pub polar: bool,
    pub units_inch: bool,
    /// 0 = MCS, 1..=6 = WCS1..WCS6.
    pub current_wcs: u8,
    pub local_offset: Point3,
    pub length_comp: (LengthCompMode, f64),
    pub rotation: RotationSpec,
    pub scaling: ScalingSpec,
    /// Last raw word-address value seen per axis (modal restoration).
    pub c: Point3,
    /// Last accumulated logical position, pre-WCS (relative-mode base).
    pub g: Point3,
    /// Last dispatched machine-frame pose.
    pub pos: Point3,
}

impl Default for MoveContext {
    fn default() -> Self {
        Self {
            plane: Plane::Xy,
            absolute: true,
            polar: false,
            units_inch: false,
            current_wcs: 1,
            local_offset: (0.0, 0.0, 0.0),
            length_comp: (LengthCompMode::Off, 0.0),
            rotation: RotationSpec::default(),
            scaling: ScalingSpec::default(),
            c: (0.0, 0.0, 0.0),
            g: (0.0, 0.0, 0.0),
            pos: (0.0, 0.0, 0.0),
        }
    }
}

pub const INCH_TO_MM: f64 = 25.4;

/// `relative_math`: absolute mode passes the input through; relative mode
/// accumulates it against the previous logical position.
pub fn relative(input: f64, prev: f64, absolute: bool) -> f64 {
    if absolute {
        input
    } else {
        prev + input
    }
}

/// Substitutes for a missing axis word: the last logical position in
/// absolute mode, zero (no motion on that axis) in relative mode.
pub fn current_or_zero(word: Option<f64>, absolute: bool, last_g: f64) -> f64 {
    word.unwrap_or(if absolute { last_g } else { 0.0 })
}

/// Substitutes for a missing axis word with the last raw word value,
/// regardless of absolute/relative — used by canned-cycle axis fetch.
pub fn current_or_last(word: Option<f64>, last_raw: f64) -> f64 {
    word.unwrap_or(last_raw)
}

/// `system_math`: WCS origin + G92/G52 local offset. A no-op in MCS.
pub fn system(input: f64, is_mcs: bool, local_offset: f64, wcs_origin: f64) -> f64 {
    if is_mcs {
        input
    } else {
        wcs_origin + local_offset + input
    }
}

/// `length_comp_math`: applied to Z only by the caller.
pub fn length_comp(input: f64, mode: LengthCompMode, offset: f64) -> f64 {
    match mode {
        LengthCompMode::Off => input,
        LengthCompMode::Positive => input + offset,
        LengthCompMode::Negative => input - offset,
    }
}

/// `inch_math`: G20 scales the internal millimetre frame up by 25.4.
pub fn inch(value: f64, is_inch: bool) -> f64 {
    if is_inch {
        value * INCH_TO_MM
    } else {
        value
    }
}

/// `polar_math`: (radius, angle-in-degrees) -> cartesian offset from origin.
pub fn polar(radius: f64, angle_deg: f64) -> (f64, f64) {
    let theta = angle_deg.to_radians();
    (radius * theta.cos(), radius * theta.sin())
}

/// `rotation_math`: rotate a 2D point about a pivot by `angle_deg` (G68).
pub fn rotation(point: (f64, f64), angle_deg: f64, pivot: (f64, f64)) -> (f64, f64) {
    let theta = angle_deg.to_radians();
    let (dx, dy) = (point.0 - pivot.0, point.1 - pivot.1);
    let (c, s) = (theta.cos(), theta.sin());
    (pivot.0 + dx * c - dy * s, pivot.1 + dx * s + dy * c)
}

/// `scaling_math`: scale a coordinate about a pivot by a per-axis factor.
pub fn scaling(input: f64, pivot: f64, factor: f64) -> f64 {
    pivot + (input - pivot) * factor
}

/// `vector_side_math`: which side of line `a->b` does `c` fall on.
pub fn vector_side(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Side {
    let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
    if cross.abs() < 1e-9 {
        Side::Collinear
    } else if cross > 0.0 {
        Side::Left
    } else {
        Side::Right
    }
}

/// `arc_math`: resolve I/J/K from a supplied R (major/minor arc ambiguity
/// handled via `invert`), or pass I/J through when R was not given.
pub fn arc(
    start: (f64, f64),
    end: (f64, f64),
    r: Option<f64>,
    ij: Option<(f64, f64)>,
    invert: bool,
) -> Result<(f64, f64, f64), CoreError> {
    if let Some(r) = r {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let d = (dx * dx + dy * dy).sqrt();
        if d < 1e-12 {
            return Ok((0.0, 0.0, 0.0));
        }
        let half_chord_sq = r * r - (d * d) / 4.0;
        if half_chord_sq < 0.0 {
            return Err(CoreError::MalformedNumber('R'));
        }
        let h = half_chord_sq.sqrt();
        let s = if invert { -1.0 } else { 1.0 };
        let i = dx / 2.0 + s * h * dy / d;
        let j = dy / 2.0 - s * h * dx / d;
        Ok((i, j, 0.0))
    } else {
        let (i, j) = ij.unwrap_or((0.0, 0.0));
        Ok((i, j, 0.0))
    }
}

/// `offset_math` for a linear move: displace both the compensation origin
/// and the target perpendicular to the programmed direction by `offset`.
pub fn offset_linear(
    origin: (f64, f64),
    target: (f64, f64),
    comp: RadiusCompMode,
    offset: f64,
) -> ((f64, f64), (f64, f64)) {
    if comp == RadiusCompMode::Off || offset == 0.0 {
        return (origin, target);
    }
    let invert = if comp == RadiusCompMode::Left { 1.0 } else { -1.0 };
    let (dx, dy) = (target.0 - origin.0, target.1 - origin.1);
    let angle = dy.atan2(dx);
    // Perpendicular unit vector, rotated +90deg and sign-flipped for right comp.
    let (px, py) = (-angle.sin() * invert, angle.cos() * invert);
    let shift = (px * offset, py * offset);
    (
        (origin.0 + shift.0, origin.1 + shift.1),
        (target.0 + shift.0, target.1 + shift.1),
    )
}

/// `offset_math` for an arc move: grow or shrink the radius depending on
/// which side of the arc the compensation falls on, with the exact-180°
/// semicircle case resolved by direction (`ccw`) rather than cross product.
pub fn offset_arc(
    center: (f64, f64),
    start: (f64, f64),
    end: (f64, f64),
    ccw: bool,
    comp: RadiusCompMode,
    offset: f64,
) -> (f64, f64) {
    if comp == RadiusCompMode::Off || offset == 0.0 {
        return (start, end);
    }
    let s_angle = (start.1 - center.1).atan2(start.0 - center.0);
    let e_angle = (end.1 - center.1).atan2(end.0 - center.0);
    let invert = (s_angle - e_angle < 0.0) != ccw;
    let comp_side = if comp == RadiusCompMode::Left {
        Side::Left
    } else {
        Side::Right
    };
    let center_side = if (s_angle - e_angle).abs() < 1e-9 || ((s_angle - e_angle).abs() - std::f64::consts::PI).abs() < 1e-9 {
        if ccw {
            Side::Left
        } else {
            Side::Right
        }
    } else {
        vector_side(start, end, center)
    };
    let delta = if invert { -offset } else { offset };
    let grow = center_side == comp_side;
    let r = (start.0 - center.0).hypot(start.1 - center.1);
    let new_r = if grow { r + delta } else { r - delta };
    let scale = |p: (f64, f64)| -> (f64, f64) {
        let a = (p.1 - center.1).atan2(p.0 - center.0);
        (center.0 + new_r * a.cos(), center.1 + new_r * a.sin())
    };
    (scale(start), scale(end))
}

/// The full word-value -> machine-frame transform (`move_math`).
pub fn move_math(ctx: &mut MoveContext, words: AxisWords, wcs_origin: Point3) -> Point3 {
    // 1. Restore-modal: record the raw word-address state.
    let rx = words.x.unwrap_or(ctx.c.0);
    let ry = words.y.unwrap_or(ctx.c.1);
    let rz = words.z.unwrap_or(ctx.c.2);
    ctx.c = (rx, ry, rz);

    // 2 & 3. Polar conversion (forces relative accumulation) or plain
    // current-or-zero substitution, then relative accumulation against g.
    let gz_in = current_or_zero(words.z, ctx.absolute, ctx.g.2);
    let (gx, gy, gz) = if ctx.polar && ctx.plane == Plane::Xy {
        let (px, py) = polar(rx, ry);
        (
            relative(px, ctx.g.0, false),
            relative(py, ctx.g.1, false),
            relative(gz_in, ctx.g.2, ctx.absolute),
        )
    } else {
        let ix = current_or_zero(words.x, ctx.absolute, ctx.g.0);
        let iy = current_or_zero(words.y, ctx.absolute, ctx.g.1);
        (
            relative(ix, ctx.g.0, ctx.absolute),
            relative(iy, ctx.g.1, ctx.absolute),
            relative(gz_in, ctx.g.2, ctx.absolute),
        )
    };
    ctx.g = (gx, gy, gz);

    // 4. System: WCS origin + local offset (skipped in MCS).
    let is_mcs = ctx.current_wcs == 0;
    let sx = system(gx, is_mcs, ctx.local_offset.0, wcs_origin.0);
    let sy = system(gy, is_mcs, ctx.local_offset.1, wcs_origin.1);
    let sz_pre = system(gz, is_mcs, ctx.local_offset.2, wcs_origin.2);

    // 5. Length compensation, Z only.
    let sz = length_comp(sz_pre, ctx.length_comp.0, ctx.length_comp.1);

    // 6. Unit conversion.
    let (nx, ny, nz) = (
        inch(sx, ctx.units_inch),
        inch(sy, ctx.units_inch),
        inch(sz, ctx.units_inch),
    );

    // 7. Rotation, restricted to the active plane's axis pair.
    let (rx2, ry2, rz2) = if ctx.rotation.on {
        match ctx.plane {
            Plane::Xy => {
                let (a, b) = rotation((nx, ny), ctx.rotation.angle_deg, ctx.rotation.pivot);
                (a, b, nz)
            }
            Plane::Yz => {
                let (a, b) = rotation((ny, nz), ctx.rotation.angle_deg, ctx.rotation.pivot);
                (nx, a, b)
            }
            Plane::Zx => {
                let (a, b) = rotation((nz, nx), ctx.rotation.angle_deg, ctx.rotation.pivot);
                (b, ny, a)
            }
        }
    } else {
        (nx, ny, nz)
    };

    // 8. Scaling, per-axis.
    let (fx, fy, fz) = if ctx.scaling.on {
        (
            scaling(rx2, ctx.scaling.pivot.0, ctx.scaling.factor.0),
            scaling(ry2, ctx.scaling.pivot.1, ctx.scaling.factor.1),
            scaling(rz2, ctx.scaling.pivot.2, ctx.scaling.factor.2),
        )
    } else {
        (rx2, ry2, rz2)
    };

    // 9. Assign.
    ctx.pos = (fx, fy, fz);
    ctx.pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_absolute_passes_through() {
        assert_eq!(relative(5.0, 100.0, true), 5.0);
    }

    #[test]
    fn relative_mode_accumulates() {
        assert_eq!(relative(5.0, 10.0, false), 15.0);
    }

    #[test]
    fn system_is_noop_in_mcs() {
        assert_eq!(system(7.0, true, 1.0, 2.0), 7.0);
    }

    #[test]
    fn system_adds_origin_and_local_offset_in_wcs() {
        assert_eq!(system(7.0, false, 1.0, 2.0), 10.0);
    }

    #[test]
    fn length_comp_applies_signed_offset() {
        assert_eq!(length_comp(10.0, LengthCompMode::Positive, 2.0), 12.0);
        assert_eq!(length_comp(10.0, LengthCompMode::Negative, 2.0), 8.0);
        assert_eq!(length_comp(10.0, LengthCompMode::Off, 2.0), 10.0);
    }

    #[test]
    fn inch_conversion_scales_by_25_4() {
        assert_eq!(inch(1.0, true), 25.4);
        assert_eq!(inch(1.0, false), 1.0);
    }

    #[test]
    fn polar_matches_cartesian_quadrant() {
        let (x, y) = polar(10.0, 90.0);
        assert!((x - 0.0).abs() < 1e-9);
        assert!((y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rotation_by_90_degrees_swaps_axes() {
        let (x, y) = rotation((1.0, 0.0), 90.0, (0.0, 0.0));
        assert!(x.abs() < 1e-9);
        assert!((y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scaling_expands_about_pivot() {
        assert_eq!(scaling(12.0, 10.0, 2.0), 14.0);
    }

    #[test]
    fn arc_from_radius_matches_chord_geometry() {
        let (i, j, k) = arc((0.0, 0.0), (10.0, 0.0), Some(5.0), None, false).unwrap();
        assert!((i - 5.0).abs() < 1e-9);
        assert!(j.abs() < 1e-9);
        assert_eq!(k, 0.0);
    }

    #[test]
    fn arc_from_ij_passes_through() {
        let (i, j, _) = arc((0.0, 0.0), (10.0, 0.0), None, Some((5.0, 0.0)), false).unwrap();
        assert_eq!((i, j), (5.0, 0.0));
    }

    #[test]
    fn arc_with_impossible_radius_errs() {
        let result = arc((0.0, 0.0), (10.0, 0.0), Some(1.0), None, false);
        assert!(result.is_err());
    }

    #[test]
    fn move_math_traverse_in_absolute_metric() {
        let mut ctx = MoveContext {
            current_wcs: 0,
            ..MoveContext::default()
        };
        let pos = move_math(
            &mut ctx,
            AxisWords {
                x: Some(10.0),
                y: Some(20.0),
                z: None,
            },
            (0.0, 0.0, 0.0),
        );
        assert_eq!(pos, (10.0, 20.0, 0.0));
    }

    #[test]
    fn move_math_applies_wcs_origin() {
        let mut ctx = MoveContext {
            current_wcs: 1,
            ..MoveContext::default()
        };
        let pos = move_math(
            &mut ctx,
            AxisWords {
                x: Some(1.0),
                y: Some(1.0),
                z: Some(0.0),
            },
            (100.0, 100.0, 0.0),
        );
        assert_eq!(pos, (101.0, 101.0, 0.0));
    }

    #[test]
    fn move_math_converts_inches() {
        let mut ctx = MoveContext {
            current_wcs: 0,
            units_inch: true,
            ..MoveContext::default()
        };
        let pos = move_math(
            &mut ctx,
            AxisWords {
                x: Some(1.0),
                y: Some(1.0),
                z: Some(0.0),
            },
            (0.0, 0.0, 0.0),
        );
        assert_eq!(pos, (25.4, 25.4, 0.0));
    }

    #[test]
    fn move_math_relative_accumulates_across_two_blocks() {
        let mut ctx = MoveContext {
            current_wcs: 0,
            absolute: false,
            ..MoveContext::default()
        };
        move_math(
            &mut ctx,
            AxisWords {
                x: Some(10.0),
                y: Some(0.0),
                z: Some(0.0),
            },
            (0.0, 0.0, 0.0),
        );
        let pos = move_math(
            &mut ctx,
            AxisWords {
                x: Some(10.0),
                y: Some(0.0),
                z: Some(0.0),
            },
            (0.0, 0.0, 0.0),
        );
        assert_eq!(pos, (20.0, 0.0, 0.0));
    }

    #[test]
    fn offset_linear_displaces_perpendicular_by_radius() {
        let (_, target) = offset_linear((0.0, 0.0), (10.0, 0.0), RadiusCompMode::Left, 1.0);
        assert!((target.0 - 10.0).abs() < 1e-9);
        assert!((target.1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn offset_linear_noop_when_comp_off() {
        let (origin, target) = offset_linear((0.0, 0.0), (10.0, 0.0), RadiusCompMode::Off, 1.0);
        assert_eq!(origin, (0.0, 0.0));
        assert_eq!(target, (10.0, 0.0));
    }
}
