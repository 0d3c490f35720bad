//! Numbered parameter store (`#nnn`) with a staged-write/commit barrier.
//!
//! Mirrors the reference interpreter's `fetch_parameter`/`update_parameter`/
//! `set_parameter`/`commit_parameters` quartet: `update` stages a write,
//! `commit` flushes every staged write atomically (and, for persistent
//! ranges, asks a [`crate::params_file::ParameterPersistence`] collaborator
//! to save it), `set` writes straight through both maps for boot-time
//! defaults, and `fetch` sees staged-over-committed.

use crate::error::CoreError;
use std::collections::HashMap;

/// First of six work-coordinate-system origin blocks (X,Y,Z per system).
pub const PARM_FIRST_OFFSET: u32 = 100;
/// G92/G52 local offset, X/Y/Z.
pub const PARM_FIRST_LOCAL: u32 = 150;
/// End-of-block machine pose, X/Y/Z — committed after every dispatched move.
pub const PARM_FIRST_CEOB: u32 = 160;
pub const PARM_CURRENT_WCS: u32 = 170;
pub const PARM_SCALING: u32 = 171;
pub const PARM_BITFIELD2: u32 = 172;

pub const AXIS_X: u32 = 0;
pub const AXIS_Y: u32 = 1;
pub const AXIS_Z: u32 = 2;

/// Tool-table bases (C2): type / diameter / length, indexed by tool number.
pub const TOOL_TYPE_BASE: u32 = 1000;
pub const TOOL_DIAM_BASE: u32 = 2000;
pub const TOOL_LEN_BASE: u32 = 3000;

/// Macro local-variable range saved/restored by the parameter-snapshot stack.
pub const MACRO_LOCAL_FIRST: u32 = 1;
pub const MACRO_LOCAL_LAST: u32 = 33;

/// Highest legal parameter number.
pub const PARAM_MAX: u32 = 4000;

/// Parameters in this range survive a restart when persisted via
/// [`crate::params_file::ParameterPersistence`]. Everything else (macro
/// locals, scratch values used mid-program) is session-local.
fn is_persistent(n: u32) -> bool {
    (PARM_FIRST_OFFSET..PARM_BITFIELD2 + 1).contains(&n)
        || (TOOL_TYPE_BASE..TOOL_TYPE_BASE + 1000).contains(&n)
        || (TOOL_DIAM_BASE..TOOL_DIAM_BASE + 1000).contains(&n)
        || (TOOL_LEN_BASE..TOOL_LEN_BASE + 1000).contains(&n)
}

#[derive(Debug, Default)]
pub struct ParameterStore {
    committed: HashMap<u32, f64>,
    staged: HashMap<u32, f64>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from a persisted snapshot (committed only, no stages).
    pub fn from_committed(values: HashMap<u32, f64>) -> Self {
        Self {
            committed: values,
            staged: HashMap::new(),
        }
    }

    pub fn fetch(&self, n: u32) -> f64 {
        self.staged
            .get(&n)
            .or_else(|| self.committed.get(&n))
            .copied()
            .unwrap_or(0.0)
    }

    /// Write straight through both maps; used for boot-time defaults only.
    pub fn set(&mut self, n: u32, v: f64) -> Result<(), CoreError> {
        if n == 0 || n > PARAM_MAX {
            return Err(CoreError::ParamOutOfRange(n));
        }
        self.committed.insert(n, v);
        self.staged.insert(n, v);
        Ok(())
    }

    /// Stage a write; invisible to other readers until [`Self::commit`].
    pub fn update(&mut self, n: u32, v: f64) -> Result<(), CoreError> {
        if n == 0 || n > PARAM_MAX {
            return Err(CoreError::ParamOutOfRange(n));
        }
        self.staged.insert(n, v);
        Ok(())
    }

    /// Flush staged writes into the committed map, returning the persistent
    /// subset for a caller that wants to write them through to disk.
    pub fn commit(&mut self) -> Vec<(u32, f64)> {
        let mut persisted = Vec::new();
        for (n, v) in self.staged.drain() {
            if is_persistent(n) {
                persisted.push((n, v));
            }
            self.committed.insert(n, v);
        }
        persisted
    }

    /// Snapshot of the macro local range (1..=33), used by the parameter
    /// stack around `M98`/macro calls.
    pub fn snapshot_locals(&self) -> HashMap<u32, f64> {
        (MACRO_LOCAL_FIRST..=MACRO_LOCAL_LAST)
            .map(|n| (n, self.fetch(n)))
            .collect()
    }

    pub fn restore_locals(&mut self, snapshot: &HashMap<u32, f64>) {
        for (&n, &v) in snapshot {
            self.committed.insert(n, v);
            self.staged.remove(&n);
        }
    }

    /// All currently-committed persistent parameters, for a full save.
    pub fn persistent_snapshot(&self) -> HashMap<u32, f64> {
        self.committed
            .iter()
            .filter(|(&n, _)| is_persistent(n))
            .map(|(&n, &v)| (n, v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_defaults_to_zero() {
        let store = ParameterStore::new();
        assert_eq!(store.fetch(42), 0.0);
    }

    #[test]
    fn staged_write_visible_before_commit() {
        let mut store = ParameterStore::new();
        store.update(5, 3.5).unwrap();
        assert_eq!(store.fetch(5), 3.5);
    }

    #[test]
    fn commit_moves_staged_into_committed() {
        let mut store = ParameterStore::new();
        store.update(5, 3.5).unwrap();
        store.commit();
        assert_eq!(store.fetch(5), 3.5);
        // Re-fetch without further staging still sees the committed value.
        assert_eq!(store.staged.len(), 0);
    }

    #[test]
    fn out_of_range_parameter_rejected() {
        let mut store = ParameterStore::new();
        assert!(matches!(
            store.update(0, 1.0),
            Err(CoreError::ParamOutOfRange(0))
        ));
        assert!(matches!(
            store.update(PARAM_MAX + 1, 1.0),
            Err(CoreError::ParamOutOfRange(_))
        ));
    }

    #[test]
    fn commit_reports_only_persistent_parameters() {
        let mut store = ParameterStore::new();
        store.update(5, 1.0).unwrap(); // macro local, not persistent
        store.update(PARM_FIRST_OFFSET, 9.0).unwrap(); // WCS origin, persistent
        let persisted = store.commit();
        assert_eq!(persisted, vec![(PARM_FIRST_OFFSET, 9.0)]);
    }

    #[test]
    fn snapshot_and_restore_locals_round_trip() {
        let mut store = ParameterStore::new();
        store.update(1, 10.0).unwrap();
        store.commit();
        let snap = store.snapshot_locals();
        store.update(1, 99.0).unwrap();
        store.commit();
        assert_eq!(store.fetch(1), 99.0);
        store.restore_locals(&snap);
        assert_eq!(store.fetch(1), 10.0);
    }
}
