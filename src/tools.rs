//! Tool table (C2): indexed tool records backed by the parameter store.
//!
//! Grounded on `gcode-tools.c`: the persisted quantity for a tool's lateral
//! size is its diameter, not its radius — `radius_of` halves it on the way
//! out, and a single "current tool" cache short-circuits repeated fetches
//! of the same index exactly like the reference's static `currentTool`.

use crate::params::{ParameterStore, TOOL_DIAM_BASE, TOOL_LEN_BASE, TOOL_TYPE_BASE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tool {
    pub index: u32,
    pub kind: f64,
    pub diameter: f64,
    pub length: f64,
}

#[derive(Debug, Default)]
pub struct ToolTable {
    cache: Option<Tool>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch(&mut self, params: &ParameterStore, index: u32) -> Tool {
        if let Some(cached) = self.cache {
            if cached.index == index {
                return cached;
            }
        }
        let tool = Tool {
            index,
            kind: params.fetch(TOOL_TYPE_BASE + index),
            diameter: params.fetch(TOOL_DIAM_BASE + index),
            length: params.fetch(TOOL_LEN_BASE + index),
        };
        self.cache = Some(tool);
        tool
    }

    pub fn update(&mut self, params: &mut ParameterStore, tool: Tool) -> Result<(), crate::error::CoreError> {
        params.set(TOOL_TYPE_BASE + tool.index, tool.kind)?;
        params.set(TOOL_DIAM_BASE + tool.index, tool.diameter)?;
        params.set(TOOL_LEN_BASE + tool.index, tool.length)?;
        self.cache = Some(tool);
        Ok(())
    }

    pub fn radius_of(&mut self, params: &ParameterStore, index: u32) -> f64 {
        if index == 0 {
            return 0.0;
        }
        self.fetch(params, index).diameter / 2.0
    }

    pub fn length_of(&mut self, params: &ParameterStore, index: u32) -> f64 {
        if index == 0 {
            return 0.0;
        }
        self.fetch(params, index).length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_zero_has_no_radius_or_length() {
        let params = ParameterStore::new();
        let mut table = ToolTable::new();
        assert_eq!(table.radius_of(&params, 0), 0.0);
        assert_eq!(table.length_of(&params, 0), 0.0);
    }

    #[test]
    fn radius_is_half_the_stored_diameter() {
        let mut params = ParameterStore::new();
        let mut table = ToolTable::new();
        table
            .update(
                &mut params,
                Tool {
                    index: 1,
                    kind: 1.0,
                    diameter: 10.0,
                    length: 50.0,
                },
            )
            .unwrap();
        assert_eq!(table.radius_of(&params, 1), 5.0);
        assert_eq!(table.length_of(&params, 1), 50.0);
    }

    #[test]
    fn cache_short_circuits_repeat_fetch_of_same_index() {
        let mut params = ParameterStore::new();
        let mut table = ToolTable::new();
        table
            .update(
                &mut params,
                Tool {
                    index: 2,
                    kind: 0.0,
                    diameter: 6.0,
                    length: 20.0,
                },
            )
            .unwrap();
        let first = table.fetch(&params, 2);
        // Mutate underlying parameters directly; cached fetch must not see it.
        params.set(TOOL_DIAM_BASE + 2, 99.0).unwrap();
        let second = table.fetch(&params, 2);
        assert_eq!(first, second);
        assert_eq!(second.diameter, 6.0);
    }

    #[test]
    fn fetch_after_different_index_refreshes_cache() {
        let mut params = ParameterStore::new();
        let mut table = ToolTable::new();
        table
            .update(
                &mut params,
                Tool {
                    index: 1,
                    kind: 0.0,
                    diameter: 4.0,
                    length: 1.0,
                },
            )
            .unwrap();
        table.fetch(&params, 1);
        params.set(TOOL_DIAM_BASE + 3, 8.0).unwrap();
        let tool3 = table.fetch(&params, 3);
        assert_eq!(tool3.diameter, 8.0);
    }
}
