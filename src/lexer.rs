//! Block lexer (C3): word lookup with `#` parameter indirection.
//!
//! Grounded on `gcode-state.c`'s `skip_gcode_digits`, `read_gcode_integer`,
//! `read_gcode_real` and `have_gcode_word`. A block is assumed already
//! whitespace-stripped (the input collaborator's job); every ASCII letter
//! byte in the remaining string is therefore the start of a word.

use crate::params::ParameterStore;
use std::cell::Cell;

/// A single block of G-code, ready for word lookup.
///
/// Keeps the small `{letter, byte offset}` scan cache the reference
/// interpreter keeps, so repeated lookups of the same letter inside one
/// block (as `have_gcode_word` does while hunting for a matching value)
/// don't rescan from the start of the line.
pub struct Block<'a> {
    text: &'a str,
    cache: Cell<Option<(u8, usize)>>,
}

impl<'a> Block<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            cache: Cell::new(None),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    /// Byte offset of the word's argument start (the char right after the
    /// letter), or `None` if `letter` does not occur starting the search
    /// from `from`.
    fn find_from(&self, letter: u8, from: usize) -> Option<usize> {
        let bytes = self.bytes();
        let mut i = from;
        while i < bytes.len() {
            if bytes[i].to_ascii_uppercase() == letter {
                return Some(i + 1);
            }
            i += 1;
        }
        None
    }

    /// First occurrence of `letter`'s argument, consulting (and refreshing)
    /// the scan cache.
    fn first_occurrence(&self, letter: u8) -> Option<usize> {
        if let Some((cached_letter, pos)) = self.cache.get() {
            if cached_letter == letter {
                return Some(pos);
            }
        }
        let found = self.find_from(letter, 0);
        if let Some(pos) = found {
            self.cache.set(Some((letter, pos)));
        }
        found
    }

    /// Recursively resolve a (possibly chained, `##nnn`) integer starting at
    /// `pos`, returning the resolved value and the position just past it.
    fn parse_indirect_integer(&self, pos: usize, params: &ParameterStore) -> (i64, usize) {
        let bytes = self.bytes();
        if pos < bytes.len() && bytes[pos] == b'#' {
            let (inner, next) = self.parse_indirect_integer(pos + 1, params);
            return (params.fetch(inner.max(0) as u32).round() as i64, next);
        }
        let start = pos;
        let mut i = pos;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let s = std::str::from_utf8(&bytes[start..i]).unwrap_or("");
        (s.parse::<i64>().unwrap_or(0), i)
    }

    /// Resolve a (possibly `#`-indirected, possibly fractional) real number
    /// starting at `pos`.
    fn parse_indirect_real(&self, pos: usize, params: &ParameterStore) -> Option<f64> {
        let bytes = self.bytes();
        if pos >= bytes.len() {
            return None;
        }
        if bytes[pos] == b'#' {
            let (param, _next) = self.parse_indirect_integer(pos + 1, params);
            return Some(params.fetch(param.max(0) as u32));
        }
        let start = pos;
        let mut i = pos;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let mut saw_digit = false;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            saw_digit = true;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
                saw_digit = true;
            }
        }
        if !saw_digit {
            return None;
        }
        std::str::from_utf8(&bytes[start..i]).ok()?.parse().ok()
    }

    /// Returns 0 if `letter` is absent. With no candidates, returns 1 if
    /// present. Otherwise returns the first candidate whose integer value
    /// matches an occurrence of `letter`, with a matched `0` reported as
    /// `100` to disambiguate from "not found".
    pub fn has_word(&self, params: &ParameterStore, letter: char, candidates: &[u32]) -> u32 {
        let letter = letter.to_ascii_uppercase() as u8;
        if candidates.is_empty() {
            return if self.find_from(letter, 0).is_some() {
                1
            } else {
                0
            };
        }
        let mut from = 0;
        while let Some(pos) = self.find_from(letter, from) {
            let (value, next) = self.parse_indirect_integer(pos, params);
            let value = value.max(0) as u32;
            if candidates.contains(&value) {
                return if value == 0 { 100 } else { value };
            }
            from = next.max(pos + 1);
        }
        0
    }

    pub fn get_real(&self, params: &ParameterStore, letter: char) -> Option<f64> {
        let pos = self.first_occurrence(letter.to_ascii_uppercase() as u8)?;
        self.parse_indirect_real(pos, params)
    }

    pub fn get_real_default(&self, params: &ParameterStore, letter: char, default: f64) -> f64 {
        self.get_real(params, letter).unwrap_or(default)
    }

    pub fn get_integer(&self, params: &ParameterStore, letter: char) -> Option<u32> {
        let pos = self.first_occurrence(letter.to_ascii_uppercase() as u8)?;
        let (value, _) = self.parse_indirect_integer(pos, params);
        Some(value.max(0) as u32)
    }

    pub fn get_integer_default(&self, params: &ParameterStore, letter: char, default: u32) -> u32 {
        self.get_integer(params, letter).unwrap_or(default)
    }

    /// True if the block contains both `=` and `#` — the parameter
    /// assignment form, e.g. `#100=3.5`.
    pub fn is_parameter_assignment(&self) -> bool {
        self.text.contains('=') && self.text.contains('#')
    }

    /// True if `letter` is followed by `major`, a literal `.`, and `minor` —
    /// disambiguates dotted G-codes (`G51.1` vs `G51`) that plain integer
    /// parsing (and so [`Self::has_word`]) cannot tell apart, since
    /// `parse_indirect_integer` stops at the first non-digit.
    pub fn dotted(&self, letter: char, major: u32, minor: u32) -> bool {
        let letter = letter.to_ascii_uppercase() as u8;
        let bytes = self.bytes();
        let mut from = 0;
        while let Some(pos) = self.find_from(letter, from) {
            let start = pos;
            let mut i = start;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(val) = std::str::from_utf8(&bytes[start..i]).unwrap_or("").parse::<u32>() {
                    if val == major && i < bytes.len() && bytes[i] == b'.' {
                        let dec_start = i + 1;
                        let mut j = dec_start;
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        if j > dec_start {
                            if let Ok(dec) =
                                std::str::from_utf8(&bytes[dec_start..j]).unwrap_or("").parse::<u32>()
                            {
                                if dec == minor {
                                    return true;
                                }
                            }
                        }
                    }
                }
            }
            from = i.max(pos + 1);
        }
        false
    }

    /// Parameter-assignment scan (§4.8): walks every `#` in the block in
    /// order, resolving (with indirection) the target parameter number and,
    /// when immediately followed by `=`, the (indirectable) value to stage.
    /// Returns whether at least one assignment was staged, so the caller
    /// knows whether to commit.
    pub fn scan_assignments(&self, params: &mut ParameterStore) -> Result<bool, crate::error::CoreError> {
        if !self.is_parameter_assignment() {
            return Ok(false);
        }
        let bytes = self.bytes();
        let mut updated = false;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'#' {
                let (param, next) = self.parse_indirect_integer(i + 1, params);
                let param = param.max(0) as u32;
                if next < bytes.len() && bytes[next] == b'=' {
                    if let Some(value) = self.parse_indirect_real(next + 1, params) {
                        params.update(param, value)?;
                        updated = true;
                    }
                    i = next + 1;
                } else {
                    i = next.max(i + 1);
                }
            } else {
                i += 1;
            }
        }
        Ok(updated)
    }
}
