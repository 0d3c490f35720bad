//! Input collaborator (C8): a line source with splicing, seeking and a
//! program address book for `M98 P..`.
//!
//! Grounded on the reference's `gcode-input.c` contract (`fetch_line_input`,
//! `splice_input`, `end_of_spliced_input`, `tell_input`, `seek_input`,
//! `rewind_input`, `get_program_input`) and on design note §9's "stack of
//! sources" model: the bottom source owns the original program text loaded
//! once into memory, and each canned-cycle splice pushes a synthetic source
//! above it. `fetch_line` drains the top source until empty, then pops.

use std::collections::HashMap;

/// Contract the interpreter core drives; any concrete source (file, stdin,
/// an in-memory test fixture) just needs to implement this narrow trait.
pub trait InputSource {
    /// Fetch the next whitespace-stripped line into `buf`, truncating it to
    /// at most 255 bytes. Returns `false` when no source has more input.
    fn fetch_line(&mut self, buf: &mut String) -> bool;
    /// Push `text` as a new top-of-stack source; subsequent `fetch_line`
    /// calls drain it before falling back to the source beneath it.
    fn splice(&mut self, text: &str);
    /// True exactly once, the call after a spliced source was exhausted and
    /// control returned to the source beneath it.
    fn end_of_spliced(&mut self) -> bool;
    /// Current read offset, meaningful only within the active (innermost)
    /// source — used to save/restore `M98`/`M99` program pointers.
    fn tell(&self) -> u64;
    /// Seek the active source to a previously-`tell`-ed offset.
    fn seek(&mut self, offset: u64);
    /// Rewind the bottom (original program) source to its start.
    fn rewind(&mut self);
    /// Resolve a sub-program number to a seekable offset in the bottom
    /// source, for `M98 P..`.
    fn get_program(&self, program: u32) -> Option<u64>;
}

/// One line-oriented text source: the original file/stdin content, or a
/// spliced-in cycle program, kept fully in memory so `seek`/`tell` are plain
/// index operations.
struct Source {
    lines: Vec<String>,
    cursor: usize,
}

impl Source {
    fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(strip_block).collect(),
            cursor: 0,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line = self.lines.get(self.cursor).cloned();
        if line.is_some() {
            self.cursor += 1;
        }
        line
    }
}

/// Strip whitespace and an inline `;`/`(...)` comment, as the reference's
/// input collaborator is specified to deliver already-stripped lines.
fn strip_block(line: &str) -> String {
    let without_paren_comment: String = {
        let mut out = String::with_capacity(line.len());
        let mut depth = 0u32;
        for c in line.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    if depth > 0 {
                        depth -= 1;
                    }
                }
                _ if depth == 0 => out.push(c),
                _ => {}
            }
        }
        out
    };
    let without_line_comment = without_paren_comment
        .split(';')
        .next()
        .unwrap_or("")
        .to_string();
    without_line_comment
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Maximum block length the reference's `fetch_line_input` enforces.
pub const MAX_BLOCK_LEN: usize = 255;

/// Default, in-memory implementation of [`InputSource`]: a stack of
/// [`Source`]s, bottom = original program, above = spliced cycle programs.
/// Tracks program-number offsets (`%` labels or an explicit address book,
/// here a simple `N`-prefixed line index) for `get_program`.
pub struct StackInput {
    stack: Vec<Source>,
    just_popped_spliced: bool,
    programs: HashMap<u32, u64>,
}

impl StackInput {
    /// Build from the full program text. Lines of the form `%nnn` register
    /// `nnn` as a program number whose offset is the line *after* the
    /// label, for `M98 Pnnn`.
    pub fn new(text: &str) -> Self {
        let mut programs = HashMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if let Some(rest) = trimmed.strip_prefix('%') {
                if let Ok(n) = rest.trim().parse::<u32>() {
                    programs.insert(n, (idx + 1) as u64);
                }
            }
        }
        Self {
            stack: vec![Source::from_text(text)],
            just_popped_spliced: false,
            programs,
        }
    }
}

impl InputSource for StackInput {
    fn fetch_line(&mut self, buf: &mut String) -> bool {
        self.just_popped_spliced = false;
        loop {
            let Some(top) = self.stack.last_mut() else {
                return false;
            };
            if let Some(line) = top.next_line() {
                buf.clear();
                buf.push_str(&line[..line.len().min(MAX_BLOCK_LEN)]);
                return true;
            }
            if self.stack.len() == 1 {
                return false;
            }
            self.stack.pop();
            self.just_popped_spliced = true;
        }
    }

    fn splice(&mut self, text: &str) {
        self.stack.push(Source::from_text(text));
    }

    fn end_of_spliced(&mut self) -> bool {
        let was = self.just_popped_spliced;
        self.just_popped_spliced = false;
        was
    }

    fn tell(&self) -> u64 {
        self.stack.last().map(|s| s.cursor as u64).unwrap_or(0)
    }

    fn seek(&mut self, offset: u64) {
        if let Some(top) = self.stack.last_mut() {
            top.cursor = offset as usize;
        }
    }

    fn rewind(&mut self) {
        if let Some(bottom) = self.stack.first_mut() {
            bottom.cursor = 0;
        }
        self.stack.truncate(1);
    }

    fn get_program(&self, program: u32) -> Option<u64> {
        self.programs.get(&program).copied()
    }
}
