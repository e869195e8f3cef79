//! Address-to-source-line correlation.
//!
//! Grounded in the `.debug_line`-equivalent table the original's
//! `Source.cpp` builds while parsing debug info: a sorted list of
//! `(address, file, line)` rows, used both to print "stopped at line N"
//! messages and to decide whether a `CALL` at the current PC is itself a
//! single source line (so step-over can treat it atomically).

/// One row of the address-to-line table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    /// Instruction address this row describes.
    pub address: u64,
    /// Source file path, as recorded in debug info.
    pub file: String,
    /// 1-based source line number.
    pub line: u32,
}

/// A sorted table mapping instruction addresses to source locations.
#[derive(Debug, Clone, Default)]
pub struct LineMapping {
    rows: Vec<LineRow>,
}

impl LineMapping {
    /// Builds a mapping from `rows`, sorting by address.
    #[must_use]
    pub fn new(mut rows: Vec<LineRow>) -> Self {
        rows.sort_by_key(|r| r.address);
        Self { rows }
    }

    /// The source location for the instruction at or immediately before
    /// `address` (debug info is only emitted at line boundaries, so an
    /// address mid-expression maps to the line it started on).
    #[must_use]
    pub fn locate(&self, address: u64) -> Option<&LineRow> {
        self.rows.iter().rev().find(|r| r.address <= address)
    }

    /// The first address belonging to `line` in `file`, used to place a
    /// breakpoint from a `file:line` source reference.
    #[must_use]
    pub fn address_of(&self, file: &str, line: u32) -> Option<u64> {
        self.rows.iter().find(|r| r.file == file && r.line == line).map(|r| r.address)
    }

    /// Whether `address` is the first instruction mapped to its line,
    /// i.e. stepping would visibly change the reported line if execution
    /// stopped here (used to decide when a step operation should keep
    /// going rather than report a stop mid-line).
    #[must_use]
    pub fn is_line_start(&self, address: u64) -> bool {
        self.rows.iter().any(|r| r.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> LineMapping {
        LineMapping::new(vec![
            LineRow { address: 0, file: "a.t86s".to_string(), line: 1 },
            LineRow { address: 3, file: "a.t86s".to_string(), line: 2 },
            LineRow { address: 7, file: "a.t86s".to_string(), line: 3 },
        ])
    }

    #[test]
    fn locate_finds_the_enclosing_line() {
        let m = mapping();
        assert_eq!(m.locate(5).unwrap().line, 2);
        assert_eq!(m.locate(0).unwrap().line, 1);
    }

    #[test]
    fn address_of_resolves_file_and_line() {
        let m = mapping();
        assert_eq!(m.address_of("a.t86s", 3), Some(7));
        assert_eq!(m.address_of("a.t86s", 99), None);
    }

    #[test]
    fn line_start_detection() {
        let m = mapping();
        assert!(m.is_line_start(3));
        assert!(!m.is_line_start(4));
    }
}
