//! In-memory source text, used to print context lines around a stop.
//!
//! Grounded in the original's `Source::getLine`, which keeps the
//! compiler's input alongside debug info purely for the debugger's
//! listing commands — T86 never re-derives source from disassembly.

/// One source file's text, split into lines for fast lookup.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: String,
    lines: Vec<String>,
}

impl SourceFile {
    /// Creates a source file from its path and full text.
    #[must_use]
    pub fn new(path: impl Into<String>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// The file's path as recorded in debug info.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The 1-based `line`, if it exists.
    #[must_use]
    pub fn line(&self, line: u32) -> Option<&str> {
        line.checked_sub(1).and_then(|i| self.lines.get(i as usize)).map(String::as_str)
    }

    /// A contiguous window of `radius` lines before and after `line`,
    /// inclusive, clipped to the file's bounds — what a debugger's
    /// `list` command prints around the current stop.
    #[must_use]
    pub fn context(&self, line: u32, radius: u32) -> Vec<(u32, &str)> {
        let start = line.saturating_sub(radius).max(1);
        let end = line + radius;
        (start..=end).filter_map(|l| self.line(l).map(|text| (l, text))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_lookup_is_one_based() {
        let file = SourceFile::new("a.t86s", "first\nsecond\nthird");
        assert_eq!(file.line(1), Some("first"));
        assert_eq!(file.line(3), Some("third"));
        assert_eq!(file.line(4), None);
    }

    #[test]
    fn context_clips_to_file_bounds() {
        let file = SourceFile::new("a.t86s", "first\nsecond\nthird");
        let context = file.context(1, 2);
        assert_eq!(context.first().map(|(l, _)| *l), Some(1));
        assert_eq!(context.last().map(|(l, _)| *l), Some(3));
    }
}
