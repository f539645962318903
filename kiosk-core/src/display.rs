//! Character display output
//!
//! Text is truncated to the panel width here, before it reaches a driver,
//! so no driver ever sees a line longer than the configured column count.

use crate::device::DeviceError;

/// Character display
pub trait Display {
    /// Blank the whole panel
    fn clear(&mut self) -> Result<(), DeviceError>;

    /// Write `text` starting at column 0 of `row`
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DeviceError>;
}

/// First `columns` characters of `text`
pub fn truncate(text: &str, columns: usize) -> &str {
    match text.char_indices().nth(columns) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Text truncated, then right-padded with spaces to exactly `columns`
pub fn fit(text: &str, columns: usize) -> String {
    let shown = truncate(text, columns);
    let pad = columns - shown.chars().count();
    format!("{}{}", shown, " ".repeat(pad))
}

/// Panel geometry plus the write helpers the session loop uses
#[derive(Debug, Clone, Copy)]
pub struct Screen {
    pub columns: usize,
    pub rows: usize,
}

impl Screen {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self { columns, rows }
    }

    /// Clear, then write `lines` from the top; lines past the last row are dropped
    pub fn render<D: Display + ?Sized>(&self, display: &mut D, lines: &[&str]) -> Result<(), DeviceError> {
        display.clear()?;
        for (row, line) in lines.iter().enumerate().take(self.rows) {
            if !line.is_empty() {
                display.write_line(row, truncate(line, self.columns))?;
            }
        }
        Ok(())
    }

    /// Overwrite a single row in place, leaving the others untouched
    pub fn render_row<D: Display + ?Sized>(
        &self,
        display: &mut D,
        row: usize,
        text: &str,
    ) -> Result<(), DeviceError> {
        if row >= self.rows {
            return Ok(());
        }
        display.write_line(row, &fit(text, self.columns))
    }
}
