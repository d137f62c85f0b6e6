//! Terminal widget adapter.
//!
//! Wraps the `vt100` grid and keeps a dirty-row line cache so redraws of
//! a busy session stay cheap. One `TerminalScreen` is bound 1:1 to a
//! mounted session view: created on mount, dropped on unmount, and
//! recreated (never reused) on manual reconnect.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::time::Instant;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use vt100::{Color as VtColor, Parser};

pub struct TerminalScreen {
    parser: Parser,
    pub last_change: Instant,
    cached_lines: Vec<Line<'static>>,
    row_hashes: Vec<u64>,
    cached_height: u16,
    cached_width: u16,
    cache_invalidated: bool,
}

impl TerminalScreen {
    pub fn new(rows: u16, cols: u16, scrollback: usize) -> Self {
        Self {
            parser: Parser::new(rows, cols, scrollback.max(1)),
            last_change: Instant::now(),
            cached_lines: Vec::new(),
            row_hashes: Vec::new(),
            cached_height: 0,
            cached_width: 0,
            cache_invalidated: true,
        }
    }

    /// Feed output bytes in arrival order.
    pub fn process_bytes(&mut self, data: &[u8]) {
        self.parser.process(data);
        self.last_change = Instant::now();
        self.invalidate_cache();
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.parser.screen_mut().set_size(rows, cols);
        self.last_change = Instant::now();
        self.invalidate_cache();
    }

    /// (rows, cols)
    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }

    pub fn scroll_by(&mut self, delta_lines: i32) {
        let current = self.parser.screen().scrollback() as i32;
        let target = current.saturating_add(delta_lines).max(0) as usize;
        self.parser.screen_mut().set_scrollback(target);
        self.invalidate_cache();
    }

    pub fn scroll_to_bottom(&mut self) {
        self.parser.screen_mut().set_scrollback(0);
        self.invalidate_cache();
    }

    pub fn scrolled_back(&self) -> bool {
        self.parser.screen().scrollback() > 0
    }

    pub fn alternate_screen(&self) -> bool {
        self.parser.screen().alternate_screen()
    }

    pub fn application_cursor(&self) -> bool {
        self.parser.screen().application_cursor()
    }

    /// Cursor position, `None` while the application hides it.
    pub fn cursor(&self) -> Option<(u16, u16)> {
        let screen = self.parser.screen();
        if screen.hide_cursor() {
            None
        } else {
            Some(screen.cursor_position())
        }
    }

    /// Plain-text contents of the visible grid.
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }

    fn ensure_cache_dimensions(&mut self, height: u16, width: u16) {
        if self.cached_height != height || self.cached_width != width {
            self.cached_height = height;
            self.cached_width = width;
            self.cached_lines.resize(height as usize, Line::default());
            self.row_hashes.resize(height as usize, 0);
            self.invalidate_cache();
        }
    }

    fn invalidate_cache(&mut self) {
        self.cache_invalidated = true;
    }

    fn rebuild_cache(&mut self) {
        if !self.cache_invalidated {
            return;
        }
        let screen = self.parser.screen();
        for row in 0..self.cached_height {
            let row_idx = row as usize;
            let new_hash = compute_row_hash(screen, row, self.cached_width);
            if self.row_hashes[row_idx] != new_hash {
                self.cached_lines[row_idx] = build_line(screen, row, self.cached_width);
                self.row_hashes[row_idx] = new_hash;
            }
        }
        self.cache_invalidated = false;
    }

    /// Styled lines for the given viewport, rebuilt only for rows whose
    /// content hash changed since the previous call.
    pub fn cached_lines(&mut self, height: u16, width: u16) -> &[Line<'static>] {
        self.ensure_cache_dimensions(height, width);
        self.rebuild_cache();
        &self.cached_lines
    }
}

fn convert_color(color: VtColor) -> Color {
    match color {
        VtColor::Default => Color::Reset,
        VtColor::Idx(i) => Color::Indexed(i),
        VtColor::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default()
        .fg(convert_color(cell.fgcolor()))
        .bg(convert_color(cell.bgcolor()));
    for (on, modifier) in [
        (cell.bold(), Modifier::BOLD),
        (cell.italic(), Modifier::ITALIC),
        (cell.underline(), Modifier::UNDERLINED),
        (cell.dim(), Modifier::DIM),
        (cell.inverse(), Modifier::REVERSED),
    ] {
        if on {
            style = style.add_modifier(modifier);
        }
    }
    style
}

fn compute_row_hash(screen: &vt100::Screen, row: u16, width: u16) -> u64 {
    let mut hasher = DefaultHasher::new();
    for col in 0..width {
        let Some(cell) = screen.cell(row, col) else {
            hasher.write_u8(0xff);
            continue;
        };
        let attrs = cell.bold() as u8
            | (cell.italic() as u8) << 1
            | (cell.underline() as u8) << 2
            | (cell.dim() as u8) << 3
            | (cell.inverse() as u8) << 4;
        hasher.write_u8(attrs);
        hash_color(&mut hasher, cell.fgcolor());
        hash_color(&mut hasher, cell.bgcolor());
        let text = cell.contents();
        hasher.write_usize(text.len());
        hasher.write(text.as_bytes());
    }
    hasher.finish()
}

fn hash_color(hasher: &mut DefaultHasher, color: VtColor) {
    match color {
        VtColor::Default => hasher.write_u8(0),
        VtColor::Idx(i) => hasher.write(&[1, i]),
        VtColor::Rgb(r, g, b) => hasher.write(&[2, r, g, b]),
    }
}

/// Accumulates equal-styled cells into one span per run.
struct RunBuilder {
    spans: Vec<Span<'static>>,
    style: Style,
    text: String,
}

impl RunBuilder {
    fn new() -> Self {
        Self {
            spans: Vec::new(),
            style: Style::default(),
            text: String::new(),
        }
    }

    fn push(&mut self, style: Style, text: &str) {
        if style != self.style {
            if !self.text.is_empty() {
                self.spans
                    .push(Span::styled(std::mem::take(&mut self.text), self.style));
            }
            self.style = style;
        }
        self.text.push_str(text);
    }

    fn finish(mut self) -> Line<'static> {
        if !self.text.is_empty() {
            self.spans.push(Span::styled(self.text, self.style));
        }
        Line::from(self.spans)
    }
}

fn build_line(screen: &vt100::Screen, row: u16, width: u16) -> Line<'static> {
    let mut run = RunBuilder::new();
    for col in 0..width {
        match screen.cell(row, col) {
            // Wide characters occupy two cells; render them once.
            Some(cell) if cell.is_wide_continuation() => {}
            Some(cell) => {
                let text = cell.contents();
                run.push(cell_style(cell), if text.is_empty() { " " } else { text });
            }
            None => run.push(Style::default(), " "),
        }
    }
    run.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lands_in_the_grid_in_order() {
        let mut screen = TerminalScreen::new(4, 20, 100);
        screen.process_bytes(b"hello ");
        screen.process_bytes(b"world");
        assert!(screen.contents().starts_with("hello world"));
    }

    #[test]
    fn resize_updates_the_grid() {
        let mut screen = TerminalScreen::new(24, 80, 100);
        screen.resize(40, 120);
        assert_eq!(screen.size(), (40, 120));
    }

    #[test]
    fn cached_lines_match_the_viewport_height() {
        let mut screen = TerminalScreen::new(4, 10, 100);
        screen.process_bytes(b"a\r\nb\r\nc");
        let lines = screen.cached_lines(4, 10);
        assert_eq!(lines.len(), 4);
        // Repeated calls with unchanged content reuse the cache.
        let again = screen.cached_lines(4, 10);
        assert_eq!(again.len(), 4);
    }

    #[test]
    fn cursor_hides_when_the_application_asks() {
        let mut screen = TerminalScreen::new(4, 10, 100);
        assert!(screen.cursor().is_some());
        screen.process_bytes(b"\x1b[?25l");
        assert!(screen.cursor().is_none());
    }
}
