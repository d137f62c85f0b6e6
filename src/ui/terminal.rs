use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Stylize};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Widget};

use crate::term::TerminalScreen;

/// Render one session's grid with a titled top border. The cursor is
/// placed only while the session has input focus.
pub fn draw_terminal(
    area: Rect,
    screen: &mut TerminalScreen,
    title: &str,
    frame: &mut ratatui::Frame<'_>,
    show_cursor: bool,
) {
    let term_block = Block::default()
        .borders(Borders::TOP)
        .title(title.to_string())
        .fg(Color::Cyan);
    frame.render_widget(&term_block, area);

    let inner = term_block.inner(area);
    let cursor = screen.cursor();
    let lines = screen.cached_lines(inner.height, inner.width);

    frame.render_widget(GridWidget { lines }, inner);

    if show_cursor && let Some((row, col)) = cursor {
        frame.set_cursor_position((inner.x + col, inner.y + row));
    }
}

/// Lightweight widget over the screen's cached lines.
struct GridWidget<'a> {
    lines: &'a [Line<'static>],
}

impl<'a> Widget for GridWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let height = area.height.min(self.lines.len() as u16);
        for row in 0..height {
            buf.set_line(area.x, area.y + row, &self.lines[row as usize], area.width);
        }
    }
}
