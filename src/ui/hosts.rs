use chrono::Local;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use crate::bridge::wire::Status;
use crate::session::{Host, SessionRegistry};

/// Which pane of the launcher screen has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostListPane {
    Hosts,
    Sessions,
}

pub fn draw_host_list(
    area: Rect,
    hosts: &[Host],
    registry: &SessionRegistry,
    pane: HostListPane,
    host_selected: usize,
    session_selected: usize,
    frame: &mut ratatui::Frame<'_>,
) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length(registry.len().clamp(1, 6) as u16 + 2),
            Constraint::Length(1),
        ])
        .split(area);

    draw_hosts_pane(layout[0], hosts, pane == HostListPane::Hosts, host_selected, frame);
    draw_sessions_pane(
        layout[1],
        registry,
        pane == HostListPane::Sessions,
        session_selected,
        frame,
    );

    let footer = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(layout[2]);
    let left = Paragraph::new(Line::from(Span::styled(
        "Enter: Open/Attach   Tab: Switch Pane   K/↑: Up   J/↓: Down   X: Close Session   Q: Quit",
        Style::default().fg(Color::White).add_modifier(Modifier::DIM),
    )))
    .alignment(Alignment::Left);
    let right = Paragraph::new(Line::from(Span::styled(
        format!("termlink v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::White).add_modifier(Modifier::DIM),
    )))
    .alignment(Alignment::Right);
    frame.render_widget(left, footer[0]);
    frame.render_widget(right, footer[1]);
}

fn draw_hosts_pane(
    area: Rect,
    hosts: &[Host],
    focused: bool,
    selected: usize,
    frame: &mut ratatui::Frame<'_>,
) {
    let items: Vec<ListItem> = hosts
        .iter()
        .map(|host| {
            let known = if host.fingerprint.is_some() {
                Span::styled("● ", Style::default().fg(Color::Green))
            } else {
                Span::styled("○ ", Style::default().fg(Color::Gray))
            };
            let header = Line::from(vec![
                known,
                Span::styled(
                    host.display_name().to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
            ]);
            let meta = Line::from(vec![
                Span::raw("  Address: "),
                Span::styled(host.host_port(), Style::default().fg(Color::Cyan)),
            ]);
            ListItem::new(vec![header, meta])
        })
        .collect();

    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Gray)
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!("Hosts ({})", hosts.len())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let sel = if hosts.is_empty() {
        None
    } else {
        Some(selected.min(hosts.len() - 1))
    };
    frame.render_stateful_widget(list, area, &mut ListState::default().with_selected(sel));
}

fn draw_sessions_pane(
    area: Rect,
    registry: &SessionRegistry,
    focused: bool,
    selected: usize,
    frame: &mut ratatui::Frame<'_>,
) {
    let items: Vec<ListItem> = registry
        .sessions()
        .iter()
        .map(|session| {
            let (dot, color) = status_indicator(&session.status);
            let opened = session
                .opened_at
                .with_timezone(&Local)
                .format("%H:%M")
                .to_string();
            let mut spans = vec![
                Span::styled(dot, Style::default().fg(color)),
                Span::styled(
                    session.host.display_name().to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::raw("  "),
                Span::styled(session.status.label(), Style::default().fg(color)),
                Span::raw("  "),
                Span::styled(format!("since {opened}"), Style::default().fg(Color::Gray)),
            ];
            if registry.active() == Some(session.id.as_str()) {
                spans.push(Span::styled(
                    "  (active)",
                    Style::default().fg(Color::White).add_modifier(Modifier::DIM),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Gray)
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!("Open Sessions ({})", registry.len())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let sel = if registry.is_empty() {
        None
    } else {
        Some(selected.min(registry.len() - 1))
    };
    frame.render_stateful_widget(list, area, &mut ListState::default().with_selected(sel));
}

fn status_indicator(status: &Status) -> (&'static str, Color) {
    if status.is_error() {
        ("✗ ", Color::Red)
    } else if status.is_streaming() {
        ("● ", Color::Green)
    } else {
        ("◌ ", Color::Yellow)
    }
}
