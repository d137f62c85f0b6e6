use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph};

use crate::session::Session;

/// Blocking connection overlay: phase gauge while the host works through
/// the connection stages, trust prompt on an unknown host key, Retry and
/// Close once a terminal error arrives. Hidden entirely while streaming.
pub fn draw_session_overlay(area: Rect, session: &Session, frame: &mut ratatui::Frame<'_>) {
    let popup_w = area.width.saturating_sub(10).clamp(40, 70).min(area.width);
    let popup_h = 9u16.min(area.height.saturating_sub(2)).max(7);
    let x = area.x + (area.width.saturating_sub(popup_w)) / 2;
    let y = area.y + (area.height.saturating_sub(popup_h)) / 2;
    let popup = Rect {
        x,
        y,
        width: popup_w,
        height: popup_h,
    };

    frame.render_widget(Clear, popup);

    let is_error = session.status.is_error();
    let border_color = if is_error { Color::Red } else { Color::Cyan };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Line::from(Span::styled(
            format!("Connecting to {}", session.host.display_name()),
            Style::default()
                .fg(border_color)
                .add_modifier(Modifier::BOLD),
        )));
    frame.render_widget(&block, popup);

    let inner = popup.inner(Margin::new(2, 1));
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // phase label
            Constraint::Length(1), // gauge
            Constraint::Length(1),
            Constraint::Length(1), // detail
            Constraint::Min(0),
            Constraint::Length(1), // key hints
        ])
        .split(inner);

    let phase_style = if is_error {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(session.status.label(), phase_style))),
        layout[0],
    );

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(if is_error { Color::Red } else { Color::Cyan }))
        .percent(session.status.progress());
    frame.render_widget(gauge, layout[1]);

    let (detail, hints) = overlay_lines(session);
    frame.render_widget(Paragraph::new(detail), layout[3]);
    frame.render_widget(Paragraph::new(hints).alignment(Alignment::Center), layout[5]);
}

fn overlay_lines(session: &Session) -> (Line<'static>, Line<'static>) {
    if let Some(fingerprint) = &session.fingerprint
        && !session.status.is_error()
    {
        let detail = Line::from(vec![
            Span::raw("Host key: "),
            Span::styled(
                fingerprint.clone(),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        ]);
        let hints = Line::from(vec![
            Span::styled("Y", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::styled(" - Trust   ", Style::default().fg(Color::White)),
            Span::styled("N", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(" - Decline", Style::default().fg(Color::White)),
        ]);
        return (detail, hints);
    }

    if session.status.is_error() {
        let detail = Line::from(Span::styled(
            format!("{} did not reach streaming.", session.host.host_port()),
            Style::default().fg(Color::Red),
        ));
        let hints = Line::from(vec![
            Span::styled("R", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::styled(" - Retry   ", Style::default().fg(Color::White)),
            Span::styled("Esc", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(" - Close", Style::default().fg(Color::White)),
        ]);
        return (detail, hints);
    }

    (
        Line::from(Span::styled(
            session.host.host_port(),
            Style::default().fg(Color::Gray),
        )),
        Line::from(Span::styled(
            "Waiting for host…",
            Style::default().fg(Color::White).add_modifier(Modifier::DIM),
        )),
    )
}

// App-level error popup renderer
pub fn draw_error_popup(area: Rect, message: &str, frame: &mut ratatui::Frame<'_>) {
    let popup_w = area.width.saturating_sub(4);
    let inner_w = popup_w.saturating_sub(2).max(1);
    let estimated_lines: u16 = message
        .lines()
        .map(|l| {
            let len = l.chars().count() as u16;
            if len == 0 { 1 } else { len.div_ceil(inner_w) }
        })
        .sum();
    let content_h = estimated_lines.max(1) + 4; // title + message + hint
    let popup_h = content_h.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(popup_w)) / 2;
    let y = area.y + (area.height.saturating_sub(popup_h)) / 2;
    let popup = Rect {
        x,
        y,
        width: popup_w,
        height: popup_h,
    };

    frame.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(Span::styled(
            "Error",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    let body = Paragraph::new(vec![
        Line::from(Span::styled(
            message.to_string(),
            Style::default().fg(Color::Red),
        )),
        Line::from(Span::raw("")),
        Line::from(Span::styled(
            "Press Enter or Esc to dismiss",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::DIM),
        )),
    ])
    .wrap(ratatui::widgets::Wrap { trim: true })
    .block(block);
    frame.render_widget(body, popup);
}
