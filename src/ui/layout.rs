use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use super::{help_overlay, processes_view, theme};
use crate::app::{App, ProcessesPane};

pub fn draw_layout(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Title bar
            Constraint::Min(3),    // Content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    draw_title_bar(f, chunks[0], app);
    processes_view::draw_processes(f, chunks[1], app);
    draw_status_bar(f, chunks[2], app);

    if app.exiting {
        draw_exiting(f, f.area(), app);
    }

    // Help overlay (on top of everything)
    if app.show_help {
        help_overlay::draw_help(f, f.area());
    }
}

/// Output rows visible in a terminal `height` rows tall: everything except
/// the title bar, the status bar and the output pane's borders.
pub fn output_rows(height: u16) -> usize {
    height.saturating_sub(4) as usize
}

/// Center a `width` x `height` box inside `area`.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));

    let vert = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((area.height.saturating_sub(height)) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);

    let horiz = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length((area.width.saturating_sub(width)) / 2),
            Constraint::Length(width),
            Constraint::Min(0),
        ])
        .split(vert[1]);

    horiz[1]
}

fn draw_title_bar(f: &mut Frame, area: Rect, app: &App) {
    let running = app.snapshot.running_count();
    let left = if running > 0 && app.snapshot.is_exiting() {
        format!(" procpane  stopping {} / {} ", running, app.snapshot.len())
    } else {
        format!(" procpane  {} running / {} ", running, app.snapshot.len())
    };
    let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
    let pad = (area.width as usize).saturating_sub(left.len() + version.len());

    let line = Line::from(vec![
        Span::styled(left, theme::TITLE_BAR),
        Span::styled(" ".repeat(pad), theme::TITLE_BAR),
        Span::styled(version, theme::TITLE_BAR),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_exiting(f: &mut Frame, area: Rect, app: &App) {
    let popup_area = centered(area, 44, 5);
    f.render_widget(Clear, popup_area);

    let remaining = app.snapshot.running_count();
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("  Exiting... waiting for {} process(es)", remaining),
            theme::HELP_DESC,
        )),
        Line::from(vec![
            Span::styled("  q", theme::HELP_KEY),
            Span::raw(" leave now"),
        ]),
    ];

    let block = Block::default()
        .title(Span::styled(" Stopping ", theme::EXITING))
        .borders(Borders::ALL)
        .border_style(theme::PROCESS_STOPPING);

    f.render_widget(Paragraph::new(lines).block(block), popup_area);
}

fn hint_text(app: &App) -> Vec<(&'static str, &'static str)> {
    let mut hints: Vec<(&str, &str)> = match app.processes_pane {
        ProcessesPane::List => vec![("j/k", "nav"), ("l", "output"), ("x", "kill"), ("X", "kill all")],
        ProcessesPane::Output => vec![("j/k", "scroll"), ("h", "list"), ("f", "follow"), ("g/G", "top/bottom")],
    };
    hints.push(("q", "quit"));
    hints.push(("?", "help"));
    hints
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut left_spans: Vec<Span> = Vec::new();

    if let Some(ref err) = app.last_error {
        left_spans.push(Span::styled(format!(" ERR: {} ", err), theme::STATUS_ERROR));
    }

    if app.process_follow {
        left_spans.push(Span::styled(" FOLLOW ", theme::FOLLOW_ACTIVE));
    }

    // Build right-aligned hint spans
    let hints = hint_text(app);
    let mut hint_spans: Vec<Span> = Vec::new();
    for (i, (key, desc)) in hints.iter().enumerate() {
        if i > 0 {
            hint_spans.push(Span::styled("  ", theme::STATUS_BAR));
        }
        hint_spans.push(Span::styled(*key, theme::HINT_KEY));
        hint_spans.push(Span::styled(":", theme::HINT_DESC));
        hint_spans.push(Span::styled(*desc, theme::HINT_DESC));
    }
    hint_spans.push(Span::styled(" ", theme::STATUS_BAR));

    let left_width: usize = left_spans.iter().map(|s| s.width()).sum();
    let hint_width: usize = hint_spans.iter().map(|s| s.width()).sum();
    let total = area.width as usize;
    let gap = total.saturating_sub(left_width + hint_width);

    let mut spans = left_spans;
    spans.push(Span::styled(" ".repeat(gap), theme::STATUS_BAR));
    spans.extend(hint_spans);

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
