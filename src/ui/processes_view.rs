use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::Frame;

use super::theme;
use super::util::{strip_ansi, truncate};
use crate::app::{App, ProcessesPane};
use crate::model::process::ProcessState;

pub fn draw_processes(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);

    draw_process_list(f, chunks[0], app);
    draw_process_output(f, chunks[1], app);
}

fn status_icon(state: &ProcessState) -> Span<'static> {
    match state {
        ProcessState::Unlaunched { .. } => Span::styled(" . ", theme::PROCESS_UNLAUNCHED),
        ProcessState::Launched {
            kill_requested: true,
            ..
        } => Span::styled(" ~ ", theme::PROCESS_STOPPING),
        ProcessState::Launched { .. } => Span::styled(" * ", theme::PROCESS_RUNNING),
        ProcessState::Finished { code: Some(0), .. } => {
            Span::styled(" + ", theme::PROCESS_COMPLETED)
        }
        ProcessState::Finished { .. } => Span::styled(" ! ", theme::PROCESS_FAILED),
        ProcessState::Failed { .. } => Span::styled(" x ", theme::PROCESS_FAILED),
    }
}

fn status_label(state: &ProcessState) -> (&'static str, Style) {
    match state {
        ProcessState::Unlaunched { .. } => ("PENDING", theme::PROCESS_UNLAUNCHED),
        ProcessState::Launched {
            kill_requested: true,
            ..
        } => ("STOPPING", theme::PROCESS_STOPPING),
        ProcessState::Launched { .. } => ("RUNNING", theme::PROCESS_RUNNING),
        ProcessState::Finished { code: Some(0), .. } => ("DONE", theme::PROCESS_COMPLETED),
        ProcessState::Finished { .. } => ("EXITED", theme::PROCESS_FAILED),
        ProcessState::Failed { .. } => ("FAILED", theme::PROCESS_FAILED),
    }
}

fn draw_process_list(f: &mut Frame, area: Rect, app: &App) {
    let is_active = app.processes_pane == ProcessesPane::List;
    let border_style = if is_active {
        theme::BORDER_ACTIVE
    } else {
        theme::BORDER_INACTIVE
    };

    let title = format!(
        " Processes [{}/{}] ",
        app.snapshot.running_count(),
        app.snapshot.len()
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style);

    if app.snapshot.is_empty() {
        let p = Paragraph::new("No processes configured")
            .style(theme::EMPTY_STATE)
            .block(block);
        f.render_widget(p, area);
        return;
    }

    let name_width = (area.width as usize).saturating_sub(6);
    let items: Vec<ListItem> = app
        .snapshot
        .iter()
        .map(|entry| {
            let line = Line::from(vec![
                status_icon(&entry.state),
                Span::styled(
                    truncate(&entry.definition.title, name_width),
                    theme::LIST_NORMAL.add_modifier(Modifier::BOLD),
                ),
            ]);
            ListItem::new(line)
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.process_index.min(app.snapshot.len() - 1)));

    let list = List::new(items)
        .block(block)
        .highlight_style(theme::LIST_SELECTED);

    f.render_stateful_widget(list, area, &mut state);
}

fn draw_process_output(f: &mut Frame, area: Rect, app: &App) {
    let is_active = app.processes_pane == ProcessesPane::Output;
    let border_style = if is_active {
        theme::BORDER_ACTIVE
    } else {
        theme::BORDER_INACTIVE
    };

    let Some(proc) = app.selected_process() else {
        let block = Block::default()
            .title(" Output ")
            .borders(Borders::ALL)
            .border_style(border_style);
        let p = Paragraph::new("Select a process to view output")
            .style(theme::EMPTY_STATE)
            .block(block);
        f.render_widget(p, area);
        return;
    };

    let lines_buf = proc.state.lines();
    let (label, label_style) = status_label(&proc.state);
    let mut title = vec![
        Span::raw(format!(" {} ", proc.definition.title)),
        Span::styled(format!("[{}]", label), label_style),
        Span::raw(format!(
            " {} | {} lines ",
            proc.state.describe(),
            lines_buf.size()
        )),
    ];
    if app.process_follow {
        title.push(Span::styled(" FOLLOW ", theme::FOLLOW_ACTIVE));
        title.push(Span::raw(" "));
    }

    let block = Block::default()
        .title(Line::from(title))
        .borders(Borders::ALL)
        .border_style(border_style);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines: Vec<Line> = Vec::new();
    let mut height = inner.height as usize;

    if lines_buf.evicted() > 0 {
        lines.push(Line::from(Span::styled(
            format!("... {} earlier lines dropped", lines_buf.evicted()),
            theme::PROCESS_DROPPED,
        )));
        height = height.saturating_sub(1);
    }

    let total = lines_buf.size();
    let max_offset = total.saturating_sub(height);
    let offset = if app.process_follow {
        max_offset
    } else {
        app.process_output_scroll.min(max_offset)
    };

    for line in lines_buf.lines(offset..offset + height) {
        lines.push(Line::from(Span::styled(
            strip_ansi(line),
            theme::PROCESS_OUTPUT,
        )));
    }

    if total == 0 {
        let msg = match &*proc.state {
            ProcessState::Failed { error, .. } => format!("Failed to start: {}", error),
            _ => "Waiting for output...".to_string(),
        };
        lines.push(Line::from(Span::styled(msg, theme::EMPTY_STATE)));
    }

    f.render_widget(Paragraph::new(lines), inner);
}
