use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use super::layout::centered;
use super::theme;

pub fn draw_help(f: &mut Frame, area: Rect) {
    let popup_area = centered(area, 56, 17);

    // Clear background
    f.render_widget(Clear, popup_area);

    let bindings = [
        ("j/k or Up/Down", "Select process / scroll output"),
        ("h/l or Left/Right", "Switch panes"),
        ("Enter", "Open output pane"),
        ("g / G", "Jump to top / bottom"),
        ("f", "Toggle follow mode"),
        ("x", "Kill selected process group"),
        ("X", "Kill all process groups"),
        ("? / Ctrl-H", "Toggle this help"),
        ("q / Ctrl+C", "Stop everything and quit"),
        ("q (again)", "Quit without waiting"),
    ];

    let mut lines = vec![
        Line::from(Span::styled(" Keybindings", theme::HELP_TITLE)),
        Line::from(""),
    ];

    for (key, desc) in &bindings {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:20}", key), theme::HELP_KEY),
            Span::styled(*desc, theme::HELP_DESC),
        ]));
    }

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(theme::BORDER_ACTIVE);

    let paragraph = Paragraph::new(lines).block(block);
    f.render_widget(paragraph, popup_area);
}
