use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::task::{Status, Summary, Tone};

// ── Colour constants ──────────────────────────────────────────────────
pub const COLOR_TEXT: Color = Color::Rgb(0xdd, 0xdd, 0xdd);
pub const COLOR_ERROR: Color = Color::Rgb(0xdd, 0x00, 0x00);
pub const COLOR_SPINNER: Color = Color::Indexed(69);

/// Indent of detail lines under the headline.
pub const PADDING: &str = "  ";

/// Braille "dot" spinner.
pub const SPINNER_FRAMES: [&str; 8] = ["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];

pub fn spinner(frame: usize) -> &'static str {
    SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
}

pub fn text_style() -> Style {
    Style::default().fg(COLOR_TEXT)
}

pub fn error_style() -> Style {
    Style::default()
        .fg(COLOR_ERROR)
        .add_modifier(Modifier::BOLD)
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Spinner plus headline, then each detail line indented under it.
pub fn status_lines(frame: usize, status: &Status) -> Vec<Line<'static>> {
    let mut lines = Vec::with_capacity(status.lines.len() + 1);
    lines.push(Line::from(vec![
        Span::styled(spinner(frame), Style::default().fg(COLOR_SPINNER)),
        Span::raw(" "),
        Span::styled(status.headline.clone(), text_style()),
    ]));
    for detail in &status.lines {
        let style = match detail.tone {
            Tone::Normal => text_style(),
            Tone::Stderr => error_style(),
        };
        lines.push(Line::from(vec![
            Span::raw(PADDING),
            Span::styled(detail.text.clone(), style),
        ]));
    }
    lines
}

pub fn summary_line(summary: &Summary) -> Line<'static> {
    let style = if summary.is_error() {
        error_style()
    } else {
        text_style()
    };
    Line::styled(summary.text(), style)
}

pub fn notice_line(message: &str) -> Line<'static> {
    Line::styled(format!("{PADDING}⚠️ {message}"), text_style())
}
