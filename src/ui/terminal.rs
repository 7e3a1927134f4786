use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, terminal};
use ratatui::backend::CrosstermBackend;
use ratatui::text::{Line, Text};
use ratatui::widgets::{Paragraph, Widget, Wrap};
use ratatui::{Terminal, TerminalOptions, Viewport};

use super::style;
use crate::container::LOG_LINE_CAPACITY;
use crate::task::{Status, Summary, Surface};

/// Headline, log caption and the log tail.
const MAX_VIEWPORT_HEIGHT: u16 = LOG_LINE_CAPACITY as u16 + 2;

type Inline = Terminal<CrosstermBackend<Stdout>>;

/// Live status drawn in an inline region below the scrollback. The region is
/// as tall as the status being shown.
pub struct TerminalSurface {
    terminal: Option<Inline>,
    height: u16,
}

impl TerminalSurface {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self {
            terminal: None,
            height: 0,
        })
    }

    /// The inline region, rebuilt at `height` rows when its size differs.
    fn terminal(&mut self, height: u16) -> Result<&mut Inline> {
        let terminal = match self.terminal.take() {
            Some(terminal) if self.height == height => terminal,
            stale => {
                // Clearing leaves the cursor at the top of the old region,
                // where the new one starts.
                if let Some(mut old) = stale {
                    old.clear()?;
                }
                self.height = height;
                Terminal::with_options(
                    CrosstermBackend::new(io::stdout()),
                    TerminalOptions {
                        viewport: Viewport::Inline(height),
                    },
                )?
            }
        };
        Ok(self.terminal.insert(terminal))
    }

    fn print_above(&mut self, line: Line<'static>) -> Result<()> {
        let rows = self.height.max(1);
        let terminal = self.terminal(rows)?;
        let width = terminal.size()?.width.max(1) as usize;
        let height = line.width().div_ceil(width).max(1) as u16;
        let text = Text::from(line);
        terminal.insert_before(height, |buf| {
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .render(buf.area, buf);
        })?;
        Ok(())
    }
}

impl Surface for TerminalSurface {
    fn render(&mut self, frame: usize, status: &Status) -> Result<()> {
        let lines = style::status_lines(frame, status);
        self.terminal(viewport_height(status))?.draw(|f| {
            f.render_widget(Paragraph::new(lines), f.area());
        })?;
        Ok(())
    }

    fn poll_cancel(&mut self, timeout: Duration) -> Result<bool> {
        if !event::poll(timeout)? {
            return Ok(false);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(is_cancel(key)),
            _ => Ok(false),
        }
    }

    fn notice(&mut self, message: &str) -> Result<()> {
        self.print_above(style::notice_line(message))
    }

    fn finish(&mut self, summary: &Summary) -> Result<()> {
        self.terminal(1)?.clear()?;
        self.print_above(style::summary_line(summary))
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        if let Some(terminal) = self.terminal.as_mut() {
            let _ = terminal.clear();
        }
        let _ = restore_terminal();
    }
}

/// Leave raw mode and show the cursor. Safe to call more than once.
pub fn restore_terminal() -> Result<()> {
    terminal::disable_raw_mode()?;
    execute!(io::stdout(), cursor::Show)?;
    Ok(())
}

/// Rows needed for `status`: the headline plus one per detail line.
fn viewport_height(status: &Status) -> u16 {
    let rows = status.lines.len().saturating_add(1);
    u16::try_from(rows).map_or(MAX_VIEWPORT_HEIGHT, |rows| rows.min(MAX_VIEWPORT_HEIGHT))
}

fn is_cancel(key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}
