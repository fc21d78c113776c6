use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::ProgressObserver;
use crate::domain::ItemStatus;
use crate::error::LandsatError;

const LOGS_MAX: usize = 200;
const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Items,
    Logs,
}

#[derive(Debug, Clone)]
struct ItemRow {
    display_id: String,
    status: ItemStatus,
    done: u64,
    total: Option<u64>,
}

#[derive(Debug)]
struct ViewState {
    rows: Vec<ItemRow>,
    index: HashMap<String, usize>,
    logs: VecDeque<String>,
    status: String,
    view: View,
    started: Instant,
    active: bool,
}

impl ViewState {
    fn row_mut(&mut self, display_id: &str) -> Option<&mut ItemRow> {
        let position = *self.index.get(display_id)?;
        self.rows.get_mut(position)
    }
}

/// Full-screen progress view. The pipeline runs on a worker thread and
/// reports through a [`ProgressObserver`] that writes into shared state.
pub struct Tui {
    state: Arc<Mutex<ViewState>>,
    log_scroll: u16,
}

struct TuiObserver {
    state: Arc<Mutex<ViewState>>,
}

impl ProgressObserver for TuiObserver {
    fn on_item_listed(&self, display_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            let position = state.rows.len();
            state.index.insert(display_id.to_string(), position);
            state.rows.push(ItemRow {
                display_id: display_id.to_string(),
                status: ItemStatus::NeedsDownload,
                done: 0,
                total: None,
            });
        }
    }

    fn on_status_changed(&self, display_id: &str, status: ItemStatus) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(row) = state.row_mut(display_id) {
                row.status = status;
            }
            state.status = format!("{display_id}: {status}");
            push_log(&mut state.logs, format!("[{}] {display_id} -> {status}", timestamp()));
        }
    }

    fn on_bytes_progress(&self, display_id: &str, done: u64, total: Option<u64>) {
        if let Ok(mut state) = self.state.lock()
            && let Some(row) = state.row_mut(display_id)
        {
            row.done = done;
            row.total = total;
        }
    }

    fn on_diagnostic(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.status = message.to_string();
            push_log(&mut state.logs, format!("[{}] {message}", timestamp()));
        }
    }
}

impl Tui {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ViewState {
                rows: Vec::new(),
                index: HashMap::new(),
                logs: VecDeque::new(),
                status: "searching catalog".to_string(),
                view: View::Items,
                started: Instant::now(),
                active: false,
            })),
            log_scroll: 0,
        }
    }

    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressObserver) -> Result<R, LandsatError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let observer = TuiObserver {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&observer)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, &state, self.log_scroll, tick))
                    .into_diagnostic()?;
            }

            if let Some(outcome) = poll_worker(&rx) {
                self.set_active(false);
                restore_terminal()?;
                handle.join().ok();
                return outcome;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && self.handle_key(key)
            {
                break;
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        restore_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Returns true when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::F(4) | KeyCode::Char('l') => self.toggle_logs(),
            KeyCode::PageUp => self.scroll_logs(3),
            KeyCode::PageDown => self.scroll_logs(-3),
            _ => {}
        }
        false
    }

    fn toggle_logs(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.view = match state.view {
                View::Items => View::Logs,
                View::Logs => View::Items,
            };
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

impl Default for Tui {
    fn default() -> Self {
        Self::new()
    }
}

/// The worker's result once it is done, `None` while it is still running.
/// A worker that dies without sending counts as finished with an error.
fn poll_worker<R>(rx: &Receiver<Result<R, LandsatError>>) -> Option<miette::Result<R>> {
    match rx.try_recv() {
        Ok(result) => Some(result.map_err(miette::Report::new)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(miette::Report::msg(
            "pipeline worker stopped without a result",
        ))),
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, state: &ViewState, log_scroll: u16, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tick), chunks[0]);
    let body = match state.view {
        View::Items => draw_items(state),
        View::Logs => draw_logs(state, log_scroll),
    };
    frame.render_widget(body, chunks[1]);
    frame.render_widget(draw_footer(state), chunks[2]);
}

fn draw_header(state: &ViewState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let finished = state
        .rows
        .iter()
        .filter(|row| row.status.is_terminal())
        .count();
    let failed = state
        .rows
        .iter()
        .filter(|row| row.status == ItemStatus::Error)
        .count();
    let title = Line::from(vec![
        Span::styled(
            "LANDSAT-FETCH",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw(format!(
            "   Items: {finished}/{}   Errors: ",
            state.rows.len()
        )),
        Span::styled(
            failed.to_string(),
            Style::default().fg(if failed > 0 { Color::Red } else { Color::Green }),
        ),
        Span::raw(format!("   Elapsed: {}s   ", state.started.elapsed().as_secs())),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(vec![title])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_items(state: &ViewState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "SCENES",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    if state.rows.is_empty() {
        lines.push(Line::from(Span::styled(
            "waiting for the catalog...",
            Style::default().fg(Color::Gray),
        )));
    }
    for row in &state.rows {
        lines.push(Line::from(vec![
            Span::raw(format!("{:<42} ", row.display_id)),
            Span::styled(
                format!("{:<15}", row.status.label()),
                Style::default().fg(status_color(row.status)),
            ),
            Span::raw(progress_cell(row)),
        ]));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs(state: &ViewState, scroll: u16) -> Paragraph<'static> {
    let total = state.logs.len();
    let visible = 12usize;
    let start = total.saturating_sub(scroll as usize + visible);
    let mut lines = Vec::with_capacity(visible + 1);
    lines.push(Line::from(Span::styled(
        "LOGS (PgUp/PgDown to scroll)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_footer(state: &ViewState) -> Paragraph<'static> {
    Paragraph::new(vec![Line::from(vec![
        Span::styled(state.status.clone(), Style::default().fg(Color::Gray)),
        Span::styled(
            "   q quit · l logs",
            Style::default().fg(Color::DarkGray),
        ),
    ])])
    .block(Block::default().borders(Borders::TOP))
}

fn status_color(status: ItemStatus) -> Color {
    match status {
        ItemStatus::NeedsDownload => Color::Gray,
        ItemStatus::Downloading => Color::Cyan,
        ItemStatus::Downloaded => Color::Yellow,
        ItemStatus::Extracted | ItemStatus::InStorage => Color::Green,
        ItemStatus::Error => Color::Red,
    }
}

fn progress_cell(row: &ItemRow) -> String {
    match (row.status, row.total) {
        (ItemStatus::Downloading, Some(total)) if total > 0 => {
            let percent = ((row.done.min(total) * 100) / total) as u8;
            format!(
                "{} {:>3}% {}",
                progress_bar(percent),
                percent,
                bytes_to_human(total)
            )
        }
        (ItemStatus::Downloading, _) => format!("{} so far", bytes_to_human(row.done)),
        _ => String::new(),
    }
}

fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * BAR_WIDTH) / 100;
    let mut out = String::from("[");
    for i in 0..BAR_WIDTH {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn push_log(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > LOGS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let hours = (secs / 3600) % 24;
    let mins = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{hours:02}:{mins:02}:{seconds:02}")
}
