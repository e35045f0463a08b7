use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::*;

use parley_shared::config;

use crate::call::CallState;
use crate::notes::NotePlayback;

const COMMANDS: &[(&str, &str)] = &[
    ("/call", "call a peer, group, or global"),
    ("/hangup", "end the current call"),
    ("/creategroup", "create group: /creategroup <name> <a,b,c>"),
    ("/record", "start recording a voice note"),
    ("/stop", "finish recording, send: /stop <target>"),
    ("/send", "send the last recorded note: /send <target>"),
    ("/notes", "list received voice notes"),
    ("/play", "play a received note by number"),
    ("/devices", "list audio devices"),
    ("/input", "select input device by index"),
    ("/output", "select output device by index"),
    ("/name", "set your display name"),
    ("/server", "set server address"),
    ("/reconnect", "reconnect to the server"),
    ("/tab", "switch chat tab by number"),
    ("/help", "show help"),
    ("/quit", "exit"),
];

/// Control-channel state shown in the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn is_disconnected(self) -> bool {
        self == Self::Disconnected
    }
}

/// Which conversation a chat tab shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabKind {
    Global,
    Whisper(String),
    Group(String),
}

pub struct Tab {
    pub kind: TabKind,
    pub title: String,
    pub messages: Vec<String>,
}

impl Tab {
    fn new(kind: TabKind) -> Self {
        let title = match &kind {
            TabKind::Global => "global".to_string(),
            TabKind::Whisper(peer) => format!("@{}", peer),
            TabKind::Group(name) => format!("#{}", name),
        };
        Self {
            kind,
            title,
            messages: Vec::new(),
        }
    }
}

/// Everything the TUI renders and mutates.
pub struct App {
    /// What the user has typed so far.
    pub input: String,
    /// Previously submitted lines, newest last.
    history: Vec<String>,
    /// Where history navigation currently points (None while typing).
    history_pos: Option<usize>,
    /// The in-progress line stashed while browsing history.
    saved_input: String,
    /// Chat surfaces. Index 0 is always the global tab; whisper and group
    /// tabs are created lazily when traffic first touches them.
    pub tabs: Vec<Tab>,
    pub active_tab: usize,
    /// Directory snapshot from the last `ONLINE:` line.
    pub online: Vec<String>,
    /// Groups this client belongs to (name → member list).
    pub groups: HashMap<String, Vec<String>>,
    /// Display name, once accepted by the server.
    pub name: Option<String>,
    /// Address the server discloses for us.
    pub claimed_ip: Option<String>,
    /// User-supplied claimed-address override (flag or settings).
    pub claimed_override: Option<String>,
    pub server_addr: String,
    pub conn_state: ConnectionState,
    /// Singleton call state machine.
    pub call: CallState,
    /// True while a voice note is being recorded.
    pub recording: bool,
    /// Recorded note waiting for the `receivedIPs` reply.
    pub pending_note: Option<PathBuf>,
    /// A received note currently playing.
    pub playing: Option<NotePlayback>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub should_quit: bool,
    /// Indices into COMMANDS that match current input.
    pub autocomplete: Vec<usize>,
    pub autocomplete_sel: usize,
    /// Scroll offset from bottom (0 = latest messages visible).
    pub scroll_offset: usize,
    /// Dirty flag, true when UI needs redraw.
    pub dirty: bool,
}

/// What one trip through the event poll asks the main loop to do.
pub enum Action {
    /// A submitted line to interpret (command or chat text).
    Command(String),
    /// Shut the client down.
    Quit,
    /// Nothing beyond a possible redraw.
    None,
}

impl App {
    pub fn new(server_addr: String) -> Self {
        let mut global = Tab::new(TabKind::Global);
        global.messages = vec![
            "".into(),
            "  ┌─┐┌─┐┬─┐┬  ┌─┐┬ ┬".into(),
            "  ├─┘├─┤├┬┘│  ├┤ └┬┘".into(),
            "  ┴  ┴ ┴┴└─┴─┘└─┘ ┴ ".into(),
            "".into(),
            "  voice chat for your terminal".into(),
            "  type /help for commands".into(),
            "".into(),
        ];
        Self {
            input: String::new(),
            history: Vec::new(),
            history_pos: None,
            saved_input: String::new(),
            tabs: vec![global],
            active_tab: 0,
            online: Vec::new(),
            groups: HashMap::new(),
            name: None,
            claimed_ip: None,
            claimed_override: None,
            server_addr,
            conn_state: ConnectionState::Disconnected,
            call: CallState::Idle,
            recording: false,
            pending_note: None,
            playing: None,
            input_device: None,
            output_device: None,
            should_quit: false,
            autocomplete: Vec::new(),
            autocomplete_sel: 0,
            scroll_offset: 0,
            dirty: true, // draw on first frame
        }
    }

    fn update_autocomplete(&mut self) {
        self.autocomplete.clear();
        if self.input.starts_with('/') && !self.input.contains(' ') {
            for (i, (cmd, _)) in COMMANDS.iter().enumerate() {
                if cmd.starts_with(&self.input) {
                    self.autocomplete.push(i);
                }
            }
        }
        // Keep the selection in range as the candidate list shrinks.
        self.autocomplete_sel = self
            .autocomplete_sel
            .min(self.autocomplete.len().saturating_sub(1));
    }

    /// Take the input line as a submitted command, recording history.
    fn submit_input(&mut self) -> Option<String> {
        self.autocomplete.clear();
        self.autocomplete_sel = 0;
        let line = std::mem::take(&mut self.input).trim().to_string();
        if line.is_empty() {
            return None;
        }
        self.history.push(line.clone());
        self.history_pos = None;
        self.saved_input.clear();
        Some(line)
    }

    /// Step through command history; `back` is true for older entries.
    /// Walking past the newest entry restores whatever was being typed.
    fn navigate_history(&mut self, back: bool) {
        let target = match (self.history_pos, back) {
            (None, true) if !self.history.is_empty() => {
                self.saved_input = std::mem::take(&mut self.input);
                Some(self.history.len() - 1)
            }
            (Some(pos), true) => Some(pos.saturating_sub(1)),
            (Some(pos), false) if pos + 1 < self.history.len() => Some(pos + 1),
            (Some(_), false) => {
                self.history_pos = None;
                self.input = std::mem::take(&mut self.saved_input);
                None
            }
            _ => None,
        };
        if let Some(pos) = target {
            self.history_pos = Some(pos);
            self.input = self.history[pos].clone();
        }
    }

    /// Move the autocomplete selection and mirror it into the input.
    fn step_autocomplete(&mut self, delta: i64) {
        if self.autocomplete.is_empty() {
            return;
        }
        let last = (self.autocomplete.len() - 1) as i64;
        self.autocomplete_sel = (self.autocomplete_sel as i64 + delta).clamp(0, last) as usize;
        self.input = COMMANDS[self.autocomplete[self.autocomplete_sel]].0.to_string();
    }

    /// Replace the input with the selected command, ready for arguments.
    fn accept_autocomplete(&mut self) {
        if let Some(&idx) = self.autocomplete.get(self.autocomplete_sel) {
            self.input = format!("{} ", COMMANDS[idx].0);
        }
        self.autocomplete.clear();
        self.autocomplete_sel = 0;
    }

    /// Scroll the active tab; positive is towards older messages.
    fn scroll_by(&mut self, delta: i64) {
        let max = self.tabs[self.active_tab].messages.len().saturating_sub(1) as i64;
        let next = (self.scroll_offset as i64).saturating_add(delta);
        self.scroll_offset = next.clamp(0, max) as usize;
    }

    /// Index of the tab for `kind`, creating it on first use.
    pub fn ensure_tab(&mut self, kind: TabKind) -> usize {
        if let Some(i) = self.tabs.iter().position(|t| t.kind == kind) {
            return i;
        }
        self.tabs.push(Tab::new(kind));
        self.dirty = true;
        self.tabs.len() - 1
    }

    /// Append a message to the tab for `kind`, creating it if needed.
    pub fn add_to(&mut self, kind: TabKind, msg: String) {
        let i = self.ensure_tab(kind);
        let tab = &mut self.tabs[i];
        tab.messages.push(msg);
        if tab.messages.len() > config::MAX_MESSAGE_HISTORY {
            tab.messages.drain(..tab.messages.len() - config::MAX_MESSAGE_HISTORY);
        }
        if i == self.active_tab {
            self.scroll_offset = 0; // snap to bottom on new message
        }
        self.dirty = true;
    }

    /// Append to the global tab.
    pub fn add_global(&mut self, msg: String) {
        self.add_to(TabKind::Global, msg);
    }

    /// Append to whichever tab is active.
    pub fn add_active(&mut self, msg: String) {
        let kind = self.tabs[self.active_tab].kind.clone();
        self.add_to(kind, msg);
    }

    pub fn active_kind(&self) -> &TabKind {
        &self.tabs[self.active_tab].kind
    }

    pub fn select_tab(&mut self, index: usize) {
        if index < self.tabs.len() {
            self.active_tab = index;
            self.scroll_offset = 0;
            self.dirty = true;
        }
    }

    pub fn next_tab(&mut self) {
        self.select_tab((self.active_tab + 1) % self.tabs.len());
    }
}

/// Put the terminal into raw alternate-screen mode for the TUI.
pub fn init_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

/// Hand the terminal back to the shell.
pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = io::stdout().execute(LeaveAlternateScreen);
}

/// Wait up to `timeout` for a key press and translate it into an action.
pub fn poll_event(app: &mut App, timeout: Duration) -> Action {
    if !event::poll(timeout).unwrap_or(false) {
        return Action::None;
    }
    let Ok(Event::Key(key)) = event::read() else {
        return Action::None;
    };
    if key.kind != KeyEventKind::Press {
        return Action::None;
    }

    // Ctrl+C quits unconditionally
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Action::Quit;
    }

    // Every key press warrants a redraw
    app.dirty = true;

    let completing = !app.autocomplete.is_empty();
    match key.code {
        KeyCode::Enter => {
            if let Some(line) = app.submit_input() {
                return Action::Command(line);
            }
        }
        KeyCode::Up if completing => app.step_autocomplete(-1),
        KeyCode::Down if completing => app.step_autocomplete(1),
        KeyCode::Up => app.navigate_history(true),
        KeyCode::Down => app.navigate_history(false),
        KeyCode::Char(c) => {
            app.input.push(c);
            app.history_pos = None;
            app.update_autocomplete();
        }
        KeyCode::Backspace => {
            app.input.pop();
            app.update_autocomplete();
        }
        KeyCode::Tab if completing => app.accept_autocomplete(),
        KeyCode::Tab => app.next_tab(),
        KeyCode::PageUp => app.scroll_by(10),
        KeyCode::PageDown => app.scroll_by(-10),
        KeyCode::Home => app.scroll_by(i64::MAX),
        KeyCode::End => app.scroll_by(i64::MIN),
        KeyCode::Esc if completing => {
            app.autocomplete.clear();
            app.autocomplete_sel = 0;
        }
        KeyCode::Esc => return Action::Quit,
        _ => {}
    }
    Action::None
}

/// Draw the UI.
pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // status bar
            Constraint::Length(1), // tab strip
            Constraint::Min(5),    // messages + sidebar
            Constraint::Length(3), // input
        ])
        .split(frame.area());

    draw_status(frame, app, chunks[0]);
    draw_tabs(frame, app, chunks[1]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(22)])
        .split(chunks[2]);
    draw_messages(frame, app, body[0]);
    draw_sidebar(frame, app, body[1]);

    draw_input(frame, app, chunks[3]);

    // Autocomplete popup floats just above the input box.
    if !app.autocomplete.is_empty() {
        let height = (app.autocomplete.len() as u16).min(7);
        let width = 48.min(frame.area().width.saturating_sub(2));
        let popup = Rect::new(
            chunks[3].x + 1,
            chunks[3].y.saturating_sub(height),
            width,
            height,
        );

        let mut rows = Vec::with_capacity(app.autocomplete.len());
        for (row, &cmd_idx) in app.autocomplete.iter().enumerate() {
            let (cmd, desc) = COMMANDS[cmd_idx];
            let mut style = Style::default();
            if row == app.autocomplete_sel {
                style = style.fg(Color::Black).bg(Color::White);
            }
            rows.push(ListItem::new(Span::styled(
                format!("{:<14} {}", cmd, desc),
                style,
            )));
        }

        frame.render_widget(Clear, popup);
        frame.render_widget(List::new(rows), popup);
    }
}

fn draw_status(frame: &mut Frame, app: &App, area: Rect) {
    let status_parts = vec![
        Span::styled(
            " parley ",
            Style::default().fg(Color::Black).bg(Color::Cyan).bold(),
        ),
        Span::raw("  "),
        match &app.conn_state {
            ConnectionState::Disconnected => Span::styled(
                " DISCONNECTED ",
                Style::default().fg(Color::White).bg(Color::Red).bold(),
            ),
            ConnectionState::Connected => match &app.name {
                Some(name) => Span::styled(
                    format!(" {} ", name),
                    Style::default().fg(Color::Black).bg(Color::Green),
                ),
                None => Span::styled(
                    " online ",
                    Style::default().fg(Color::Black).bg(Color::DarkGray),
                ),
            },
        },
        Span::raw("  "),
        match &app.call {
            CallState::Idle => Span::raw(""),
            CallState::Pending { target } => Span::styled(
                format!(" calling {}... ", target),
                Style::default().fg(Color::Black).bg(Color::Yellow),
            ),
            CallState::InCall(session) => Span::styled(
                format!(" {} ", session.kind.describe()),
                Style::default().fg(Color::Black).bg(Color::Green),
            ),
        },
        Span::raw("  "),
        if app.recording {
            Span::styled(" REC ", Style::default().fg(Color::White).bg(Color::Red))
        } else {
            Span::raw("")
        },
        Span::raw("  "),
        if app.playing.is_some() {
            Span::styled(" playing note ", Style::default().fg(Color::Black).bg(Color::Magenta))
        } else {
            Span::raw("")
        },
        Span::raw("  "),
        if !app.online.is_empty() {
            Span::styled(
                format!(" {} online ", app.online.len()),
                Style::default().fg(Color::White),
            )
        } else {
            Span::raw("")
        },
    ];

    let status =
        Paragraph::new(Line::from(status_parts)).block(Block::default().borders(Borders::BOTTOM));

    frame.render_widget(status, area);
}

fn draw_tabs(frame: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<Line> = app
        .tabs
        .iter()
        .enumerate()
        .map(|(i, t)| Line::from(format!("{}:{}", i + 1, t.title)))
        .collect();
    let tabs = Tabs::new(titles)
        .select(app.active_tab)
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    frame.render_widget(tabs, area);
}

fn draw_messages(frame: &mut Frame, app: &App, area: Rect) {
    let messages = &app.tabs[app.active_tab].messages;
    // The scroll offset counts back from the newest message.
    let newest = messages.len().saturating_sub(app.scroll_offset);
    let oldest = newest.saturating_sub(area.height as usize);
    let window: Vec<ListItem> = messages[oldest..newest]
        .iter()
        .map(|m| ListItem::new(m.as_str()))
        .collect();

    let mut block = Block::default().borders(Borders::NONE);
    if app.scroll_offset > 0 {
        let hint = format!(" ↑ {} more ", app.scroll_offset);
        block = block.title(Span::styled(hint, Style::default().fg(Color::DarkGray)));
    }

    frame.render_widget(List::new(window).block(block), area);
}

fn draw_sidebar(frame: &mut Frame, app: &App, area: Rect) {
    let mut items: Vec<ListItem> = Vec::new();
    items.push(ListItem::new(Span::styled(
        "online",
        Style::default().fg(Color::DarkGray),
    )));
    for user in &app.online {
        let style = if app.name.as_deref() == Some(user.as_str()) {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        items.push(ListItem::new(Span::styled(format!("  {}", user), style)));
    }
    if !app.groups.is_empty() {
        items.push(ListItem::new(Span::styled(
            "groups",
            Style::default().fg(Color::DarkGray),
        )));
        let mut names: Vec<&String> = app.groups.keys().collect();
        names.sort();
        for group in names {
            items.push(ListItem::new(format!("  #{}", group)));
        }
    }

    let list = List::new(items).block(Block::default().borders(Borders::LEFT));
    frame.render_widget(list, area);
}

fn draw_input(frame: &mut Frame, app: &App, area: Rect) {
    let title = match app.active_kind() {
        TabKind::Global => " > ".to_string(),
        TabKind::Whisper(peer) => format!(" @{} > ", peer),
        TabKind::Group(name) => format!(" #{} > ", name),
    };
    frame.render_widget(
        Paragraph::new(app.input.as_str())
            .block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );

    // Cursor sits after the typed text, inside the border.
    let cursor_x = area.x + 1 + app.input.len() as u16;
    frame.set_cursor_position(Position::new(cursor_x, area.y + 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_are_created_lazily_and_reused() {
        let mut app = App::new("127.0.0.1".into());
        assert_eq!(app.tabs.len(), 1);

        let i = app.ensure_tab(TabKind::Whisper("bob".into()));
        assert_eq!(i, 1);
        assert_eq!(app.tabs[i].title, "@bob");

        // A second message to the same peer reuses the surface.
        app.add_to(TabKind::Whisper("bob".into()), "hi".into());
        app.add_to(TabKind::Whisper("bob".into()), "there".into());
        assert_eq!(app.tabs.len(), 2);
        assert_eq!(app.tabs[1].messages, vec!["hi", "there"]);
    }

    #[test]
    fn message_history_is_bounded() {
        let mut app = App::new("127.0.0.1".into());
        for i in 0..(config::MAX_MESSAGE_HISTORY + 50) {
            app.add_to(TabKind::Group("devs".into()), format!("m{}", i));
        }
        let tab = app.tabs.iter().find(|t| t.kind == TabKind::Group("devs".into())).unwrap();
        assert_eq!(tab.messages.len(), config::MAX_MESSAGE_HISTORY);
        assert_eq!(tab.messages.last().unwrap(), &format!("m{}", config::MAX_MESSAGE_HISTORY + 49));
    }

    #[test]
    fn tab_cycling_wraps() {
        let mut app = App::new("127.0.0.1".into());
        app.ensure_tab(TabKind::Group("devs".into()));
        assert_eq!(app.active_tab, 0);
        app.next_tab();
        assert_eq!(app.active_tab, 1);
        app.next_tab();
        assert_eq!(app.active_tab, 0);
    }
}
