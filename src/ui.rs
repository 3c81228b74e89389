use crate::agent::{Agent, SessionStats, TurnOutcome};
use crate::cancel::Canceller;
use crate::config::{Config, conversations_dir, resolve_directory};
use crate::conversation;
use crate::protocol::AgentEvent;
use crate::tools::truncate;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const BAR_WIDTH: usize = 10;

const HELP: &str = "\
/help             Show this help
/exit             Quit
/clear            Clear the conversation
/plan             Toggle plan mode (read-only exploration)
/status           Show context usage and session counters
/cd <dir>         Change the working directory
/save [name]      Save the conversation
/load [name|n]    List saved conversations, or load one
/compact          Compact the conversation now
/model [name]     Show or switch the model
/config           Show the active configuration
Esc interrupts a running turn. Esc when idle or Ctrl+C quits.";

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    User(String),
    Assistant(String),
    ToolUse { name: String, input: String },
    ToolResult { content: String, is_error: bool },
    Error(String),
    Info(String),
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn indented(header: LineSpec, body: &str, style: Style) -> Vec<LineSpec> {
    let mut lines = vec![header];
    for line in body.lines() {
        lines.push(LineSpec::new(format!("  {line}"), style));
    }
    lines
}

impl ChatMessage {
    fn line_specs(&self) -> Vec<LineSpec> {
        match self {
            ChatMessage::User(msg) => {
                let style = Style::default().fg(Color::Blue);
                indented(
                    LineSpec::new("You:", style.add_modifier(Modifier::BOLD)),
                    msg,
                    style,
                )
            }
            ChatMessage::Assistant(msg) => {
                let style = Style::default().fg(Color::Yellow);
                indented(
                    LineSpec::new("Assistant:", style.add_modifier(Modifier::BOLD)),
                    msg,
                    style,
                )
            }
            ChatMessage::ToolUse { name, input } => {
                let style = Style::default().fg(Color::Green);
                let header_style = style.add_modifier(Modifier::BOLD);
                let mut lines = indented(
                    LineSpec::new(format!("tool: {name}("), header_style),
                    &truncate(input, 200),
                    style,
                );
                lines.push(LineSpec::new(")", header_style));
                lines
            }
            ChatMessage::ToolResult { content, is_error } => {
                let style = if *is_error {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default().fg(Color::Cyan)
                };
                indented(
                    LineSpec::new("→ Result:", style.add_modifier(Modifier::BOLD)),
                    &truncate(content, 300),
                    style,
                )
            }
            ChatMessage::Error(msg) => msg
                .lines()
                .map(|line| LineSpec::new(line, Style::default().fg(Color::Red)))
                .collect(),
            ChatMessage::Info(msg) => msg
                .lines()
                .map(|line| {
                    LineSpec::new(
                        format!("ℹ {line}"),
                        Style::default()
                            .fg(Color::Gray)
                            .add_modifier(Modifier::ITALIC),
                    )
                })
                .collect(),
        }
    }

    fn to_text(&self) -> Text<'static> {
        let lines = self
            .line_specs()
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn rendered_height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        let total: usize = self
            .line_specs()
            .iter()
            .map(|spec| spec.text.chars().count().max(1).div_ceil(width))
            .sum();
        total.min(u16::MAX as usize) as u16
    }
}

/// What the spawned turn task reports once `chat` returns.
#[derive(Debug)]
struct TurnSummary {
    outcome: TurnOutcome,
    elapsed: Duration,
    stats: SessionStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlashCommand {
    Help,
    Exit,
    Clear,
    Plan,
    Status,
    Cd(Option<String>),
    Save(Option<String>),
    Load(Option<String>),
    Compact,
    Model(Option<String>),
    Config,
    Unknown(String),
}

impl SlashCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim().strip_prefix('/')?;
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let arg = Some(rest.trim().to_string()).filter(|a| !a.is_empty());
        Some(match name {
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            "clear" => Self::Clear,
            "plan" => Self::Plan,
            "status" => Self::Status,
            "cd" => Self::Cd(arg),
            "save" => Self::Save(arg),
            "load" => Self::Load(arg),
            "compact" => Self::Compact,
            "model" => Self::Model(arg),
            "config" => Self::Config,
            other => Self::Unknown(other.to_string()),
        })
    }
}

fn context_bar(pct: usize) -> String {
    let filled = (pct.min(100) * BAR_WIDTH).div_ceil(100).min(BAR_WIDTH);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

fn footer(summary: &TurnSummary, tokens: usize) -> String {
    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 { tokens as f64 / secs } else { 0.0 };
    format!(
        "{secs:.1}s · context {} {}% · {} msgs · {} tool calls · {rate:.1} tok/s",
        context_bar(summary.stats.pct),
        summary.stats.pct,
        summary.stats.message_count,
        summary.stats.total_tool_calls,
    )
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn byte_index(line: &str, char_index: usize) -> usize {
        line.char_indices()
            .nth(char_index)
            .map_or(line.len(), |(i, _)| i)
    }

    fn line_len(&self) -> usize {
        self.lines[self.cursor_y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let at = Self::byte_index(line, self.cursor_x);
        line.insert(at, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let at = Self::byte_index(line, self.cursor_x - 1);
            line.remove(at);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len();
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len();
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len() {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len());
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len());
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    input: InputBuffer,
    should_quit: bool,
    agent: Arc<Mutex<Agent>>,
    canceller: Canceller,
    config: Config,
    events_tx: mpsc::UnboundedSender<AgentEvent>,
    events_rx: mpsc::UnboundedReceiver<AgentEvent>,
    done_tx: mpsc::UnboundedSender<TurnSummary>,
    done_rx: mpsc::UnboundedReceiver<TurnSummary>,
    busy: bool,
    thinking: bool,
    plan_mode: bool,
    pending_text: String,
    turn_tokens: usize,
}

impl App {
    pub fn new(agent: Agent, config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        Self {
            input: InputBuffer::new(),
            should_quit: false,
            canceller: agent.canceller(),
            plan_mode: agent.tool_context().plan_mode(),
            agent: Arc::new(Mutex::new(agent)),
            config,
            events_tx,
            events_rx,
            done_tx,
            done_rx,
            busy: false,
            thinking: false,
            pending_text: String::new(),
            turn_tokens: 0,
        }
    }

    fn title(&self) -> String {
        let mode = if self.plan_mode { " [plan]" } else { "" };
        if !self.busy {
            format!(" Input (Enter to send, Esc to quit, /help){mode} ")
        } else if self.thinking {
            format!(" Thinking... (Esc to interrupt){mode} ")
        } else {
            format!(
                " Responding · {} tokens (Esc to interrupt){mode} ",
                self.turn_tokens
            )
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(self.title())
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (area.x + cursor_x).min(area.x + area.width.saturating_sub(2));
        let y = (area.y + 1 + cursor_y).min(area.y + area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn append_message(&mut self, terminal: &mut TuiTerminal, message: ChatMessage) -> UiResult<()> {
        let width = terminal.size()?.width;
        let height = message.rendered_height(width).saturating_add(1);
        let mut text = message.to_text();
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        Ok(())
    }

    fn info(&mut self, terminal: &mut TuiTerminal, message: impl Into<String>) -> UiResult<()> {
        self.append_message(terminal, ChatMessage::Info(message.into()))
    }

    fn flush_text(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let text = std::mem::take(&mut self.pending_text);
        if text.trim().is_empty() {
            return Ok(());
        }
        self.append_message(terminal, ChatMessage::Assistant(text.trim().to_string()))
    }

    fn apply_event(&mut self, terminal: &mut TuiTerminal, event: AgentEvent) -> UiResult<()> {
        match event {
            AgentEvent::Text { text } => self.pending_text.push_str(&text),
            AgentEvent::Tokens { count } => self.turn_tokens += count,
            AgentEvent::Thinking { active } => self.thinking = active,
            AgentEvent::ToolCall { name, input } => {
                self.flush_text(terminal)?;
                let input = serde_json::to_string_pretty(&input).unwrap_or_default();
                self.append_message(terminal, ChatMessage::ToolUse { name, input })?;
            }
            AgentEvent::ToolResult { content, .. } => {
                let is_error = content.starts_with("Error:") || content.starts_with("BLOCKED:");
                self.append_message(terminal, ChatMessage::ToolResult { content, is_error })?;
            }
            AgentEvent::Error { message } => {
                self.flush_text(terminal)?;
                self.append_message(terminal, ChatMessage::Error(format!("Error: {message}")))?;
            }
            AgentEvent::Compacted { before, after } => {
                self.info(terminal, format!("Context compacted: {before} -> {after} messages"))?;
            }
        }
        Ok(())
    }

    fn drain_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(terminal, event)?;
        }
        Ok(())
    }

    fn finish_turn(&mut self, terminal: &mut TuiTerminal, summary: TurnSummary) -> UiResult<()> {
        self.drain_events(terminal)?;
        self.flush_text(terminal)?;
        if summary.outcome == TurnOutcome::Cancelled {
            self.info(terminal, "Interrupted.")?;
        }
        let line = footer(&summary, self.turn_tokens);
        self.info(terminal, line)?;
        self.busy = false;
        self.thinking = false;
        Ok(())
    }

    fn start_turn(&mut self, terminal: &mut TuiTerminal, message: String) -> UiResult<()> {
        self.append_message(terminal, ChatMessage::User(message.clone()))?;
        self.busy = true;
        self.thinking = false;
        self.turn_tokens = 0;
        // Esc may land before the task takes the agent lock.
        self.canceller.arm();

        let agent = Arc::clone(&self.agent);
        let events = self.events_tx.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut agent = agent.lock().await;
            let outcome = agent.chat(&message, &events).await;
            let _ = done.send(TurnSummary {
                outcome,
                elapsed: started.elapsed(),
                stats: agent.stats(),
            });
        });
        Ok(())
    }

    fn run_command(&mut self, terminal: &mut TuiTerminal, command: SlashCommand) -> UiResult<()> {
        let agent = Arc::clone(&self.agent);
        let Ok(mut agent) = agent.try_lock() else {
            return self.info(terminal, "The agent is busy; wait for the turn to finish.");
        };

        match command {
            SlashCommand::Help => {
                drop(agent);
                self.info(terminal, HELP)
            }
            SlashCommand::Exit => {
                self.should_quit = true;
                Ok(())
            }
            SlashCommand::Clear => {
                agent.clear_history();
                drop(agent);
                self.info(terminal, "Conversation cleared.")
            }
            SlashCommand::Plan => {
                let enabled = !agent.tool_context().plan_mode();
                agent.set_plan_mode(enabled);
                drop(agent);
                self.plan_mode = enabled;
                let message = if enabled {
                    "Plan mode on: file edits and mutating commands are blocked."
                } else {
                    "Plan mode off."
                };
                self.info(terminal, message)
            }
            SlashCommand::Status => {
                let stats = agent.stats();
                let cwd = agent.tool_context().cwd().display().to_string();
                let model = agent.client().model().to_string();
                drop(agent);
                self.info(
                    terminal,
                    format!(
                        "Model: {model}\nDirectory: {cwd}\nMode: {}\nContext: {} {}/{} tokens ({}%)\nMessages: {} · Turns: {} · Tool calls: {}",
                        if self.plan_mode { "plan" } else { "normal" },
                        context_bar(stats.pct),
                        stats.used,
                        stats.max,
                        stats.pct,
                        stats.message_count,
                        stats.total_turns,
                        stats.total_tool_calls,
                    ),
                )
            }
            SlashCommand::Cd(None) => {
                let cwd = agent.tool_context().cwd().display().to_string();
                drop(agent);
                self.info(terminal, cwd)
            }
            SlashCommand::Cd(Some(dir)) => {
                let target = agent.tool_context().cwd().join(PathBuf::from(&dir));
                let message = match resolve_directory(&target) {
                    Ok(path) => {
                        let message = format!("Working directory: {}", path.display());
                        agent.set_cwd(path);
                        message
                    }
                    Err(err) => format!("Error: {err}"),
                };
                drop(agent);
                self.info(terminal, message)
            }
            SlashCommand::Save(name) => {
                let result = conversation::save(&conversations_dir(), agent.messages(), name.as_deref());
                drop(agent);
                let message = match result {
                    Ok(path) => format!("Saved to {}", path.display()),
                    Err(err) => format!("Error: {err}"),
                };
                self.info(terminal, message)
            }
            SlashCommand::Load(None) => {
                drop(agent);
                let message = match conversation::list(&conversations_dir()) {
                    Ok(list) if list.is_empty() => "No saved conversations.".to_string(),
                    Ok(list) => list
                        .iter()
                        .enumerate()
                        .map(|(i, c)| {
                            let when = c.saved_at.map_or_else(
                                || "unknown".to_string(),
                                |t| t.format("%Y-%m-%d %H:%M").to_string(),
                            );
                            format!("{:>3}. {} ({}, {} messages)", i + 1, c.filename, when, c.message_count)
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(err) => format!("Error: {err}"),
                };
                self.info(terminal, message)
            }
            SlashCommand::Load(Some(selector)) => {
                let message = match conversation::load(&conversations_dir(), &selector) {
                    Ok(messages) => {
                        let count = messages.len();
                        agent.set_messages(messages);
                        agent.refresh_system_prompt();
                        format!("Loaded {count} messages.")
                    }
                    Err(err) => format!("Error: {err}"),
                };
                drop(agent);
                self.info(terminal, message)
            }
            SlashCommand::Compact => {
                let (before, after) = agent.compact_now(&self.events_tx);
                drop(agent);
                if before == after {
                    self.info(terminal, "Nothing to compact.")
                } else {
                    self.drain_events(terminal)
                }
            }
            SlashCommand::Model(None) => {
                let model = agent.client().model().to_string();
                drop(agent);
                self.info(terminal, format!("Model: {model}"))
            }
            SlashCommand::Model(Some(model)) => {
                agent.set_model(model.clone());
                drop(agent);
                self.info(terminal, format!("Model switched to {model}"))
            }
            SlashCommand::Config => {
                let budget = agent.budget();
                let model = agent.client().model().to_string();
                let url = agent.client().base_url().to_string();
                drop(agent);
                self.info(
                    terminal,
                    format!(
                        "Server: {url}\nModel: {model}\nMax context tokens: {}\nCompact threshold: {}\nCommand timeout: {}s\nMax tool result size: {} chars\nConversations: {}",
                        budget.max_context_tokens,
                        budget.compact_threshold,
                        self.config.command_timeout.as_secs(),
                        self.config.max_tool_result_size,
                        conversations_dir().display(),
                    ),
                )
            }
            SlashCommand::Unknown(name) => {
                drop(agent);
                self.info(terminal, format!("Unknown command: /{name}. Type /help for commands."))
            }
        }
    }

    fn submit(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let msg = self.input.to_string();
        if msg.trim().is_empty() {
            return Ok(());
        }
        if self.busy {
            return self.info(terminal, "Still working. Press Esc to interrupt.");
        }
        self.input.clear();
        match SlashCommand::parse(&msg) {
            Some(command) => {
                info!(?command, "slash command");
                self.run_command(terminal, command)
            }
            None => self.start_turn(terminal, msg),
        }
    }

    fn quit(&mut self) {
        if self.busy {
            self.canceller.cancel();
        }
        self.should_quit = true;
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        self.drain_events(terminal)?;
        while let Ok(summary) = self.done_rx.try_recv() {
            self.finish_turn(terminal, summary)?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    self.quit();
                    return Ok(false);
                }

                match key.code {
                    KeyCode::Esc if self.busy => {
                        info!("interrupt requested");
                        self.canceller.cancel();
                    }
                    KeyCode::Esc => {
                        self.quit();
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else {
                            self.submit(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x = self.input.line_len();
                    }
                    _ => {}
                }
            }
        }

        Ok(!self.should_quit)
    }
}

pub fn run_tui(agent: Agent, config: Config) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(INPUT_HEIGHT),
        },
    )?;

    let banner = format!(
        "qwen-local · {} @ {}\n{}",
        config.model,
        config.base_url,
        config.cwd.display()
    );
    let mut app = App::new(agent, config);

    let _guard = TerminalGuard::new();

    app.info(&mut terminal, banner)?;
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}

fn print_event(event: &AgentEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        AgentEvent::Text { text } => {
            print!("{text}");
            let _ = io::stdout().flush();
        }
        AgentEvent::ToolCall { name, input } => eprintln!("\n→ {name} {input}"),
        AgentEvent::ToolResult { content, .. } => eprintln!("{}", truncate(content, 300)),
        AgentEvent::Error { message } => eprintln!("Error: {message}"),
        AgentEvent::Compacted { before, after } => {
            eprintln!("Context compacted: {before} -> {after} messages")
        }
        AgentEvent::Thinking { .. } | AgentEvent::Tokens { .. } => {}
    }
}

/// Runs a single turn without the interactive UI. Ctrl+C cancels the turn.
pub async fn run_once(mut agent: Agent, prompt: &str, json: bool) -> UiResult<TurnOutcome> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let canceller = agent.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let outcome = agent.chat(prompt, &tx).await;
    drop(tx);
    printer.await?;
    interrupt.abort();

    if !json {
        println!();
        if outcome == TurnOutcome::Cancelled {
            eprintln!("Interrupted.");
        }
    }
    Ok(outcome)
}
