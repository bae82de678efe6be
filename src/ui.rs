use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::UnicodeWidthStr;

use crate::api::ThreadSummary;
use crate::auth::SharedTokens;
use crate::controller::Controller;
use crate::markdown;
use crate::state::{TagClickMode, TagLogic, TagState, ViewMode};
use crate::storage::Store;

const OPEN_MODE_PREF: &str = "open_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    App,
    Web,
}

impl OpenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::App => "app",
            OpenMode::Web => "web",
        }
    }

    pub fn from_pref(value: &str) -> Self {
        if value == "web" {
            OpenMode::Web
        } else {
            OpenMode::App
        }
    }

    fn toggled(self) -> Self {
        match self {
            OpenMode::App => OpenMode::Web,
            OpenMode::Web => OpenMode::App,
        }
    }
}

/// Link for a thread, honoring the app/web preference. The desktop app
/// registers the discord:// scheme; the web URL is the fallback.
pub fn thread_link(guild_id: &str, thread_id: &str, mode: OpenMode) -> Option<String> {
    if guild_id.is_empty() || thread_id.is_empty() {
        return None;
    }
    Some(match mode {
        OpenMode::App => format!("discord://-/channels/{guild_id}/{thread_id}"),
        OpenMode::Web => format!("https://discord.com/channels/{guild_id}/{thread_id}"),
    })
}

pub struct Options {
    pub controller: Controller,
    pub store: Store,
    pub tokens: SharedTokens,
    pub guild_id: String,
    pub status_message: String,
}

/// Which line the text input edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputField {
    Query,
    Dates,
}

pub struct Model {
    controller: Controller,
    store: Store,
    tokens: SharedTokens,
    guild_id: String,
    open_mode: OpenMode,

    selected: usize,
    input: Option<(InputField, String)>,
    show_preview: bool,
    status_message: String,
    needs_redraw: bool,
    renderer: markdown::Renderer,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let open_mode = options
            .store
            .get_preference(OPEN_MODE_PREF)
            .ok()
            .flatten()
            .map(|v| OpenMode::from_pref(&v))
            .unwrap_or(OpenMode::App);

        Model {
            controller: options.controller,
            store: options.store,
            tokens: options.tokens,
            guild_id: options.guild_id,
            open_mode,
            selected: 0,
            input: None,
            show_preview: false,
            status_message: options.status_message,
            needs_redraw: true,
            renderer: markdown::Renderer::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        self.controller.check_auth();
        self.controller.refresh();

        loop {
            self.controller.pump();
            if !self.controller.take_image_updates().is_empty() {
                self.needs_redraw = true;
            }

            if self.needs_redraw {
                self.clamp_selection();
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => self.needs_redraw = true,
                            Err(err) => {
                                self.status_message = format!("Error: {err}");
                                self.needs_redraw = true;
                            }
                        }
                    }
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                self.controller.tick(Instant::now());
                // loading spinner and banner rotation both need redraws
                self.needs_redraw = true;
            }
        }

        Ok(())
    }

    fn clamp_selection(&mut self) {
        let len = self.controller.visible_threads().len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    fn selected_thread(&self) -> Option<&ThreadSummary> {
        self.controller.visible_threads().get(self.selected)
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.input.is_some() {
            match code {
                KeyCode::Enter => {
                    let Some((field, buffer)) = self.input.take() else {
                        return Ok(false);
                    };
                    match field {
                        InputField::Query => {
                            self.controller.set_query(buffer);
                            self.selected = 0;
                        }
                        InputField::Dates => match parse_date_range(&buffer) {
                            Some((from, to)) => {
                                self.controller.set_date_bounds(from, to);
                                self.selected = 0;
                            }
                            None => {
                                self.status_message =
                                    "dates: YYYY-MM-DD..YYYY-MM-DD (either side optional)"
                                        .to_string();
                            }
                        },
                    }
                }
                KeyCode::Esc => {
                    self.input = None;
                }
                KeyCode::Backspace => {
                    if let Some((_, buffer)) = self.input.as_mut() {
                        buffer.pop();
                    }
                }
                KeyCode::Char(ch) => {
                    if let Some((_, buffer)) = self.input.as_mut() {
                        buffer.push(ch);
                    }
                }
                _ => {}
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('/') => {
                self.input = Some((
                    InputField::Query,
                    self.controller.state.active_query().to_string(),
                ));
            }
            KeyCode::Char('d') => {
                let state = &self.controller.state;
                let seed = if state.time_from.is_none() && state.time_to.is_none() {
                    String::new()
                } else {
                    format!(
                        "{}..{}",
                        format_date(state.time_from),
                        format_date(state.time_to)
                    )
                };
                self.input = Some((InputField::Dates, seed));
            }
            KeyCode::Esc => {
                if !self.controller.state.active_query().is_empty() {
                    self.controller.set_query(String::new());
                    self.selected = 0;
                }
            }
            KeyCode::Tab => {
                let next = match self.controller.state.mode {
                    ViewMode::Search => ViewMode::Follows,
                    ViewMode::Follows => ViewMode::Search,
                };
                self.controller.switch_mode(next);
                self.selected = 0;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                let len = self.controller.visible_threads().len();
                if len > 0 {
                    self.selected = (self.selected + 1).min(len - 1);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.controller.prev_page();
                self.selected = 0;
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.controller.next_page();
                self.selected = 0;
            }
            KeyCode::Char('o') => {
                self.controller.cycle_sort();
                self.selected = 0;
            }
            KeyCode::Char('g') => self.controller.toggle_tag_logic(),
            KeyCode::Char('x') => {
                self.controller.toggle_click_mode();
                let mode = match self.controller.state.tag_click_mode {
                    TagClickMode::Include => "include",
                    TagClickMode::Exclude => "exclude",
                };
                self.status_message = format!("tag clicks now {mode}");
            }
            KeyCode::Char(ch @ '1'..='9') => {
                let idx = (ch as usize) - ('1' as usize);
                if let Some(tag) = self.controller.available_tags().get(idx) {
                    let tag = tag.clone();
                    self.controller.toggle_tag(&tag);
                    self.selected = 0;
                }
            }
            KeyCode::Char('c') => {
                self.controller.cycle_channel();
                self.selected = 0;
            }
            KeyCode::Char('r') => self.controller.refresh(),
            KeyCode::Char('u') => {
                if self.controller.state.mode == ViewMode::Follows {
                    if let Some(thread) = self.selected_thread() {
                        let id = thread.thread_id.clone();
                        let title = thread.title.clone();
                        self.controller.unfollow(id);
                        self.status_message = format!("unfollowed: {title}");
                    }
                }
            }
            KeyCode::Char('m') => {
                self.open_mode = self.open_mode.toggled();
                self.store
                    .set_preference(OPEN_MODE_PREF, self.open_mode.as_str())
                    .context("save open mode")?;
                self.status_message = format!("threads open in {}", self.open_mode.as_str());
            }
            KeyCode::Char('v') => self.show_preview = !self.show_preview,
            KeyCode::Char('i') => {
                let url = self.controller.login_url();
                if url.is_empty() {
                    self.status_message = "login is handled by the configured server".to_string();
                } else {
                    webbrowser::open(&url).context("open login page")?;
                    self.status_message =
                        "complete the login in your browser, then run --login <redirect-url>"
                            .to_string();
                }
            }
            KeyCode::Char('L') => {
                self.tokens.clear().context("clear session")?;
                let url = self.controller.logout_url();
                self.controller.logged_out();
                self.selected = 0;
                if !url.is_empty() {
                    webbrowser::open(&url).context("open logout page")?;
                }
                self.status_message = "logged out".to_string();
            }
            KeyCode::Char('t') => {
                // manual stand-in for the render-time load failure a
                // browser would report itself
                if let Some(thread) = self.selected_thread() {
                    let id = thread.thread_id.clone();
                    let channel = thread.channel_id.clone();
                    self.controller
                        .image_failed(&id, channel.as_deref(), self.selected as u64);
                    self.status_message = "thumbnail refresh queued".to_string();
                }
            }
            KeyCode::Char('y') => {
                self.status_message = format!("view: ?{}", self.controller.share_url());
            }
            KeyCode::Char(']') => self.controller.banner.next(Instant::now()),
            KeyCode::Char('[') => self.controller.banner.prev(Instant::now()),
            KeyCode::Enter => self.open_selected()?,
            _ => {}
        }
        Ok(false)
    }

    fn open_selected(&mut self) -> Result<()> {
        let Some(thread) = self.selected_thread() else {
            return Ok(());
        };
        // unread follows jump straight to the newest activity
        let link = if thread.has_update {
            thread.latest_update_link.clone()
        } else {
            None
        }
        .or_else(|| thread_link(&self.guild_id, &thread.thread_id, self.open_mode));

        match link {
            Some(url) => {
                webbrowser::open(&url).context("open thread link")?;
                self.status_message = format!("opened {url}");
            }
            None => {
                self.status_message = "no guild configured; cannot build thread link".to_string();
            }
        }
        Ok(())
    }

    // ----- drawing -------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame) {
        let show_banner =
            self.controller.state.mode == ViewMode::Search && !self.controller.banner.is_empty();
        let mut constraints = vec![Constraint::Length(1)];
        if show_banner {
            constraints.push(Constraint::Length(1));
        }
        constraints.push(Constraint::Length(1)); // query
        constraints.push(Constraint::Length(1)); // tags
        constraints.push(Constraint::Min(3)); // list
        constraints.push(Constraint::Length(1)); // footer

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(frame.size());

        let mut idx = 0;
        self.draw_header(frame, rows[idx]);
        idx += 1;
        if show_banner {
            self.draw_banner(frame, rows[idx]);
            idx += 1;
        }
        self.draw_query(frame, rows[idx]);
        idx += 1;
        self.draw_tags(frame, rows[idx]);
        idx += 1;
        self.draw_main(frame, rows[idx]);
        idx += 1;
        self.draw_footer(frame, rows[idx]);
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let state = &self.controller.state;
        let tab = |label: &str, active: bool| {
            if active {
                Span::styled(
                    format!(" {label} "),
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                Span::styled(format!(" {label} "), Style::default().fg(Color::Gray))
            }
        };

        let follows_label = if self.controller.unread_count > 0 {
            format!("Follows ({})", self.controller.unread_count)
        } else {
            "Follows".to_string()
        };

        let mut spans = vec![
            tab("Search", state.mode == ViewMode::Search),
            tab(&follows_label, state.mode == ViewMode::Follows),
            Span::raw("  "),
            Span::styled(
                format!("sort:{}", state.sort.label()),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw(" "),
            Span::styled(
                match state.tag_logic {
                    TagLogic::And => "tags:all",
                    TagLogic::Or => "tags:any",
                },
                Style::default().fg(Color::Cyan),
            ),
        ];

        if let Some(channel_id) = &state.channel_id {
            let name = self
                .controller
                .channels()
                .iter()
                .find(|c| &c.id == channel_id)
                .map(|c| c.name.as_str())
                .unwrap_or(channel_id.as_str());
            spans.push(Span::raw(" "));
            spans.push(Span::styled(
                format!("#{name}"),
                Style::default().fg(Color::Magenta),
            ));
        }

        if let Some(user) = &self.controller.user {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                user.global_name.clone().unwrap_or_else(|| user.username.clone()),
                Style::default().fg(Color::Green),
            ));
        } else if self.controller.authed == Some(false) {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                "not logged in",
                Style::default().fg(Color::Red),
            ));
        }

        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_banner(&self, frame: &mut Frame, area: Rect) {
        let Some(banner) = self.controller.banner.current() else {
            return;
        };
        let position = format!(
            "[{}/{}] ",
            self.controller.banner.index() + 1,
            self.controller.banner.len()
        );
        let line = Line::from(vec![
            Span::styled(position, Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("★ {}", banner.title),
                Style::default().fg(Color::Yellow),
            ),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_query(&self, frame: &mut Frame, area: Rect) {
        let line = match &self.input {
            Some((field, buffer)) => {
                let prompt = match field {
                    InputField::Query => "query> ",
                    InputField::Dates => "dates> ",
                };
                Line::from(vec![
                    Span::styled(prompt, Style::default().fg(Color::Yellow)),
                    Span::raw(buffer.clone()),
                    Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
                ])
            }
            None => {
                let state = &self.controller.state;
                let query = state.active_query();
                let mut spans = if query.is_empty() {
                    vec![Span::styled(
                        "query> (press / to search)",
                        Style::default().fg(Color::DarkGray),
                    )]
                } else {
                    vec![
                        Span::styled("query> ", Style::default().fg(Color::DarkGray)),
                        Span::raw(query.to_string()),
                    ]
                };
                if state.time_from.is_some() || state.time_to.is_some() {
                    spans.push(Span::styled(
                        format!(
                            "  dates:{}..{}",
                            format_date(state.time_from),
                            format_date(state.time_to)
                        ),
                        Style::default().fg(Color::Cyan),
                    ));
                }
                Line::from(spans)
            }
        };
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_tags(&self, frame: &mut Frame, area: Rect) {
        let states = self.controller.state.active_tag_states();
        let mut spans: Vec<Span> = Vec::new();
        for (idx, tag) in self.controller.available_tags().iter().take(9).enumerate() {
            let style = match states.get(tag) {
                Some(TagState::Included) => Style::default().fg(Color::Black).bg(Color::Green),
                Some(TagState::Excluded) => Style::default().fg(Color::Black).bg(Color::Red),
                None => Style::default().fg(Color::Gray),
            };
            spans.push(Span::styled(format!("{}:{tag}", idx + 1), style));
            spans.push(Span::raw(" "));
        }
        if spans.is_empty() {
            spans.push(Span::styled(
                "no tags available",
                Style::default().fg(Color::DarkGray),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_main(&mut self, frame: &mut Frame, area: Rect) {
        if self.show_preview {
            let halves = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                .split(area);
            self.draw_list(frame, halves[0]);
            self.draw_preview(frame, halves[1]);
        } else {
            self.draw_list(frame, area);
        }
    }

    fn draw_list(&mut self, frame: &mut Frame, area: Rect) {
        let threads = self.controller.visible_threads();
        let width = area.width.saturating_sub(4) as usize;

        let items: Vec<ListItem> = threads.iter().map(|t| thread_item(t, width)).collect();
        let title = match self.controller.state.mode {
            ViewMode::Search => "Threads",
            ViewMode::Follows => "Followed threads",
        };
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            );

        let mut list_state = ListState::default();
        if !threads.is_empty() {
            list_state.select(Some(self.selected));
        }
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn draw_preview(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Preview");
        let Some(thread) = self.selected_thread() else {
            frame.render_widget(block, area);
            return;
        };

        let excerpt = markdown::plain_excerpt(
            &thread.first_message_excerpt,
            markdown::EXPANDED_EXCERPT_LIMIT,
        );
        let mut text = self.renderer.render(&excerpt);
        let meta = Line::from(vec![
            Span::styled(
                thread.author.display().to_string(),
                Style::default().fg(Color::Green),
            ),
            Span::raw(format!(
                "  {} replies, {} reactions",
                thread.reply_count, thread.reaction_count
            )),
        ]);
        text.lines.insert(0, Line::default());
        text.lines.insert(0, meta);

        frame.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), area);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let window = self.controller.page_window();
        let mut spans: Vec<Span> = Vec::new();

        spans.push(Span::styled(
            if window.prev_enabled { "‹ " } else { "  " },
            Style::default().fg(Color::Gray),
        ));
        for page in window.start..=window.end {
            if page == window.current {
                spans.push(Span::styled(
                    format!("[{page}]"),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ));
            } else {
                spans.push(Span::styled(
                    format!(" {page} "),
                    Style::default().fg(Color::Gray),
                ));
            }
        }
        spans.push(Span::styled(
            if window.next_enabled { " ›" } else { "  " },
            Style::default().fg(Color::Gray),
        ));

        spans.push(Span::raw(format!(
            "  {} threads",
            self.controller.total_for_mode()
        )));

        if self.controller.loading {
            spans.push(Span::styled(
                "  loading...",
                Style::default().fg(Color::Yellow),
            ));
        }

        let note = self
            .controller
            .last_error
            .clone()
            .unwrap_or_else(|| self.status_message.clone());
        if !note.is_empty() {
            let used: usize = spans.iter().map(|s| s.content.width()).sum();
            let available = (area.width as usize).saturating_sub(used + 2);
            let mut note = note;
            if note.width() > available {
                note = note.chars().take(available.saturating_sub(1)).collect();
                note.push('…');
            }
            let style = if self.controller.last_error.is_some() {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            spans.push(Span::raw("  "));
            spans.push(Span::styled(note, style));
        }

        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// `from..to` with either side blank for open-ended; an empty string
/// clears both bounds. Anything else is rejected.
fn parse_date_range(raw: &str) -> Option<(Option<NaiveDate>, Option<NaiveDate>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some((None, None));
    }
    let (from, to) = raw.split_once("..")?;
    let side = |s: &str| {
        let s = s.trim();
        if s.is_empty() {
            Some(None)
        } else {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Some)
        }
    };
    Some((side(from)?, side(to)?))
}

fn thread_item(thread: &ThreadSummary, width: usize) -> ListItem<'static> {
    let mut title_spans = Vec::new();
    if thread.has_update {
        title_spans.push(Span::styled(
            "● ",
            Style::default().fg(Color::LightGreen),
        ));
    }
    title_spans.push(Span::styled(
        thread.title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    ));

    let mut meta = format!(
        "{} · {} replies · {}",
        thread.author.display(),
        thread.reply_count,
        thread.created_at.format("%Y-%m-%d"),
    );
    if !thread.tags.is_empty() {
        meta.push_str("  [");
        meta.push_str(&thread.tags.join(", "));
        meta.push(']');
    }

    let full = markdown::plain_excerpt(&thread.first_message_excerpt, markdown::EXCERPT_LIMIT);
    // one excerpt line per card; wrap then keep the first fragment
    let excerpt = textwrap::wrap(&full, width.max(20))
        .first()
        .map(|line| line.to_string())
        .unwrap_or_default();

    let mut lines = vec![
        Line::from(title_spans),
        Line::from(Span::styled(meta, Style::default().fg(Color::DarkGray))),
    ];
    if !excerpt.is_empty() {
        lines.push(Line::from(Span::styled(
            excerpt,
            Style::default().fg(Color::Gray),
        )));
    }
    ListItem::new(lines)
}
