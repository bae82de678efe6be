use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

/// Card excerpts are capped hard; the expanded preview gets more room.
pub const EXCERPT_LIMIT: usize = 500;
pub const EXPANDED_EXCERPT_LIMIT: usize = 800;

/// Flatten a markdown excerpt to one run of plain text: formatting
/// stripped, whitespace collapsed, truncated on a word boundary.
pub fn plain_excerpt(input: &str, limit: usize) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::new();
    for event in Parser::new_ext(input, opts) {
        match event {
            Event::Text(text) => out.push_str(&text),
            Event::Code(code) => out.push_str(&code),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::Start(Tag::Image { .. }) => {}
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => out.push(' '),
            _ => {}
        }
    }

    let collapsed: String = out.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_on_word(&collapsed, limit)
}

fn truncate_on_word(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let hard: String = text.chars().take(limit).collect();
    let cut = hard.rfind(' ').unwrap_or(hard.len());
    let mut truncated = hard[..cut].trim_end().to_string();
    truncated.push('…');
    truncated
}

/// Styled rendering for the expanded preview pane. Deliberately flat:
/// thread excerpts rarely carry more structure than paragraphs, bullets
/// and a quote or two.
#[derive(Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, input: &str) -> Text<'static> {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_STRIKETHROUGH);

        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut buffer = String::new();
        let mut style = Style::default();
        let mut quoted = false;
        let mut listing = false;

        let mut flush =
            |lines: &mut Vec<Line<'static>>, buffer: &mut String, style: Style, quoted: bool| {
                let text = buffer.trim().to_string();
                buffer.clear();
                if text.is_empty() {
                    return;
                }
                if quoted {
                    lines.push(Line::from(vec![
                        Span::styled("> ", Style::default().fg(Color::Green)),
                        Span::styled(text, Style::default().fg(Color::Green)),
                    ]));
                } else {
                    lines.push(Line::from(Span::styled(text, style)));
                }
            };

        for event in Parser::new_ext(input, opts) {
            match event {
                Event::Start(Tag::Heading { .. }) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    style = Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD);
                }
                Event::End(TagEnd::Heading(_)) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    style = Style::default();
                }
                Event::Start(Tag::BlockQuote) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    quoted = true;
                }
                Event::End(TagEnd::BlockQuote) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    quoted = false;
                }
                Event::Start(Tag::Item) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    listing = true;
                    buffer.push_str("• ");
                }
                Event::End(TagEnd::Item) => {
                    flush(&mut lines, &mut buffer, style, quoted);
                    listing = false;
                }
                Event::End(TagEnd::Paragraph) => {
                    if !listing {
                        flush(&mut lines, &mut buffer, style, quoted);
                    }
                }
                Event::Text(text) => buffer.push_str(&text),
                Event::Code(code) => {
                    buffer.push('`');
                    buffer.push_str(&code);
                    buffer.push('`');
                }
                Event::SoftBreak | Event::HardBreak => buffer.push(' '),
                Event::Start(Tag::Image { .. }) => buffer.push_str("[image]"),
                _ => {}
            }
        }
        flush(&mut lines, &mut buffer, style, quoted);

        if lines.is_empty() {
            lines.push(Line::from(Span::raw("")));
        }
        Text::from(lines)
    }
}
