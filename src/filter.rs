use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::api::ThreadSummary;
use crate::state::{SortKey, SortOrder, SortSelection, TagLogic, ViewMode, ViewState};

/// A free-text query broken into its directive parts.
///
/// Supported syntax: `author:name` or `author:"two words"` restricts by
/// author; `"exact phrase"` keeps spaces together; `-word` rejects matches;
/// everything else is whitespace-split into substring tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub author: Option<String>,
    pub tokens: Vec<String>,
    pub phrases: Vec<String>,
    pub excluded: Vec<String>,
}

static AUTHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)author:\s*(?:"([^"]+)"|(\S+))"#).expect("author regex"));
static PHRASE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("phrase regex"));

pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let raw = raw.trim();
    if raw.is_empty() {
        return parsed;
    }

    let mut rest = String::from(raw);

    if let Some(caps) = AUTHOR_RE.captures(&rest) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string());
        parsed.author = name.filter(|n| !n.is_empty());
        let range = caps.get(0).expect("whole match").range();
        rest.replace_range(range, " ");
    }

    rest = PHRASE_RE
        .replace_all(&rest, |caps: &regex::Captures<'_>| {
            let phrase = caps[1].trim().to_lowercase();
            if !phrase.is_empty() {
                parsed.phrases.push(phrase);
            }
            " ".to_string()
        })
        .into_owned();

    for part in rest.split_whitespace() {
        if let Some(word) = part.strip_prefix('-') {
            if !word.is_empty() {
                parsed.excluded.push(word.to_lowercase());
            }
        } else {
            parsed.tokens.push(part.to_lowercase());
        }
    }

    parsed
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.tokens.is_empty()
            && self.phrases.is_empty()
            && self.excluded.is_empty()
    }

    /// Everything except the author directive, re-joined for the remote
    /// `keywords` field (the server runs its own parser over it).
    pub fn keywords(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        for phrase in &self.phrases {
            parts.push(format!("\"{phrase}\""));
        }
        parts.extend(self.tokens.iter().cloned());
        for word in &self.excluded {
            parts.push(format!("-{word}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Tag predicate: any excluded tag present disqualifies, regardless of the
/// include set or logic. A non-empty include set then requires all (AND)
/// or at least one (OR) of its tags.
pub fn tags_match(
    thread_tags: &[String],
    included: &[String],
    excluded: &[String],
    logic: TagLogic,
) -> bool {
    if excluded.iter().any(|tag| thread_tags.contains(tag)) {
        return false;
    }
    if included.is_empty() {
        return true;
    }
    match logic {
        TagLogic::And => included.iter().all(|tag| thread_tags.contains(tag)),
        TagLogic::Or => included.iter().any(|tag| thread_tags.contains(tag)),
    }
}

fn within_dates(
    created_at: chrono::DateTime<chrono::Utc>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> bool {
    let day = created_at.date_naive();
    if let Some(from) = from {
        if day < from {
            return false;
        }
    }
    if let Some(to) = to {
        if day > to {
            return false;
        }
    }
    true
}

fn text_match(thread: &ThreadSummary, query: &ParsedQuery) -> bool {
    if query.is_empty() {
        return true;
    }

    if let Some(author) = &query.author {
        let needle = author.to_lowercase();
        let username = thread.author.name.to_lowercase();
        let display = thread.author.display().to_lowercase();
        if !username.contains(&needle) && !display.contains(&needle) {
            return false;
        }
    }

    if query.tokens.is_empty() && query.phrases.is_empty() && query.excluded.is_empty() {
        return true;
    }

    let haystack = format!(
        "{} {} {}",
        thread.title,
        thread.first_message_excerpt,
        thread.tags.join(" ")
    )
    .to_lowercase();

    if query.excluded.iter().any(|word| haystack.contains(word)) {
        return false;
    }
    query
        .tokens
        .iter()
        .chain(query.phrases.iter())
        .all(|needle| haystack.contains(needle))
}

/// The client-side predicate used in follows mode. All stages are
/// conjunctive; search mode runs the equivalent filter remotely.
pub fn matches(thread: &ThreadSummary, state: &ViewState, query: &ParsedQuery) -> bool {
    let (included, excluded) = state.tag_lists();
    if !tags_match(&thread.tags, &included, &excluded, active_logic(state)) {
        return false;
    }
    if let Some(channel) = &state.channel_id {
        if thread.channel_id.as_deref() != Some(channel.as_str()) {
            return false;
        }
    }
    if !within_dates(thread.created_at, state.time_from, state.time_to) {
        return false;
    }
    text_match(thread, query)
}

fn active_logic(state: &ViewState) -> TagLogic {
    // Follows filtering historically fixes include logic to AND.
    match state.mode {
        ViewMode::Search => state.tag_logic,
        ViewMode::Follows => TagLogic::And,
    }
}

pub fn filter_threads(threads: &[ThreadSummary], state: &ViewState) -> Vec<ThreadSummary> {
    let query = parse_query(state.active_query());
    let mut out: Vec<ThreadSummary> = threads
        .iter()
        .filter(|thread| matches(thread, state, &query))
        .cloned()
        .collect();
    sort_threads(&mut out, state.sort);
    out
}

/// Stable sort so equal-ranked items keep their input order across
/// re-renders. Relevance has no client-side score and leaves the input
/// order untouched. Last-active prefers the latest follow update when the
/// server provided one.
pub fn sort_threads(threads: &mut [ThreadSummary], sort: SortSelection) {
    match sort.key {
        SortKey::Relevance => {}
        SortKey::LastActive => By::new(sort.order)
            .apply(threads, |t| t.latest_update_at.unwrap_or(t.last_active_at)),
        SortKey::CreatedAt => By::new(sort.order).apply(threads, |t| t.created_at),
        SortKey::ReplyCount => By::new(sort.order).apply(threads, |t| t.reply_count),
        SortKey::ReactionCount => By::new(sort.order).apply(threads, |t| t.reaction_count),
    }
}

struct By {
    order: SortOrder,
}

impl By {
    fn new(order: SortOrder) -> Self {
        By { order }
    }

    // Reverses the comparator, not the slice: a reversed slice would also
    // reverse ties and lose the stability guarantee.
    fn apply<K: Ord>(&self, threads: &mut [ThreadSummary], key: impl Fn(&ThreadSummary) -> K) {
        threads.sort_by(|a, b| {
            let ord = key(a).cmp(&key(b));
            match self.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
    }
}
