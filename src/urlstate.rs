use chrono::NaiveDate;
use url::form_urlencoded;

use crate::state::{SortSelection, TagLogic, TagState, ViewMode, ViewState};

/// Query-string codec for [`ViewState`].
///
/// Fields at their default value are omitted so a default view encodes to
/// an empty string and bookmarked "default" URLs stay stable. Search and
/// follows are two separate parameter namespaces that reuse `q` and `page`
/// for different fields; `mode` decides which namespace the rest of the
/// string belongs to, so decode reads it first.
const DATE_FMT: &str = "%Y-%m-%d";
const TAG_SEP: char = '|';

pub fn encode(state: &ViewState) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());

    match state.mode {
        ViewMode::Follows => {
            out.append_pair("mode", "follows");
            if !state.follows_query.is_empty() {
                out.append_pair("q", &state.follows_query);
            }
            if state.follows_page > 1 {
                out.append_pair("page", &state.follows_page.to_string());
            }
            let (included, excluded) = crate::state::split_tag_states(&state.follows_tag_states);
            append_tags(&mut out, &included, &excluded);
        }
        ViewMode::Search => {
            if !state.query.is_empty() {
                out.append_pair("q", &state.query);
            }
            if state.sort != SortSelection::default() {
                out.append_pair("sort", state.sort.as_token());
            }
            if state.page > 1 {
                out.append_pair("page", &state.page.to_string());
            }
            if state.per_page != crate::pagination::DEFAULT_PER_PAGE {
                out.append_pair("pp", &state.per_page.to_string());
            }
            if let Some(channel) = &state.channel_id {
                out.append_pair("ch", channel);
            }
            if state.tag_logic != TagLogic::And {
                out.append_pair("tl", "or");
            }
            let (included, excluded) = crate::state::split_tag_states(&state.tag_states);
            append_tags(&mut out, &included, &excluded);
            if let Some(from) = state.time_from {
                out.append_pair("tf", &from.format(DATE_FMT).to_string());
            }
            if let Some(to) = state.time_to {
                out.append_pair("tt", &to.format(DATE_FMT).to_string());
            }
        }
    }

    out.finish()
}

fn append_tags(
    out: &mut form_urlencoded::Serializer<'_, String>,
    included: &[String],
    excluded: &[String],
) {
    if !included.is_empty() {
        out.append_pair("ti", &included.join(&TAG_SEP.to_string()));
    }
    if !excluded.is_empty() {
        out.append_pair("te", &excluded.join(&TAG_SEP.to_string()));
    }
}

/// Decode a query string (with or without a leading `?`) into a fresh
/// state. Unknown parameters and unparseable values fall back to defaults
/// rather than failing; a shared URL should never refuse to open.
pub fn decode(query: &str) -> ViewState {
    let query = query.strip_prefix('?').unwrap_or(query);
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let get = |key: &str| -> Option<&str> {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let mut state = ViewState::default();

    if get("mode") == Some("follows") {
        state.mode = ViewMode::Follows;
        state.follows_query = get("q").unwrap_or_default().to_string();
        state.follows_page = parse_page(get("page"));
        apply_tags(
            &mut state.follows_tag_states,
            get("ti"),
            TagState::Included,
        );
        apply_tags(
            &mut state.follows_tag_states,
            get("te"),
            TagState::Excluded,
        );
        return state;
    }

    state.query = get("q").unwrap_or_default().to_string();
    if let Some(sort) = get("sort").and_then(SortSelection::from_token) {
        state.sort = sort;
    }
    state.page = parse_page(get("page"));
    if let Some(pp) = get("pp").and_then(|v| v.parse::<usize>().ok()) {
        if pp > 0 {
            state.per_page = pp;
        }
    }
    state.channel_id = get("ch").filter(|v| !v.is_empty()).map(String::from);
    if get("tl") == Some("or") {
        state.tag_logic = TagLogic::Or;
    }
    apply_tags(&mut state.tag_states, get("ti"), TagState::Included);
    apply_tags(&mut state.tag_states, get("te"), TagState::Excluded);
    state.time_from = get("tf").and_then(parse_date);
    state.time_to = get("tt").and_then(parse_date);

    state
}

fn parse_page(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.parse::<usize>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).ok()
}

fn apply_tags(
    states: &mut std::collections::HashMap<String, TagState>,
    raw: Option<&str>,
    value: TagState,
) {
    if let Some(raw) = raw {
        for tag in raw.split(TAG_SEP).filter(|t| !t.is_empty()) {
            states.insert(tag.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TagClickMode;

    #[test]
    fn default_search_state_encodes_empty() {
        assert_eq!(encode(&ViewState::default()), "");
    }

    #[test]
    fn default_follows_state_encodes_mode_only() {
        let mut state = ViewState::default();
        state.mode = ViewMode::Follows;
        assert_eq!(encode(&state), "mode=follows");
    }

    #[test]
    fn search_round_trip() {
        let mut state = ViewState::default();
        state.query = "author:doe cats".to_string();
        state.channel_id = Some("123".to_string());
        state.tag_logic = TagLogic::Or;
        state.page = 3;
        state.per_page = 48;
        state.sort = SortSelection::from_token("created_desc").unwrap();
        state.toggle_tag("art");
        state.tag_click_mode = TagClickMode::Exclude;
        state.toggle_tag("wip");
        state.time_from = NaiveDate::from_ymd_opt(2024, 1, 5);
        state.time_to = NaiveDate::from_ymd_opt(2024, 6, 30);

        let decoded = decode(&encode(&state));
        assert_eq!(decoded.query, state.query);
        assert_eq!(decoded.channel_id, state.channel_id);
        assert_eq!(decoded.tag_logic, state.tag_logic);
        assert_eq!(decoded.page, 3);
        assert_eq!(decoded.per_page, 48);
        assert_eq!(decoded.sort, state.sort);
        assert_eq!(decoded.tag_states, state.tag_states);
        assert_eq!(decoded.time_from, state.time_from);
        assert_eq!(decoded.time_to, state.time_to);
    }

    #[test]
    fn follows_round_trip_keeps_its_own_namespace() {
        let mut state = ViewState::default();
        state.mode = ViewMode::Follows;
        state.follows_query = "dragons".to_string();
        state.follows_page = 2;
        state.toggle_tag("long");

        let decoded = decode(&encode(&state));
        assert_eq!(decoded.mode, ViewMode::Follows);
        assert_eq!(decoded.follows_query, "dragons");
        assert_eq!(decoded.follows_page, 2);
        assert_eq!(decoded.follows_tag_states, state.follows_tag_states);
        // the search namespace stays at defaults
        assert_eq!(decoded.query, "");
        assert_eq!(decoded.page, 1);
    }

    #[test]
    fn q_and_page_bind_to_mode() {
        let search = decode("q=cats&page=5");
        assert_eq!(search.query, "cats");
        assert_eq!(search.page, 5);
        assert_eq!(search.follows_page, 1);

        let follows = decode("mode=follows&q=cats&page=5");
        assert_eq!(follows.follows_query, "cats");
        assert_eq!(follows.follows_page, 5);
        assert_eq!(follows.query, "");
        assert_eq!(follows.page, 1);
    }

    #[test]
    fn tags_split_on_pipe() {
        let state = decode("ti=a%7Cb&te=c");
        assert_eq!(state.tag_states.get("a"), Some(&TagState::Included));
        assert_eq!(state.tag_states.get("b"), Some(&TagState::Included));
        assert_eq!(state.tag_states.get("c"), Some(&TagState::Excluded));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let state = decode("page=zero&pp=-1&sort=sideways&tf=not-a-date");
        assert_eq!(state.page, 1);
        assert_eq!(state.per_page, crate::pagination::DEFAULT_PER_PAGE);
        assert_eq!(state.sort, SortSelection::default());
        assert_eq!(state.time_from, None);
    }

    #[test]
    fn leading_question_mark_accepted() {
        let state = decode("?q=hi");
        assert_eq!(state.query, "hi");
    }
}
