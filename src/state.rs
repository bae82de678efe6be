use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pagination::DEFAULT_PER_PAGE;

/// Which data source owns the result area. Search is filtered remotely,
/// follows is fetched whole and filtered locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Search,
    Follows,
}

/// Per-tag state. Absence from the map means neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    Included,
    Excluded,
}

/// Combinator for the included-tag set. Excluded tags are always
/// any-match, regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagLogic {
    #[default]
    And,
    Or,
}

/// What a bare tag click assigns. Switching this does not retroactively
/// change tags that are already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagClickMode {
    #[default]
    Include,
    Exclude,
}

impl TagClickMode {
    pub fn target(self) -> TagState {
        match self {
            TagClickMode::Include => TagState::Included,
            TagClickMode::Exclude => TagState::Excluded,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            TagClickMode::Include => TagClickMode::Exclude,
            TagClickMode::Exclude => TagClickMode::Include,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Relevance,
    LastActive,
    CreatedAt,
    ReplyCount,
    ReactionCount,
}

impl SortKey {
    /// Name the remote side expects in `sort_method`.
    pub fn api_method(self) -> &'static str {
        match self {
            SortKey::Relevance => "comprehensive",
            SortKey::LastActive => "last_active",
            SortKey::CreatedAt => "created_at",
            SortKey::ReplyCount => "reply_count",
            SortKey::ReactionCount => "reaction_count",
        }
    }
}

/// Sort key plus direction, encoded as one token in the URL (the set of
/// reachable combinations is small and fixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSelection {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Default for SortSelection {
    fn default() -> Self {
        SortSelection {
            key: SortKey::LastActive,
            order: SortOrder::Desc,
        }
    }
}

pub const SORT_CHOICES: &[SortSelection] = &[
    SortSelection {
        key: SortKey::LastActive,
        order: SortOrder::Desc,
    },
    SortSelection {
        key: SortKey::Relevance,
        order: SortOrder::Desc,
    },
    SortSelection {
        key: SortKey::CreatedAt,
        order: SortOrder::Desc,
    },
    SortSelection {
        key: SortKey::CreatedAt,
        order: SortOrder::Asc,
    },
    SortSelection {
        key: SortKey::ReplyCount,
        order: SortOrder::Desc,
    },
    SortSelection {
        key: SortKey::ReactionCount,
        order: SortOrder::Desc,
    },
];

impl SortSelection {
    pub fn as_token(self) -> &'static str {
        match (self.key, self.order) {
            (SortKey::Relevance, _) => "relevance",
            (SortKey::LastActive, _) => "last_active_desc",
            (SortKey::CreatedAt, SortOrder::Asc) => "created_asc",
            (SortKey::CreatedAt, SortOrder::Desc) => "created_desc",
            (SortKey::ReplyCount, _) => "reply_desc",
            (SortKey::ReactionCount, _) => "reaction_desc",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        SORT_CHOICES
            .iter()
            .copied()
            .find(|choice| choice.as_token() == token)
    }

    pub fn next(self) -> Self {
        let idx = SORT_CHOICES
            .iter()
            .position(|choice| *choice == self)
            .unwrap_or(0);
        SORT_CHOICES[(idx + 1) % SORT_CHOICES.len()]
    }

    pub fn label(self) -> &'static str {
        match self.as_token() {
            "relevance" => "relevance",
            "last_active_desc" => "last active",
            "created_desc" => "newest",
            "created_asc" => "oldest",
            "reply_desc" => "most replies",
            _ => "most reactions",
        }
    }
}

/// The single mutable aggregate behind the whole view. Search and follows
/// keep independent query/tag/page fields because they paginate different
/// collections; the shared fields (sort, time bounds, channel) apply to
/// whichever mode is active.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub mode: ViewMode,
    pub query: String,
    pub channel_id: Option<String>,
    pub tag_states: HashMap<String, TagState>,
    pub tag_logic: TagLogic,
    pub tag_click_mode: TagClickMode,
    pub time_from: Option<NaiveDate>,
    pub time_to: Option<NaiveDate>,
    pub sort: SortSelection,
    pub page: usize,
    pub per_page: usize,

    pub follows_query: String,
    pub follows_tag_states: HashMap<String, TagState>,
    pub follows_page: usize,
    pub follows_per_page: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState {
            mode: ViewMode::Search,
            query: String::new(),
            channel_id: None,
            tag_states: HashMap::new(),
            tag_logic: TagLogic::And,
            tag_click_mode: TagClickMode::Include,
            time_from: None,
            time_to: None,
            sort: SortSelection::default(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            follows_query: String::new(),
            follows_tag_states: HashMap::new(),
            follows_page: 1,
            follows_per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ViewState {
    /// Tag map for the active mode.
    pub fn active_tag_states(&self) -> &HashMap<String, TagState> {
        match self.mode {
            ViewMode::Search => &self.tag_states,
            ViewMode::Follows => &self.follows_tag_states,
        }
    }

    pub fn active_query(&self) -> &str {
        match self.mode {
            ViewMode::Search => &self.query,
            ViewMode::Follows => &self.follows_query,
        }
    }

    pub fn active_page(&self) -> usize {
        match self.mode {
            ViewMode::Search => self.page,
            ViewMode::Follows => self.follows_page,
        }
    }

    /// A click forces the tag into the current click-mode state, or clears
    /// it if it is already there. It never flips include to exclude in one
    /// click; a later click while the click-mode differs converts it.
    pub fn toggle_tag(&mut self, tag: &str) {
        let target = self.tag_click_mode.target();
        let states = match self.mode {
            ViewMode::Search => &mut self.tag_states,
            ViewMode::Follows => &mut self.follows_tag_states,
        };
        match states.get(tag) {
            Some(current) if *current == target => {
                states.remove(tag);
            }
            _ => {
                states.insert(tag.to_string(), target);
            }
        }
    }

    /// Sorted (included, excluded) tag lists for the active mode. Sorted so
    /// that encoded URLs and outgoing requests are deterministic.
    pub fn tag_lists(&self) -> (Vec<String>, Vec<String>) {
        split_tag_states(self.active_tag_states())
    }
}

pub fn split_tag_states(states: &HashMap<String, TagState>) -> (Vec<String>, Vec<String>) {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (tag, state) in states {
        match state {
            TagState::Included => included.push(tag.clone()),
            TagState::Excluded => excluded.push(tag.clone()),
        }
    }
    included.sort();
    excluded.sort();
    (included, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_sets_then_clears() {
        let mut state = ViewState::default();
        state.toggle_tag("fic");
        assert_eq!(state.tag_states.get("fic"), Some(&TagState::Included));
        state.toggle_tag("fic");
        assert!(!state.tag_states.contains_key("fic"));
    }

    #[test]
    fn click_in_exclude_mode_converts_included_tag() {
        let mut state = ViewState::default();
        state.toggle_tag("fic");
        state.tag_click_mode = TagClickMode::Exclude;
        state.toggle_tag("fic");
        assert_eq!(state.tag_states.get("fic"), Some(&TagState::Excluded));
        // and again clears it
        state.toggle_tag("fic");
        assert!(!state.tag_states.contains_key("fic"));
    }

    #[test]
    fn switching_click_mode_keeps_existing_tags() {
        let mut state = ViewState::default();
        state.toggle_tag("a");
        state.tag_click_mode = TagClickMode::Exclude;
        assert_eq!(state.tag_states.get("a"), Some(&TagState::Included));
    }

    #[test]
    fn follows_mode_uses_its_own_tag_map() {
        let mut state = ViewState::default();
        state.mode = ViewMode::Follows;
        state.toggle_tag("a");
        assert!(state.tag_states.is_empty());
        assert_eq!(
            state.follows_tag_states.get("a"),
            Some(&TagState::Included)
        );
    }

    #[test]
    fn sort_tokens_round_trip() {
        for choice in SORT_CHOICES {
            assert_eq!(SortSelection::from_token(choice.as_token()), Some(*choice));
        }
        assert_eq!(SortSelection::from_token("bogus"), None);
    }

    #[test]
    fn tag_lists_are_sorted() {
        let mut state = ViewState::default();
        state.toggle_tag("zebra");
        state.toggle_tag("apple");
        state.tag_click_mode = TagClickMode::Exclude;
        state.toggle_tag("mango");
        let (included, excluded) = state.tag_lists();
        assert_eq!(included, vec!["apple", "zebra"]);
        assert_eq!(excluded, vec!["mango"]);
    }
}
