use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use super::card::CardPriority;

pub const DEFAULT_POLLING_SECS: u64 = 60;
pub const MIN_POLLING_SECS: u64 = 5;

/// Per-board synchronization settings for one board/project pair.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardMapping {
    pub board_id: String,
    /// Registry name of the remote system, e.g. `jira` or `github`.
    pub target_system: String,
    /// Jira project key, or `owner/repo` for GitHub.
    pub project: String,
    #[serde(default = "default_polling_secs")]
    pub polling_frequency_secs: u64,
    #[serde(default)]
    pub lanes: Vec<LaneStates>,
    #[serde(default = "enabled")]
    pub update_cards: bool,
    #[serde(default = "enabled")]
    pub update_card_lanes: bool,
    #[serde(default)]
    pub tag_cards_with_target_system_name: bool,
    #[serde(default)]
    pub create_remote_items: bool,
    /// Remote type name → local card type name.
    #[serde(default)]
    pub type_map: HashMap<String, String>,
    /// Remote priority label or ordinal → local priority.
    #[serde(default)]
    pub priority_map: HashMap<String, CardPriority>,
    #[serde(default)]
    pub default_card_type: Option<String>,
}

fn default_polling_secs() -> u64 {
    DEFAULT_POLLING_SECS
}

fn enabled() -> bool {
    true
}

impl BoardMapping {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_frequency_secs.max(MIN_POLLING_SECS))
    }

    /// Parsed state chains configured for a lane, in configured order.
    pub fn chains_for_lane(&self, lane_id: &str) -> Vec<StateChain> {
        self.lanes
            .iter()
            .find(|l| l.lane_id == lane_id)
            .map(|l| l.chains())
            .unwrap_or_default()
    }

    /// First configured lane whose state set contains `state`.
    ///
    /// A single-state entry matches on equality; a chain matches on its
    /// final state.
    pub fn lane_for_state(&self, state: &str) -> Option<&str> {
        self.lanes
            .iter()
            .find(|l| l.accepts(state))
            .map(|l| l.lane_id.as_str())
    }

    pub fn lane_accepts(&self, lane_id: &str, state: &str) -> bool {
        self.lanes
            .iter()
            .any(|l| l.lane_id == lane_id && l.accepts(state))
    }

    /// Short label used for log fields and cursor file names.
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.board_id, self.target_system, self.project)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaneStates {
    pub lane_id: String,
    #[serde(default)]
    pub states: Vec<String>,
}

impl LaneStates {
    pub fn chains(&self) -> Vec<StateChain> {
        self.states
            .iter()
            .filter_map(|spec| StateChain::parse(spec))
            .collect()
    }

    fn accepts(&self, state: &str) -> bool {
        self.chains().iter().any(|chain| chain.ends_at(state))
    }
}

/// Ordered list of remote states a lane move walks through.
///
/// Parsed from `"active > resolved>closed"`: states separated by `>`,
/// surrounding whitespace trimmed, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChain(Vec<String>);

impl StateChain {
    pub fn parse(spec: &str) -> Option<Self> {
        let states: Vec<String> = spec
            .split('>')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if states.is_empty() {
            None
        } else {
            Some(Self(states))
        }
    }

    pub fn states(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ends_at(&self, state: &str) -> bool {
        same_state(self.last(), state)
    }

    /// States still to visit from `current`.
    ///
    /// If `current` appears inside the chain, only the states strictly after
    /// it remain; otherwise the whole chain does.
    pub fn remaining_after(&self, current: &str) -> &[String] {
        match self.0.iter().position(|s| same_state(s, current)) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for StateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(">"))
    }
}

pub fn same_state(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(lanes: &[(&str, &[&str])]) -> BoardMapping {
        BoardMapping {
            board_id: "b1".into(),
            target_system: "jira".into(),
            project: "ENG".into(),
            polling_frequency_secs: 1,
            lanes: lanes
                .iter()
                .map(|(id, states)| LaneStates {
                    lane_id: id.to_string(),
                    states: states.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
            update_cards: true,
            update_card_lanes: true,
            tag_cards_with_target_system_name: false,
            create_remote_items: false,
            type_map: HashMap::new(),
            priority_map: HashMap::new(),
            default_card_type: None,
        }
    }

    #[test]
    fn chain_parsing_trims_whitespace() {
        let chain = StateChain::parse(" active > resolved>closed ").unwrap();
        assert_eq!(chain.states(), &["active", "resolved", "closed"]);
        assert_eq!(chain.last(), "closed");
        assert_eq!(chain.to_string(), "active>resolved>closed");
    }

    #[test]
    fn blank_specs_parse_to_nothing() {
        assert!(StateChain::parse("").is_none());
        assert!(StateChain::parse(" > ").is_none());
    }

    #[test]
    fn remaining_skips_states_already_reached() {
        let chain = StateChain::parse("A>B>C").unwrap();
        assert_eq!(chain.remaining_after("b"), &["C"]);
        assert_eq!(chain.remaining_after("A"), &["B", "C"]);
        assert_eq!(chain.remaining_after("X"), &["A", "B", "C"]);
        assert!(chain.remaining_after("c").is_empty());
    }

    #[test]
    fn lane_lookup_uses_first_matching_lane() {
        let m = mapping(&[
            ("todo", &["Open", "Reopened"]),
            ("done", &["active>resolved>closed"]),
            ("archive", &["closed"]),
        ]);
        assert_eq!(m.lane_for_state("open"), Some("todo"));
        assert_eq!(m.lane_for_state("CLOSED"), Some("done"));
        assert_eq!(m.lane_for_state("resolved"), None);
        assert!(m.lane_accepts("archive", "closed"));
    }

    #[test]
    fn polling_interval_has_a_floor() {
        let m = mapping(&[]);
        assert_eq!(m.polling_interval(), Duration::from_secs(MIN_POLLING_SECS));
    }

    #[test]
    fn chains_for_unknown_lane_are_empty() {
        let m = mapping(&[("done", &["closed", "resolved>closed"])]);
        assert_eq!(m.chains_for_lane("done").len(), 2);
        assert!(m.chains_for_lane("nope").is_empty());
    }
}
