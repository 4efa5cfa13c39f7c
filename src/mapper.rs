//! Translation of remote-native field values into board equivalents.
//!
//! Everything here is pure: lookups against the mapping's configured tables
//! and the board's member/type lists, with no I/O.

use chrono::NaiveDate;

use crate::model::card::{BoardInfo, BoardMember, CardPriority, CardType, NewCard};
use crate::model::mapping::BoardMapping;
use crate::model::remote_item::{Assignee, RemoteItem};

const JIRA_PRIORITIES: &[(&str, CardPriority)] = &[
    ("highest", CardPriority::Critical),
    ("blocker", CardPriority::Critical),
    ("critical", CardPriority::Critical),
    ("high", CardPriority::High),
    ("major", CardPriority::High),
    ("medium", CardPriority::Normal),
    ("low", CardPriority::Low),
    ("lowest", CardPriority::Low),
    ("minor", CardPriority::Low),
    ("trivial", CardPriority::Low),
];

const GITHUB_PRIORITIES: &[(&str, CardPriority)] = &[
    ("urgent", CardPriority::Critical),
    ("critical", CardPriority::Critical),
    ("high", CardPriority::High),
    ("medium", CardPriority::Normal),
    ("normal", CardPriority::Normal),
    ("low", CardPriority::Low),
];

fn builtin_priorities(system: &str) -> &'static [(&'static str, CardPriority)] {
    match system.to_ascii_lowercase().as_str() {
        "jira" => JIRA_PRIORITIES,
        "github" => GITHUB_PRIORITIES,
        _ => &[],
    }
}

pub struct FieldMapper<'a> {
    mapping: &'a BoardMapping,
    board: &'a BoardInfo,
    system: &'a str,
    date_format: &'a str,
}

impl<'a> FieldMapper<'a> {
    pub fn new(
        mapping: &'a BoardMapping,
        board: &'a BoardInfo,
        system: &'a str,
        date_format: &'a str,
    ) -> Self {
        Self {
            mapping,
            board,
            system,
            date_format,
        }
    }

    /// Remote priority label or ordinal → local priority, `Normal` when unknown.
    pub fn priority(&self, remote: Option<&str>) -> CardPriority {
        let Some(raw) = remote.map(str::trim).filter(|s| !s.is_empty()) else {
            return CardPriority::Normal;
        };
        if let Some((_, p)) = self
            .mapping
            .priority_map
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(raw))
        {
            return *p;
        }
        if let Some((_, p)) = builtin_priorities(self.system)
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(raw))
        {
            return *p;
        }
        raw.parse::<i64>()
            .ok()
            .and_then(CardPriority::from_ordinal)
            .unwrap_or(CardPriority::Normal)
    }

    /// Local priority → remote label, preferring configured entries.
    pub fn remote_priority(&self, priority: CardPriority) -> Option<String> {
        let mut configured: Vec<&String> = self
            .mapping
            .priority_map
            .iter()
            .filter(|(_, p)| **p == priority)
            .map(|(k, _)| k)
            .collect();
        configured.sort();
        if let Some(label) = configured.first() {
            return Some((*label).clone());
        }
        builtin_priorities(self.system)
            .iter()
            .find(|(_, p)| *p == priority)
            .map(|(label, _)| capitalize(label))
    }

    /// Resolve a remote type name: explicit mapping, then identical name,
    /// then the board's default type.
    pub fn card_type(&self, remote_type: Option<&str>) -> Option<&'a CardType> {
        let board = self.board;
        if let Some(remote) = remote_type.map(str::trim).filter(|s| !s.is_empty()) {
            let mapped = self
                .mapping
                .type_map
                .iter()
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(remote))
                .and_then(|(_, local)| board.card_type_named(local));
            if let Some(t) = mapped {
                return Some(t);
            }
            if let Some(t) = board.card_type_named(remote) {
                return Some(t);
            }
        }
        self.default_card_type()
    }

    fn default_card_type(&self) -> Option<&'a CardType> {
        let board = self.board;
        self.mapping
            .default_card_type
            .as_deref()
            .and_then(|name| board.card_type_named(name))
            .or_else(|| {
                board
                    .default_card_type_id
                    .as_deref()
                    .and_then(|id| board.card_type(id))
            })
    }

    /// Local card type → remote type name for item creation.
    pub fn remote_type(&self, type_id: Option<&str>) -> Option<String> {
        let local = self.board.card_type(type_id?)?;
        let mapped = self
            .mapping
            .type_map
            .iter()
            .find(|(_, l)| l.trim().eq_ignore_ascii_case(&local.name))
            .map(|(remote, _)| remote.clone());
        Some(mapped.unwrap_or_else(|| local.name.clone()))
    }

    /// Match a remote identity against board members by user name, then
    /// full name, then email address. No match leaves the card unassigned.
    pub fn assignee(&self, identity: Option<&str>) -> Option<&'a BoardMember> {
        let identity = identity.map(str::trim).filter(|s| !s.is_empty())?;
        let members = &self.board.members;
        find_member(members, identity, user_name)
            .or_else(|| find_member(members, identity, full_name))
            .or_else(|| find_member(members, identity, email_address))
    }

    /// The card's first assignee, in every form the board knows them by.
    pub fn remote_assignee(&self, user_ids: &[String]) -> Option<Assignee> {
        user_ids
            .iter()
            .filter_map(|id| self.board.member(id))
            .map(|m| Assignee {
                user_name: m.user_name.clone(),
                full_name: m.full_name.clone(),
                email: m.email_address.clone(),
            })
            .find(|a| a.search_term().is_some())
    }

    /// Remote labels → card tags, adding the system name when configured.
    pub fn tags(&self, labels: &[String]) -> Vec<String> {
        let mut tags: Vec<String> = labels
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if self.mapping.tag_cards_with_target_system_name
            && !tags.iter().any(|t| t.eq_ignore_ascii_case(self.system))
        {
            tags.push(self.system.to_string());
        }
        tags
    }

    /// Card tags → remote labels, dropping the system-name tag this engine adds.
    pub fn labels(&self, tags: &[String]) -> Vec<String> {
        tags.iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| {
                !(self.mapping.tag_cards_with_target_system_name
                    && t.eq_ignore_ascii_case(self.system))
            })
            .collect()
    }

    pub fn format_date(&self, date: NaiveDate) -> String {
        date.format(self.date_format).to_string()
    }

    /// Parse a board date string, falling back to ISO format.
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        NaiveDate::parse_from_str(raw, self.date_format)
            .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
            .ok()
    }

    pub fn new_card(&self, item: &RemoteItem, lane_id: &str) -> NewCard {
        NewCard {
            title: item.title.clone(),
            description: item.body.clone().unwrap_or_default(),
            priority: self.priority(item.priority.as_deref()),
            tags: self.tags(&item.labels),
            due_date: item.due_date.map(|d| self.format_date(d)),
            lane_id: lane_id.to_string(),
            type_id: self
                .card_type(item.item_type.as_deref())
                .map(|t| t.id.clone()),
            external_system_name: self.system.to_string(),
            external_id: item.external_id().to_string(),
            assigned_user_ids: self
                .assignee(item.assignee.as_deref())
                .map(|m| vec![m.id.clone()])
                .unwrap_or_default(),
        }
    }
}

fn find_member<'m>(
    members: &'m [BoardMember],
    identity: &str,
    field: fn(&BoardMember) -> &str,
) -> Option<&'m BoardMember> {
    members
        .iter()
        .find(|m| !field(m).is_empty() && field(m).eq_ignore_ascii_case(identity))
}

fn user_name(m: &BoardMember) -> &str {
    &m.user_name
}

fn full_name(m: &BoardMember) -> &str {
    &m.full_name
}

fn email_address(m: &BoardMember) -> &str {
    &m.email_address
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
