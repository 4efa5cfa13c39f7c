use chrono::{DateTime, NaiveDate, Utc};

use super::external_id::ExternalId;

/// Normalized view of an item in a remote tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    /// Human-facing key (e.g. `ENG-12`) when it differs from `id`.
    pub display_key: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    pub item_type: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl RemoteItem {
    pub fn external_id(&self) -> ExternalId {
        match &self.display_key {
            Some(key) if *key != self.id => ExternalId::keyed(&self.id, key),
            _ => ExternalId::simple(&self.id),
        }
    }

    /// Display key if present, otherwise the raw id.
    pub fn key(&self) -> &str {
        self.display_key.as_deref().unwrap_or(&self.id)
    }

    pub fn is_in_state(&self, state: &str) -> bool {
        self.state.trim().eq_ignore_ascii_case(state.trim())
    }
}

/// Fields for a remote item the engine asks an adapter to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRemoteItem {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub priority: Option<String>,
    pub item_type: Option<String>,
    pub assignee: Option<Assignee>,
    pub due_date: Option<NaiveDate>,
}

/// A board member handed to an adapter for assignment. Each adapter picks
/// the form its system addresses users by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignee {
    pub user_name: String,
    pub full_name: String,
    pub email: String,
}

impl Assignee {
    /// Best term for a user search: email, then user name, then full name.
    pub fn search_term(&self) -> Option<&str> {
        first_filled(&[&self.email, &self.user_name, &self.full_name])
    }

    /// Name used in notes when the assignment cannot be applied.
    pub fn display_name(&self) -> &str {
        first_filled(&[&self.full_name, &self.user_name, &self.email]).unwrap_or_default()
    }
}

fn first_filled<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

/// Blocked-flag change. No reference system has a native flag for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedChange {
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BlockedChange {
    pub fn note(&self) -> String {
        match (self.blocked, self.reason.as_deref()) {
            (true, Some(reason)) if !reason.trim().is_empty() => {
                format!("Card blocked on the board: {}", reason.trim())
            }
            (true, _) => "Card blocked on the board".to_string(),
            (false, _) => "Card unblocked on the board".to_string(),
        }
    }
}

/// Minimal patch for a remote item. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDelta {
    pub title: Option<String>,
    pub body: Option<String>,
    pub priority: Option<String>,
    pub labels: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<NaiveDate>>,
    /// `Some(None)` unassigns.
    pub assignee: Option<Option<Assignee>>,
    pub item_type: Option<String>,
    pub blocked: Option<BlockedChange>,
}

impl FieldDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn field_count(&self) -> usize {
        [
            self.title.is_some(),
            self.body.is_some(),
            self.priority.is_some(),
            self.labels.is_some(),
            self.due_date.is_some(),
            self.assignee.is_some(),
            self.item_type.is_some(),
            self.blocked.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}
