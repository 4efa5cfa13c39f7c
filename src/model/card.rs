use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CardPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl CardPriority {
    pub fn from_ordinal(n: i64) -> Option<Self> {
        match n {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// A work item on the kanban board. Owned by the board service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCard {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: CardPriority,
    #[serde(default, deserialize_with = "tags_from_wire", serialize_with = "tags_to_wire")]
    pub tags: Vec<String>,
    /// Formatted with the board's date format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    pub lane_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_system_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub assigned_user_ids: Vec<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl LocalCard {
    /// True when this card is correlated with `system` (case-insensitive).
    pub fn belongs_to(&self, system: &str) -> bool {
        self.external_system_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(system))
    }
}

/// Fields for a card the engine asks the board to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub title: String,
    pub description: String,
    pub priority: CardPriority,
    #[serde(serialize_with = "tags_to_wire")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub lane_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    pub external_system_name: String,
    pub external_id: String,
    pub assigned_user_ids: Vec<String>,
}

/// Partial card update. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<CardPriority>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "optional_tags_to_wire"
    )]
    pub tags: Option<Vec<String>>,
    /// Already formatted with the board's date format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_user_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_system_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl CardUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.due_date.is_some() {
            fields.push("due_date");
        }
        if self.assigned_user_ids.is_some() {
            fields.push("assignees");
        }
        if self.lane_id.is_some() {
            fields.push("lane");
        }
        if self.external_id.is_some() {
            fields.push("external_id");
        }
        fields
    }
}

/// Card fields named in a board change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardField {
    Title,
    Description,
    Priority,
    Tags,
    DueDate,
    StartDate,
    AssignedUsers,
    Lane,
    IsBlocked,
    Type,
}

impl CardField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::Description => "Description",
            Self::Priority => "Priority",
            Self::Tags => "Tags",
            Self::DueDate => "DueDate",
            Self::StartDate => "StartDate",
            Self::AssignedUsers => "AssignedUsers",
            Self::Lane => "Lane",
            Self::IsBlocked => "IsBlocked",
            Self::Type => "Type",
        }
    }
}

impl fmt::Display for CardField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.trim().to_ascii_lowercase().as_str() {
            "title" => Self::Title,
            "description" => Self::Description,
            "priority" => Self::Priority,
            "tags" => Self::Tags,
            "duedate" => Self::DueDate,
            "startdate" => Self::StartDate,
            "assignedusers" | "assignedusersids" | "assigneduserids" => Self::AssignedUsers,
            "lane" | "laneid" => Self::Lane,
            "isblocked" | "blockreason" => Self::IsBlocked,
            "type" | "typeid" => Self::Type,
            other => bail!("unknown card field '{other}'"),
        };
        Ok(field)
    }
}

/// Order- and whitespace-insensitive comparison of two tag lists.
pub fn tags_equal(a: &[String], b: &[String]) -> bool {
    tag_set(a) == tag_set(b)
}

fn tag_set(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split a comma-joined tag string as stored by the board.
pub fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn tags_from_wire<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Joined(String),
        List(Vec<String>),
        Null(()),
    }

    Ok(match Wire::deserialize(deserializer)? {
        Wire::Joined(s) => split_tags(&s),
        Wire::List(list) => list.iter().flat_map(|t| split_tags(t)).collect(),
        Wire::Null(()) => Vec::new(),
    })
}

fn tags_to_wire<S>(tags: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tags.join(","))
}

fn optional_tags_to_wire<S>(tags: &Option<Vec<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match tags {
        Some(tags) => tags_to_wire(tags, serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lane {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardType {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMember {
    pub id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email_address: String,
}

/// Board metadata used for member, type and lane lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    #[serde(default)]
    pub card_types: Vec<CardType>,
    #[serde(default)]
    pub default_card_type_id: Option<String>,
    #[serde(default)]
    pub members: Vec<BoardMember>,
}

impl BoardInfo {
    pub fn card_type_named(&self, name: &str) -> Option<&CardType> {
        let name = name.trim();
        self.card_types
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn card_type(&self, id: &str) -> Option<&CardType> {
        self.card_types.iter().find(|t| t.id == id)
    }

    pub fn member(&self, id: &str) -> Option<&BoardMember> {
        self.members.iter().find(|m| m.id == id)
    }
}

/// Change notification produced by the board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    CardCreated(LocalCard),
    CardChanged {
        card: LocalCard,
        changed_fields: Vec<CardField>,
    },
}
