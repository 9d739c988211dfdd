// crates/corkboard-services/src/board.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Board identity
    BoardId
);
id_type!(
    /// Column identity
    ColumnId
);
id_type!(
    /// Ticket identity
    TicketId
);
id_type!(UserId);
id_type!(CommentId);
id_type!(WatcherId);

/// Ordering marker for board snapshots.
///
/// Backed by the board's `updated_at`; larger means newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub DateTime<Utc>);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Board member / ticket participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl User {
    /// Best available human-readable name
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.full_name.as_deref())
            .unwrap_or(&self.email)
    }
}

/// A work item. `column_id` is the membership field whose change is a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub board_id: Option<BoardId>,
    #[serde(alias = "status_column_id")]
    pub column_id: ColumnId,
    #[serde(default)]
    pub assignee_id: Option<UserId>,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub created_by_id: Option<UserId>,
    #[serde(default)]
    pub reporter: Option<User>,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Ordered lane within a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    #[serde(default)]
    pub board_id: Option<BoardId>,
    pub name: String,
    pub order: i64,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
}

/// Full board snapshot as returned by `GET /boards/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Board {
    pub fn revision(&self) -> Revision {
        Revision(self.updated_at)
    }
}

/// Ticket comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub ticket_id: TicketId,
    pub author_id: UserId,
    pub content: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub author: Option<User>,
}

/// Ticket watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: WatcherId,
    pub ticket_id: TicketId,
    pub user_id: UserId,
    pub added_by: UserId,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Request to create a board
#[derive(Debug, Clone, Serialize)]
pub struct CreateBoardRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request to create or rename/reorder a column
#[derive(Debug, Clone, Serialize)]
pub struct ColumnRequest {
    pub name: String,
    pub order: i64,
}

/// Request to create a ticket
#[derive(Debug, Clone, Serialize)]
pub struct CreateTicketRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    pub board_id: BoardId,
    pub status_column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
}

/// Partial ticket update. Only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateTicketRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_column_id: Option<ColumnId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
}

impl UpdateTicketRequest {
    /// Body for a pure column move
    pub fn move_to(column_id: ColumnId) -> Self {
        Self {
            status_column_id: Some(column_id),
            ..Self::default()
        }
    }
}

/// Request to add a board member by email
#[derive(Debug, Clone, Serialize)]
pub struct AddMemberRequest {
    pub email: String,
}

/// Request to create or edit a comment
#[derive(Debug, Clone, Serialize)]
pub struct CommentRequest {
    pub content: String,
}

/// Request to add a watcher to a ticket
#[derive(Debug, Clone, Serialize)]
pub struct AddWatcherRequest {
    pub user_id: UserId,
}

/// Lenient timestamp decoding.
///
/// The backend emits ISO-8601 both with an offset and as naive UTC
/// (`2026-01-30T12:00:00.123456`); both are accepted.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_some(&v.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
                None => Ok(None),
            }
        }
    }
}
