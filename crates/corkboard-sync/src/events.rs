//! Push notifications delivered over the board channel.

use corkboard_services::{BoardId, TicketId};
use serde::Deserialize;

/// One change notification. Frames look like
/// `{"type": "TICKET_UPDATED", "ticket_id": "...", ...}`; extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEvent {
    TicketCreated {
        #[serde(default)]
        board_id: Option<BoardId>,
        #[serde(default)]
        ticket_id: Option<TicketId>,
    },
    TicketUpdated {
        #[serde(default)]
        board_id: Option<BoardId>,
        #[serde(default)]
        ticket_id: Option<TicketId>,
    },
    TicketDeleted {
        #[serde(default)]
        board_id: Option<BoardId>,
        #[serde(default)]
        ticket_id: Option<TicketId>,
    },
    #[serde(alias = "COMMENT_ADDED")]
    CommentCreated { ticket_id: TicketId },
    CommentUpdated { ticket_id: TicketId },
    CommentDeleted { ticket_id: TicketId },
    BoardUpdated {
        #[serde(default)]
        board_id: Option<BoardId>,
    },
    BoardDeleted {
        #[serde(default)]
        board_id: Option<BoardId>,
    },
}

/// Cached entity an event invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Board,
    Ticket(TicketId),
    BoardDeleted,
}

impl PushEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Board the event names, when the payload carries one
    pub fn board_id(&self) -> Option<BoardId> {
        match self {
            PushEvent::TicketCreated { board_id, .. }
            | PushEvent::TicketUpdated { board_id, .. }
            | PushEvent::TicketDeleted { board_id, .. }
            | PushEvent::BoardUpdated { board_id }
            | PushEvent::BoardDeleted { board_id } => *board_id,
            PushEvent::CommentCreated { .. }
            | PushEvent::CommentUpdated { .. }
            | PushEvent::CommentDeleted { .. } => None,
        }
    }

    pub fn invalidation(&self) -> Invalidation {
        match self {
            PushEvent::TicketCreated { .. }
            | PushEvent::TicketUpdated { .. }
            | PushEvent::TicketDeleted { .. }
            | PushEvent::BoardUpdated { .. } => Invalidation::Board,
            PushEvent::CommentCreated { ticket_id }
            | PushEvent::CommentUpdated { ticket_id }
            | PushEvent::CommentDeleted { ticket_id } => Invalidation::Ticket(*ticket_id),
            PushEvent::BoardDeleted { .. } => Invalidation::BoardDeleted,
        }
    }
}
