//! Error types for the synchronization engine.

use corkboard_services::{ColumnId, TicketId};
use thiserror::Error;

/// A structural mutation was rejected. State is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Unknown ticket {0}")]
    UnknownTicket(TicketId),

    #[error("Unknown column {0}")]
    UnknownColumn(ColumnId),

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Ticket {ticket} is not in column {column}")]
    TicketNotInColumn { ticket: TicketId, column: ColumnId },
}

/// Push channel could not be set up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("No session credential; push channel stays closed")]
    MissingCredential,

    #[error("Invalid push URL: {0}")]
    InvalidUrl(String),

    #[error("Push channel needs a running async runtime")]
    NoRuntime,
}
