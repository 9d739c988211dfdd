//! Async remote calls for a board session.
//! All network work runs off the session's event loop; results come back
//! through the session inbox.

use std::sync::Arc;

use corkboard_core::NetworkError;
use corkboard_services::{
    Board, BoardClient, BoardId, ColumnId, CreateTicketRequest, RemoteError, Ticket, TicketId,
};
use tokio::sync::mpsc;

use crate::push::ChannelEvent;
use crate::reconcile::RequestId;

/// Messages delivered to the session inbox
#[derive(Debug)]
pub enum SyncMessage {
    /// Result of a board fetch
    BoardFetched {
        request: RequestId,
        result: Result<Board, RemoteError>,
    },
    /// Result of a column change for one ticket
    TicketColumnSet {
        ticket: TicketId,
        result: Result<Ticket, RemoteError>,
    },
    /// Result of creating a ticket
    TicketCreated(Result<Ticket, RemoteError>),
    /// Push channel status change or event
    Channel(ChannelEvent),
}

pub type Inbox = mpsc::UnboundedSender<SyncMessage>;

fn no_runtime() -> RemoteError {
    RemoteError::Transport(NetworkError::ConnectionFailed(
        "async runtime not available".to_string(),
    ))
}

fn deliver(tx: &Inbox, msg: SyncMessage) {
    if tx.send(msg).is_err() {
        tracing::debug!("Session closed before remote result arrived");
    }
}

/// Request a board snapshot asynchronously.
pub fn request_fetch_board(
    tx: &Inbox,
    client: Arc<BoardClient>,
    board_id: BoardId,
    request: RequestId,
) {
    let tx = tx.clone();
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(r) => r,
        Err(_) => {
            deliver(
                &tx,
                SyncMessage::BoardFetched {
                    request,
                    result: Err(no_runtime()),
                },
            );
            return;
        }
    };

    runtime.spawn(async move {
        let result = client.fetch_board(board_id).await;
        deliver(&tx, SyncMessage::BoardFetched { request, result });
    });
}

/// Request a ticket column change asynchronously.
pub fn request_set_ticket_column(
    tx: &Inbox,
    client: Arc<BoardClient>,
    ticket: TicketId,
    column: ColumnId,
) {
    let tx = tx.clone();
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(r) => r,
        Err(_) => {
            deliver(
                &tx,
                SyncMessage::TicketColumnSet {
                    ticket,
                    result: Err(no_runtime()),
                },
            );
            return;
        }
    };

    runtime.spawn(async move {
        let result = client.set_ticket_column(ticket, column).await;
        deliver(&tx, SyncMessage::TicketColumnSet { ticket, result });
    });
}

/// Request ticket creation asynchronously.
pub fn request_create_ticket(tx: &Inbox, client: Arc<BoardClient>, req: CreateTicketRequest) {
    let tx = tx.clone();
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(r) => r,
        Err(_) => {
            deliver(&tx, SyncMessage::TicketCreated(Err(no_runtime())));
            return;
        }
    };

    runtime.spawn(async move {
        let result = client.create_ticket(req).await;
        deliver(&tx, SyncMessage::TicketCreated(result));
    });
}
