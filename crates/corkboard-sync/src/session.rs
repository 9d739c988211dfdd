//! Board session: the owned object a view drives.
//!
//! Holds the local board state, the drag machine, the reconciler and the
//! push channel for one board. All state changes happen on the caller's task,
//! one inbox message or pointer callback at a time.

use std::sync::Arc;
use std::time::Duration;

use corkboard_core::{AppError, Config, SyncFailure};
use corkboard_services::{
    BoardClient, BoardId, CreateTicketRequest, FailureKind, RemoteError, Ticket, TicketId,
};
use tokio::sync::mpsc;
use url::Url;

use crate::drag::{DragMachine, DragOutcome, DragSubject, HitTest, Point};
use crate::error::PushError;
use crate::push::{ChannelEvent, ChannelStatus, PushChannel, POLICY_VIOLATION};
use crate::reconcile::{Effect, Reconciler};
use crate::service::{self, Inbox, SyncMessage};
use crate::state::{BoardState, Placement};

/// Notifications for the view layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local board state changed; re-render
    BoardChanged,
    /// A remote call failed; show `message` once
    Error { kind: FailureKind, message: String },
    /// Credential rejected; hand over to sign-in
    AuthExpired,
    /// Board was deleted; navigate away
    BoardClosed,
    /// Comments or details of one ticket changed
    TicketInvalidated(TicketId),
    Channel(ChannelStatus),
}

/// Where and how to open the push channel
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub base_url: Url,
    pub token: Option<String>,
    pub reconnect_delay: Duration,
}

pub struct BoardSession {
    board_id: BoardId,
    client: Arc<BoardClient>,
    state: Option<BoardState>,
    drag: DragMachine,
    reconciler: Reconciler,
    push: Option<PushChannel>,
    /// Channel has been open at least once
    seen_open: bool,
    /// AuthExpired already sent for the current channel outage
    auth_reported: bool,
    inbox_tx: Inbox,
    inbox: mpsc::UnboundedReceiver<SyncMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl BoardSession {
    /// Open a session using the loaded configuration.
    pub fn open(
        config: &Config,
        board_id: BoardId,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, AppError> {
        let client = BoardClient::from_config(&config.server)?;
        let push = PushSettings {
            base_url: config.server.push_base_url()?,
            token: config.server.resolved_token(),
            reconnect_delay: config.sync.reconnect_delay(),
        };
        Ok(Self::new(
            client,
            board_id,
            config.sync.drag_activation_distance,
            Some(push),
            events,
        ))
    }

    /// Start a session: connect the push channel (if configured) and load the board.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        client: BoardClient,
        board_id: BoardId,
        activation_distance: f64,
        push: Option<PushSettings>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let mut session = Self {
            board_id,
            client: Arc::new(client),
            state: None,
            drag: DragMachine::new(activation_distance),
            reconciler: Reconciler::new(board_id),
            push: None,
            seen_open: false,
            auth_reported: false,
            inbox_tx,
            inbox,
            events,
        };

        if let Some(settings) = push {
            session.push = session.connect_push(settings);
        }
        if session.push.is_none() {
            session.emit(SessionEvent::Channel(ChannelStatus::Disabled));
        }

        let effects = session.reconciler.invalidate_board();
        session.run(effects);
        session
    }

    fn connect_push(&self, settings: PushSettings) -> Option<PushChannel> {
        let tx = self.inbox_tx.clone();
        let sink = move |event: ChannelEvent| {
            if tx.send(SyncMessage::Channel(event)).is_err() {
                tracing::debug!("Session gone, dropping channel event");
            }
        };

        match PushChannel::open(
            &settings.base_url,
            self.board_id,
            settings.token.as_deref(),
            settings.reconnect_delay,
            sink,
        ) {
            Ok(channel) => Some(channel),
            Err(PushError::MissingCredential) => {
                tracing::info!("No credential, live updates disabled");
                None
            }
            Err(e) => {
                tracing::warn!("Push channel not started: {}", e);
                None
            }
        }
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Current local board, `None` until loaded or after deletion
    pub fn board(&self) -> Option<&BoardState> {
        self.state.as_ref()
    }

    pub fn drag(&self) -> &DragMachine {
        &self.drag
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn is_closed(&self) -> bool {
        self.reconciler.is_closed()
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.push
            .as_ref()
            .map_or(ChannelStatus::Disabled, PushChannel::status)
    }

    // -- pointer input ----------------------------------------------------

    pub fn pointer_down(&mut self, subject: DragSubject, at: Point) {
        if self.state.is_some() {
            self.drag.pointer_down(subject, at);
        }
    }

    pub fn pointer_move(&mut self, at: Point, hit: Option<HitTest>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if self.drag.pointer_move(state, at, hit) {
            self.emit(SessionEvent::BoardChanged);
        }
    }

    /// Release the pointer over `hit` (or nothing).
    pub fn pointer_up(&mut self, hit: Option<HitTest>) -> DragOutcome {
        let Some(state) = self.state.as_mut() else {
            self.drag.reset();
            return DragOutcome::Ignored;
        };

        let outcome = self.drag.release(state, hit);
        match outcome {
            DragOutcome::MoveTicket { ticket, from, to } => {
                tracing::info!("Ticket {} moved to column {}", ticket, to);
                let effects = self.reconciler.commit_move(ticket, from, to);
                self.run(effects);
                self.emit(SessionEvent::BoardChanged);
            }
            DragOutcome::LocalOnly | DragOutcome::Cancelled => {
                self.emit(SessionEvent::BoardChanged);
            }
            DragOutcome::Click(_) | DragOutcome::Ignored => {}
        }
        outcome
    }

    /// Abort any gesture in progress.
    pub fn cancel_drag(&mut self) {
        let Some(state) = self.state.as_mut() else {
            self.drag.reset();
            return;
        };
        if self.drag.cancel(state) == DragOutcome::Cancelled {
            self.emit(SessionEvent::BoardChanged);
        }
    }

    // -- other view actions -----------------------------------------------

    /// Refetch the board.
    pub fn refresh(&mut self) {
        let effects = self.reconciler.invalidate_board();
        self.run(effects);
    }

    /// Reconnect the push channel now.
    pub fn reconnect(&self) {
        match &self.push {
            Some(channel) => channel.reconnect_now(),
            None => tracing::debug!("No push channel to reconnect"),
        }
    }

    /// Create a ticket in `req.status_column_id`; it appears once the store answers.
    pub fn create_ticket(&mut self, mut req: CreateTicketRequest) {
        if self.state.is_none() || self.is_closed() {
            let failure = if self.is_closed() {
                SyncFailure::BoardDeleted(self.board_id.to_string())
            } else {
                SyncFailure::BoardNotLoaded(self.board_id.to_string())
            };
            self.emit(SessionEvent::Error {
                kind: FailureKind::Validation,
                message: failure.user_message().to_string(),
            });
            return;
        }
        req.board_id = self.board_id;
        service::request_create_ticket(&self.inbox_tx, self.client.clone(), req);
    }

    // -- inbox --------------------------------------------------------------

    /// Wait for the next remote result or channel event.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        self.inbox.recv().await
    }

    /// Wait for and handle one inbox message.
    pub async fn step(&mut self) {
        if let Some(msg) = self.inbox.recv().await {
            self.handle(msg);
        }
    }

    pub fn handle(&mut self, msg: SyncMessage) {
        match msg {
            SyncMessage::BoardFetched { request, result } => {
                // Merge against placements the user has settled, not the hover of a gesture
                let settled = self.drag.settled_state().or(self.state.as_ref());
                let effects = self.reconciler.on_snapshot(settled, request, result);
                self.run(effects);
            }
            SyncMessage::TicketColumnSet { ticket, result } => {
                let effects = self.reconciler.on_move_result(ticket, result);
                self.run(effects);
            }
            SyncMessage::TicketCreated(result) => self.on_ticket_created(result),
            SyncMessage::Channel(ChannelEvent::Event(event)) => {
                tracing::debug!("Push event: {:?}", event);
                let effects = self.reconciler.on_push(&event);
                self.run(effects);
            }
            SyncMessage::Channel(ChannelEvent::Status(status)) => self.on_channel_status(status),
        }
    }

    /// Tear down: cancel any gesture and close the push channel normally.
    pub async fn close(mut self) {
        self.cancel_drag();
        if let Some(channel) = self.push.take() {
            channel.shutdown().await;
        }
    }

    fn on_ticket_created(&mut self, result: Result<Ticket, RemoteError>) {
        match result {
            Ok(ticket) => {
                let Some(state) = self.state.as_mut() else {
                    return;
                };
                let id = ticket.id;
                match state.insert_ticket(ticket) {
                    Ok(()) => {
                        tracing::info!("Ticket {} created", id);
                        self.emit(SessionEvent::BoardChanged);
                    }
                    Err(e) => {
                        tracing::debug!("Created ticket does not fit local board ({}), refetching", e);
                        self.refresh();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Ticket creation failed: {}", e);
                let event = match e.kind() {
                    FailureKind::Authorization => SessionEvent::AuthExpired,
                    kind => SessionEvent::Error {
                        kind,
                        message: e.user_message(),
                    },
                };
                self.emit(event);
            }
        }
    }

    fn on_channel_status(&mut self, status: ChannelStatus) {
        match status {
            ChannelStatus::Open => {
                self.auth_reported = false;
                if std::mem::replace(&mut self.seen_open, true) {
                    // Events may have been missed while disconnected
                    self.refresh();
                }
            }
            ChannelStatus::Closed {
                code: Some(POLICY_VIOLATION),
                ..
            } if !self.auth_reported => {
                self.auth_reported = true;
                self.emit(SessionEvent::AuthExpired);
            }
            _ => {}
        }
        self.emit(SessionEvent::Channel(status));
    }

    fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Fetch(request) => service::request_fetch_board(
                    &self.inbox_tx,
                    self.client.clone(),
                    self.board_id,
                    request,
                ),
                Effect::PersistMove { ticket, column } => service::request_set_ticket_column(
                    &self.inbox_tx,
                    self.client.clone(),
                    ticket,
                    column,
                ),
                Effect::Revert { ticket, to } => self.revert(ticket, to),
                Effect::ApplySnapshot { board, overlay } => {
                    if let Some(state) = self.state.as_mut() {
                        state.replace_snapshot(board);
                        for (ticket, at) in overlay {
                            if let Err(e) = state.place_ticket(ticket, at) {
                                tracing::debug!("Optimistic placement dropped: {}", e);
                            }
                        }
                        self.drag.rebase(state);
                    } else {
                        tracing::info!("Board {} loaded", board.id);
                        self.state = Some(BoardState::from_snapshot(board));
                    }
                    self.emit(SessionEvent::BoardChanged);
                }
                Effect::DiscardBoard => {
                    self.drag.reset();
                    self.state = None;
                    // Dropping the handle closes the socket normally
                    self.push = None;
                }
                Effect::Emit(event) => self.emit(event),
            }
        }
    }

    fn revert(&mut self, ticket: TicketId, to: Placement) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        tracing::info!("Reverting ticket {} to column {}", ticket, to.column);
        if self.drag.settle_ticket(state, ticket, to) {
            self.emit(SessionEvent::BoardChanged);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for session events");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::reconcile::RequestId;
    use crate::state::fixtures::*;

    /// Session outside any runtime: remote calls fail straight into the
    /// inbox, where a test can pick them up and answer them itself.
    fn offline_session(board_id: BoardId) -> (BoardSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let client = BoardClient::new("http://127.0.0.1:9", None).unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        let session = BoardSession::new(client, board_id, 3.0, None, events_tx);
        (session, events)
    }

    fn next_fetch(session: &mut BoardSession) -> RequestId {
        match session.inbox.try_recv() {
            Ok(SyncMessage::BoardFetched { request, .. }) => request,
            other => panic!("expected a board fetch, got {:?}", other),
        }
    }

    fn drag_ticket(session: &mut BoardSession, ticket: TicketId, hit: HitTest) {
        session.pointer_down(DragSubject::Ticket(ticket), Point::default());
        session.pointer_move(Point::new(50.0, 0.0), Some(hit));
    }

    #[test]
    fn test_snapshot_during_redrag_keeps_committed_origin() {
        let s = sample();
        let (mut session, _events) = offline_session(s.board.id);

        let first = next_fetch(&mut session);
        session.handle(SyncMessage::BoardFetched {
            request: first,
            result: Ok(s.board.clone()),
        });
        assert!(session.board().is_some());

        session.refresh();
        let refetch = next_fetch(&mut session);

        // T1 to Doing; the call stays unanswered
        drag_ticket(&mut session, s.t1, HitTest::column(s.doing));
        assert!(matches!(
            session.pointer_up(Some(HitTest::column(s.doing))),
            DragOutcome::MoveTicket { .. }
        ));
        assert!(matches!(
            session.inbox.try_recv(),
            Ok(SyncMessage::TicketColumnSet { .. })
        ));

        // Dragged again and hovering Done when a newer snapshot lands
        drag_ticket(&mut session, s.t1, HitTest::column(s.done));
        let mut newer = s.board.clone();
        newer.updated_at += chrono::Duration::minutes(1);
        session.handle(SyncMessage::BoardFetched {
            request: refetch,
            result: Ok(newer),
        });

        assert_eq!(session.board().unwrap().column_of(s.t1), Some(s.done));
        assert_eq!(session.drag().origin_column(), Some(s.doing));

        let outcome = session.pointer_up(Some(HitTest::column(s.done)));
        assert_eq!(
            outcome,
            DragOutcome::MoveTicket {
                ticket: s.t1,
                from: Placement {
                    column: s.doing,
                    index: 0
                },
                to: s.done,
            }
        );
        assert_eq!(
            session
                .reconciler()
                .pending(s.t1)
                .and_then(|p| p.queued_target()),
            Some(s.done)
        );
    }

    #[test]
    fn test_snapshot_without_gesture_uses_live_state() {
        let s = sample();
        let (mut session, _events) = offline_session(s.board.id);

        let first = next_fetch(&mut session);
        session.handle(SyncMessage::BoardFetched {
            request: first,
            result: Ok(s.board.clone()),
        });
        session.refresh();
        let refetch = next_fetch(&mut session);

        drag_ticket(&mut session, s.t1, HitTest::column(s.doing));
        session.pointer_up(Some(HitTest::column(s.doing)));

        let mut newer = s.board.clone();
        newer.updated_at += chrono::Duration::minutes(1);
        session.handle(SyncMessage::BoardFetched {
            request: refetch,
            result: Ok(newer),
        });

        // The unconfirmed move survives the older server view
        assert_eq!(session.board().unwrap().column_of(s.t1), Some(s.doing));
        assert!(session.board().unwrap().is_consistent());
    }
}
