//! Reconciliation of optimistic moves, refetches and push notifications.
//!
//! [`Reconciler`] owns no I/O. Each intake function returns the [`Effect`]s
//! the session must carry out, which keeps every merge/refetch decision
//! testable without a network.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use corkboard_core::SyncFailure;
use corkboard_services::{Board, BoardId, ColumnId, FailureKind, RemoteError, Ticket, TicketId};

use crate::events::{Invalidation, PushEvent};
use crate::session::SessionEvent;
use crate::state::{BoardState, Placement};

/// Correlates a board fetch with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Work the session has to perform on behalf of the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch the board snapshot, tagged with `RequestId`
    Fetch(RequestId),
    /// Persist a ticket's column remotely
    PersistMove { ticket: TicketId, column: ColumnId },
    /// Put a ticket back where it was before a failed move
    Revert { ticket: TicketId, to: Placement },
    /// Replace local state, then restore `overlay` placements on top
    ApplySnapshot {
        board: Board,
        overlay: Vec<(TicketId, Placement)>,
    },
    /// Drop all local state for the board
    DiscardBoard,
    Emit(SessionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedMove {
    target: ColumnId,
    revert: Placement,
}

/// An in-flight column change for one ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub target: ColumnId,
    /// Placement to restore if the call fails
    pub revert: Placement,
    queued: Option<QueuedMove>,
}

impl PendingMutation {
    /// Target of a later gesture waiting for this call to resolve
    pub fn queued_target(&self) -> Option<ColumnId> {
        self.queued.map(|q| q.target)
    }
}

#[derive(Debug, Default)]
struct FetchState {
    in_flight: Option<RequestId>,
    /// Another refetch is wanted once the current one lands
    follow_up: bool,
    /// Refetch postponed until pending mutations settle
    deferred: bool,
    /// Tickets whose move was confirmed while the current fetch was in flight
    guarded: HashSet<TicketId>,
}

#[derive(Debug)]
pub struct Reconciler {
    board_id: BoardId,
    pending: HashMap<TicketId, PendingMutation>,
    fetch: FetchState,
    next_request: u64,
    closed: bool,
}

impl Reconciler {
    pub fn new(board_id: BoardId) -> Self {
        Self {
            board_id,
            pending: HashMap::new(),
            fetch: FetchState::default(),
            next_request: 0,
            closed: false,
        }
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending(&self, ticket: TicketId) -> Option<&PendingMutation> {
        self.pending.get(&ticket)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetch.in_flight.is_some()
    }

    /// The board snapshot is stale; refetch, coalescing with any fetch in
    /// flight and deferring while optimistic moves are outstanding.
    pub fn invalidate_board(&mut self) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        if self.fetch.in_flight.is_some() {
            tracing::debug!("Refetch already in flight, coalescing");
            self.fetch.follow_up = true;
            return Vec::new();
        }
        if !self.pending.is_empty() {
            tracing::debug!(
                "Deferring refetch until {} pending move(s) settle",
                self.pending.len()
            );
            self.fetch.deferred = true;
            return Vec::new();
        }
        self.issue_fetch()
    }

    /// Single intake for push notifications.
    pub fn on_push(&mut self, event: &PushEvent) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        if let Some(board) = event.board_id() {
            if board != self.board_id {
                tracing::debug!("Ignoring push event for board {}", board);
                return Vec::new();
            }
        }

        match event.invalidation() {
            Invalidation::Board => self.invalidate_board(),
            Invalidation::Ticket(ticket) => {
                vec![Effect::Emit(SessionEvent::TicketInvalidated(ticket))]
            }
            Invalidation::BoardDeleted => {
                tracing::info!("Board {} deleted remotely", self.board_id);
                self.close();
                vec![
                    Effect::DiscardBoard,
                    Effect::Emit(SessionEvent::BoardClosed),
                ]
            }
        }
    }

    /// A drag committed a cross-column move of `ticket` from `from` to `to`.
    ///
    /// If a call for the ticket is already outstanding the move waits behind
    /// it, replacing any move that was already waiting.
    pub fn commit_move(&mut self, ticket: TicketId, from: Placement, to: ColumnId) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        match self.pending.get_mut(&ticket) {
            Some(pending) => {
                let next = QueuedMove {
                    target: to,
                    revert: from,
                };
                if pending.queued.replace(next).is_some() {
                    tracing::debug!("Queued move of ticket {} superseded", ticket);
                }
                tracing::debug!("Move of ticket {} queued behind in-flight call", ticket);
                Vec::new()
            }
            None => self.start_move(ticket, from, to),
        }
    }

    /// The remote store answered a column change for `ticket`.
    pub fn on_move_result(
        &mut self,
        ticket: TicketId,
        result: Result<Ticket, RemoteError>,
    ) -> Vec<Effect> {
        let Some(pending) = self.pending.remove(&ticket) else {
            tracing::debug!("No pending move for ticket {}, ignoring result", ticket);
            return Vec::new();
        };

        let mut effects = Vec::new();
        match result {
            Ok(confirmed) => {
                tracing::debug!("Move of ticket {} to {} confirmed", ticket, confirmed.column_id);
                if self.fetch.in_flight.is_some() {
                    self.fetch.guarded.insert(ticket);
                    self.fetch.follow_up = true;
                }
                if let Some(queued) = pending.queued {
                    if queued.target != confirmed.column_id {
                        effects.extend(self.start_move(ticket, queued.revert, queued.target));
                    }
                }
            }
            Err(e) => {
                tracing::info!("Move of ticket {} failed: {}", ticket, e);
                let authorization = e.kind() == FailureKind::Authorization;
                match pending.queued {
                    Some(queued) if !authorization => {
                        effects.push(Effect::Emit(failure_event(&e, None)));
                        if queued.target != pending.revert.column {
                            effects.extend(self.start_move(ticket, pending.revert, queued.target));
                        }
                    }
                    _ => {
                        effects.push(Effect::Revert {
                            ticket,
                            to: pending.revert,
                        });
                        effects.push(Effect::Emit(failure_event(&e, Some(ticket))));
                    }
                }
            }
        }

        effects.extend(self.resume_deferred());
        effects
    }

    /// A board fetch finished.
    ///
    /// Older snapshots are always discarded. A snapshot with the same revision
    /// is applied only when it would not move any ticket that has a move in
    /// flight; otherwise a follow-up fetch is scheduled. Newer snapshots are
    /// applied with in-flight placements restored on top.
    pub fn on_snapshot(
        &mut self,
        state: Option<&BoardState>,
        request: RequestId,
        result: Result<Board, RemoteError>,
    ) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        if self.fetch.in_flight != Some(request) {
            tracing::debug!("Ignoring response to superseded fetch {:?}", request);
            return Vec::new();
        }
        self.fetch.in_flight = None;
        let guarded = std::mem::take(&mut self.fetch.guarded);

        let mut effects = Vec::new();
        match result {
            Err(e) => {
                tracing::warn!("Board refresh failed: {}", e);
                effects.push(Effect::Emit(failure_event(&e, None)));
            }
            Ok(board) => match state {
                None => effects.push(Effect::ApplySnapshot {
                    board,
                    overlay: Vec::new(),
                }),
                Some(state) => {
                    let protected: HashSet<TicketId> =
                        self.pending.keys().chain(guarded.iter()).copied().collect();

                    let accept = match board.revision().cmp(&state.revision()) {
                        Ordering::Less => {
                            tracing::debug!(
                                "Discarding snapshot {} older than {}",
                                board.revision(),
                                state.revision()
                            );
                            false
                        }
                        Ordering::Equal => {
                            let clash = state
                                .membership_diff(&board)
                                .iter()
                                .any(|t| protected.contains(t));
                            if clash {
                                tracing::debug!(
                                    "Snapshot {} would undo an in-flight move, refetching later",
                                    board.revision()
                                );
                                self.fetch.follow_up = true;
                            }
                            !clash
                        }
                        Ordering::Greater => true,
                    };

                    if accept {
                        let overlay = protected
                            .iter()
                            .filter_map(|t| state.placement_of(*t).map(|p| (*t, p)))
                            .collect();
                        effects.push(Effect::ApplySnapshot { board, overlay });
                    }
                }
            },
        }

        if std::mem::take(&mut self.fetch.follow_up) {
            effects.extend(self.invalidate_board());
        }
        effects
    }

    /// Forget everything; later intake is ignored.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.fetch = FetchState::default();
    }

    fn start_move(&mut self, ticket: TicketId, revert: Placement, target: ColumnId) -> Vec<Effect> {
        self.pending.insert(
            ticket,
            PendingMutation {
                target,
                revert,
                queued: None,
            },
        );
        vec![Effect::PersistMove {
            ticket,
            column: target,
        }]
    }

    fn issue_fetch(&mut self) -> Vec<Effect> {
        self.next_request += 1;
        let request = RequestId(self.next_request);
        self.fetch.in_flight = Some(request);
        self.fetch.follow_up = false;
        self.fetch.deferred = false;
        self.fetch.guarded.clear();
        vec![Effect::Fetch(request)]
    }

    fn resume_deferred(&mut self) -> Vec<Effect> {
        if self.pending.is_empty() && std::mem::take(&mut self.fetch.deferred) {
            tracing::debug!("Pending moves settled, running deferred refetch");
            return self.invalidate_board();
        }
        Vec::new()
    }
}

/// User-facing notification for a failed remote call. `reverted` names the
/// ticket that was put back, if any.
fn failure_event(err: &RemoteError, reverted: Option<TicketId>) -> SessionEvent {
    match err.kind() {
        FailureKind::Authorization => SessionEvent::AuthExpired,
        FailureKind::Validation => SessionEvent::Error {
            kind: FailureKind::Validation,
            message: err.user_message(),
        },
        FailureKind::Transport => SessionEvent::Error {
            kind: FailureKind::Transport,
            message: match reverted {
                Some(ticket) => SyncFailure::MoveReverted(ticket.to_string())
                    .user_message()
                    .to_string(),
                None => err.user_message(),
            },
        },
    }
}
