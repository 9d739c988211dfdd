//! Pointer-driven drag gestures over a [`BoardState`].
//!
//! The machine moves `Idle -> Pending -> Dragging -> Idle`. A press only
//! becomes a drag once the pointer has travelled the activation distance.
//! While dragging, every change of hit target is mirrored into the board
//! state for live feedback; nothing is sent remotely until release.

use corkboard_services::{ColumnId, TicketId};

use crate::state::{BoardState, Placement};

/// Screen position of the pointer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// What is being dragged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragSubject {
    Column(ColumnId),
    Ticket(TicketId),
}

/// Drop targets under the pointer. When both are set the ticket wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitTest {
    pub column: Option<ColumnId>,
    pub ticket: Option<TicketId>,
}

impl HitTest {
    pub fn column(column: ColumnId) -> Self {
        Self {
            column: Some(column),
            ticket: None,
        }
    }

    pub fn ticket(column: ColumnId, ticket: TicketId) -> Self {
        Self {
            column: Some(column),
            ticket: Some(ticket),
        }
    }

    fn is_empty(&self) -> bool {
        self.column.is_none() && self.ticket.is_none()
    }
}

/// Result of releasing or cancelling a gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragOutcome {
    /// Pointer released before the activation distance was reached
    Click(DragSubject),
    /// Ticket ended in another column; the move must be persisted
    MoveTicket {
        ticket: TicketId,
        from: Placement,
        to: ColumnId,
    },
    /// Reorder that only lives locally
    LocalOnly,
    /// State was restored to the pre-drag snapshot
    Cancelled,
    /// No gesture was in progress
    Ignored,
}

#[derive(Debug, Clone)]
struct DragSession {
    subject: DragSubject,
    /// Placement of the dragged ticket at gesture start
    origin: Option<Placement>,
    snapshot: BoardState,
    last_hit: Option<HitTest>,
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Idle,
    Pending {
        subject: DragSubject,
        start: Point,
    },
    Dragging(Box<DragSession>),
}

/// Tracks one pointer gesture at a time
#[derive(Debug, Clone)]
pub struct DragMachine {
    activation_distance: f64,
    phase: Phase,
}

impl DragMachine {
    pub fn new(activation_distance: f64) -> Self {
        Self {
            activation_distance,
            phase: Phase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, Phase::Dragging(_))
    }

    pub fn subject(&self) -> Option<DragSubject> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Pending { subject, .. } => Some(*subject),
            Phase::Dragging(session) => Some(session.subject),
        }
    }

    /// Ticket currently being dragged, if any
    pub fn dragged_ticket(&self) -> Option<TicketId> {
        match &self.phase {
            Phase::Dragging(session) => match session.subject {
                DragSubject::Ticket(id) => Some(id),
                DragSubject::Column(_) => None,
            },
            _ => None,
        }
    }

    /// Column the dragged ticket started from
    pub fn origin_column(&self) -> Option<ColumnId> {
        match &self.phase {
            Phase::Dragging(session) => session.origin.map(|p| p.column),
            _ => None,
        }
    }

    /// Board as it stands without the live hover placement of the gesture.
    pub fn settled_state(&self) -> Option<&BoardState> {
        match &self.phase {
            Phase::Dragging(session) => Some(&session.snapshot),
            _ => None,
        }
    }

    /// Press on a column header or ticket card. Ignored unless idle.
    pub fn pointer_down(&mut self, subject: DragSubject, at: Point) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.phase = Phase::Pending { subject, start: at };
        true
    }

    /// Pointer moved. Returns true when `state` changed.
    pub fn pointer_move(&mut self, state: &mut BoardState, at: Point, hit: Option<HitTest>) -> bool {
        if let Phase::Pending { subject, start } = self.phase {
            if start.distance(&at) < self.activation_distance {
                return false;
            }
            if !self.activate(state, subject) {
                return false;
            }
        }

        match &mut self.phase {
            Phase::Dragging(session) => {
                let Some(hit) = hit.filter(|h| !h.is_empty()) else {
                    return false;
                };
                if session.last_hit == Some(hit) {
                    return false;
                }
                session.last_hit = Some(hit);
                apply_hit(state, session.subject, hit)
            }
            _ => false,
        }
    }

    /// Pointer released. A drop with no target cancels.
    pub fn release(&mut self, state: &mut BoardState, hit: Option<HitTest>) -> DragOutcome {
        let phase = std::mem::take(&mut self.phase);
        let session = match phase {
            Phase::Idle => return DragOutcome::Ignored,
            Phase::Pending { subject, .. } => return DragOutcome::Click(subject),
            Phase::Dragging(session) => session,
        };

        let hit = match hit.filter(|h| !h.is_empty()) {
            Some(hit) => hit,
            None => {
                tracing::debug!("Drop outside any target, restoring board");
                *state = session.snapshot;
                return DragOutcome::Cancelled;
            }
        };

        if session.last_hit != Some(hit) {
            apply_hit(state, session.subject, hit);
        }

        match (session.subject, session.origin) {
            (DragSubject::Ticket(ticket), Some(origin)) => match state.column_of(ticket) {
                Some(to) if to != origin.column => DragOutcome::MoveTicket {
                    ticket,
                    from: origin,
                    to,
                },
                Some(_) => DragOutcome::LocalOnly,
                None => {
                    *state = session.snapshot;
                    DragOutcome::Cancelled
                }
            },
            _ => DragOutcome::LocalOnly,
        }
    }

    /// Abort the gesture, restoring the pre-drag snapshot if one was taken.
    pub fn cancel(&mut self, state: &mut BoardState) -> DragOutcome {
        match std::mem::take(&mut self.phase) {
            Phase::Idle => DragOutcome::Ignored,
            Phase::Pending { .. } => DragOutcome::Cancelled,
            Phase::Dragging(session) => {
                *state = session.snapshot;
                DragOutcome::Cancelled
            }
        }
    }

    /// Drop any gesture without touching state (board went away).
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Adopt `state` as the new settled baseline after a snapshot replacement.
    ///
    /// The gesture continues from the dragged entity's new placement and the
    /// last hover target is mirrored again on top. Returns false if the entity
    /// vanished and the gesture was dropped.
    pub fn rebase(&mut self, state: &mut BoardState) -> bool {
        let Phase::Dragging(session) = &mut self.phase else {
            return true;
        };

        let origin = match session.subject {
            DragSubject::Ticket(ticket) => match state.placement_of(ticket) {
                Some(p) => Some(p),
                None => {
                    tracing::info!("Dragged ticket {} removed remotely, ending drag", ticket);
                    self.phase = Phase::Idle;
                    return false;
                }
            },
            DragSubject::Column(column) => {
                if state.column(column).is_none() {
                    tracing::info!("Dragged column {} removed remotely, ending drag", column);
                    self.phase = Phase::Idle;
                    return false;
                }
                None
            }
        };

        session.origin = origin;
        session.snapshot = state.clone();
        if let Some(hit) = session.last_hit {
            apply_hit(state, session.subject, hit);
        }
        true
    }

    /// Settle a ticket at `at` outside of the gesture (e.g. a reverted move).
    ///
    /// The pre-drag snapshot is amended too, so a later cancel does not
    /// resurrect the old placement. The live position of the dragged ticket
    /// belongs to the pointer and is left alone. Returns true when `state`
    /// changed.
    pub fn settle_ticket(&mut self, state: &mut BoardState, ticket: TicketId, at: Placement) -> bool {
        if let Phase::Dragging(session) = &mut self.phase {
            if session.snapshot.place_ticket(ticket, at).is_ok()
                && session.subject == DragSubject::Ticket(ticket)
            {
                session.origin = session.snapshot.placement_of(ticket);
                return false;
            }
        }

        match state.place_ticket(ticket, at) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Could not settle ticket {}: {}", ticket, e);
                false
            }
        }
    }

    fn activate(&mut self, state: &BoardState, subject: DragSubject) -> bool {
        let origin = match subject {
            DragSubject::Ticket(ticket) => match state.placement_of(ticket) {
                Some(p) => Some(p),
                None => {
                    self.phase = Phase::Idle;
                    return false;
                }
            },
            DragSubject::Column(column) => {
                if state.column(column).is_none() {
                    self.phase = Phase::Idle;
                    return false;
                }
                None
            }
        };

        tracing::debug!("Drag started: {:?}", subject);
        self.phase = Phase::Dragging(Box::new(DragSession {
            subject,
            origin,
            snapshot: state.clone(),
            last_hit: None,
        }));
        true
    }
}

/// Mirror a hit-test into the board. Returns true when something moved.
fn apply_hit(state: &mut BoardState, subject: DragSubject, hit: HitTest) -> bool {
    match subject {
        DragSubject::Ticket(ticket) => {
            let Some(current) = state.column_of(ticket) else {
                return false;
            };

            let (target, before) = match hit.ticket {
                Some(over) if over == ticket => return false,
                Some(over) => match state.placement_of(over) {
                    Some(at) if at.column == current => {
                        // Take the hovered ticket's slot, shifting it toward the vacated one
                        let Some(from) = state.placement_of(ticket) else {
                            return false;
                        };
                        return state
                            .reorder_ticket_within_column(current, from.index, at.index)
                            .is_ok();
                    }
                    Some(at) => (at.column, Some(over)),
                    None => return false,
                },
                None => match hit.column {
                    Some(column) if column != current => (column, None),
                    _ => return false,
                },
            };

            match state.move_ticket(ticket, current, target, before) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Ignoring stale hit-test: {}", e);
                    false
                }
            }
        }
        DragSubject::Column(column) => {
            let target = hit
                .ticket
                .and_then(|t| state.column_of(t))
                .or(hit.column);
            let (Some(from), Some(to)) = (
                state.column_index(column),
                target.and_then(|c| state.column_index(c)),
            ) else {
                return false;
            };
            if from == to {
                return false;
            }
            state.reorder_columns(from, to).is_ok()
        }
    }
}
