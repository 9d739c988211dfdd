//! Local board state.
//!
//! Tickets are stored by identity; columns hold ordered lists of ticket ids.
//! Every mutation validates its arguments before touching anything, so a call
//! either applies fully or returns an error with the state unchanged.

use std::collections::{HashMap, HashSet};

use corkboard_services::{Board, BoardId, ColumnId, Revision, Ticket, TicketId};

use crate::error::SyncError;

/// A column with its ordered ticket references
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnState {
    pub id: ColumnId,
    pub name: String,
    pub order: i64,
    ticket_ids: Vec<TicketId>,
}

impl ColumnState {
    pub fn ticket_ids(&self) -> &[TicketId] {
        &self.ticket_ids
    }

    fn position(&self, ticket: TicketId) -> Option<usize> {
        self.ticket_ids.iter().position(|t| *t == ticket)
    }
}

/// Where a ticket sits: its column and its index within that column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub column: ColumnId,
    pub index: usize,
}

/// The client's working copy of one board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    board_id: BoardId,
    name: String,
    revision: Revision,
    columns: Vec<ColumnState>,
    tickets: HashMap<TicketId, Ticket>,
}

impl BoardState {
    pub fn from_snapshot(board: Board) -> Self {
        let mut state = Self {
            board_id: board.id,
            name: String::new(),
            revision: board.revision(),
            columns: Vec::new(),
            tickets: HashMap::new(),
        };
        state.replace_snapshot(board);
        state
    }

    /// Replace everything with an authoritative snapshot.
    ///
    /// Columns are ordered by `(order, id)`; colliding order values are bumped
    /// so siblings stay distinct. A ticket's membership follows the column that
    /// lists it.
    pub fn replace_snapshot(&mut self, board: Board) {
        let revision = board.revision();
        let mut columns = board.columns;
        columns.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        let mut tickets = HashMap::new();
        let mut states = Vec::with_capacity(columns.len());
        let mut last_order: Option<i64> = None;
        let mut exhausted = false;

        for column in columns {
            let order = match last_order {
                Some(prev) if column.order <= prev => match prev.checked_add(1) {
                    Some(next) => {
                        tracing::debug!(
                            "Column {} shares order {} with a sibling, bumping to {}",
                            column.id,
                            column.order,
                            next
                        );
                        next
                    }
                    None => {
                        exhausted = true;
                        prev
                    }
                },
                _ => column.order,
            };
            last_order = Some(order);

            let mut ticket_ids = Vec::with_capacity(column.tickets.len());
            for mut ticket in column.tickets {
                if tickets.contains_key(&ticket.id) {
                    tracing::warn!(
                        "Ticket {} listed in more than one column, keeping first",
                        ticket.id
                    );
                    continue;
                }
                ticket.column_id = column.id;
                ticket_ids.push(ticket.id);
                tickets.insert(ticket.id, ticket);
            }

            states.push(ColumnState {
                id: column.id,
                name: column.name,
                order,
                ticket_ids,
            });
        }

        if exhausted {
            tracing::warn!("Column orders overflow, renumbering from 0");
            for (order, column) in (0_i64..).zip(states.iter_mut()) {
                column.order = order;
            }
        }

        self.board_id = board.id;
        self.name = board.name;
        self.revision = revision;
        self.columns = states;
        self.tickets = tickets;
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Columns in display order
    pub fn columns(&self) -> &[ColumnState] {
        &self.columns
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnState> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_index(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn ticket(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// Tickets of a column in display order
    pub fn tickets_in(&self, column: ColumnId) -> impl Iterator<Item = &Ticket> + '_ {
        self.column(column)
            .into_iter()
            .flat_map(|c| c.ticket_ids.iter())
            .filter_map(|id| self.tickets.get(id))
    }

    pub fn column_of(&self, ticket: TicketId) -> Option<ColumnId> {
        self.tickets.get(&ticket).map(|t| t.column_id)
    }

    pub fn placement_of(&self, ticket: TicketId) -> Option<Placement> {
        let column = self.column_of(ticket)?;
        let index = self.column(column)?.position(ticket)?;
        Some(Placement { column, index })
    }

    /// Move a ticket between (or within) columns.
    ///
    /// Inserts before `before` when given, otherwise appends. The ticket's
    /// `column_id` changes together with the structural move.
    pub fn move_ticket(
        &mut self,
        ticket: TicketId,
        from: ColumnId,
        to: ColumnId,
        before: Option<TicketId>,
    ) -> Result<(), SyncError> {
        if !self.tickets.contains_key(&ticket) {
            return Err(SyncError::UnknownTicket(ticket));
        }
        let from_idx = self.column_index(from).ok_or(SyncError::UnknownColumn(from))?;
        let to_idx = self.column_index(to).ok_or(SyncError::UnknownColumn(to))?;
        let src_pos = self.columns[from_idx]
            .position(ticket)
            .ok_or(SyncError::TicketNotInColumn {
                ticket,
                column: from,
            })?;

        if let Some(anchor) = before {
            if self.columns[to_idx].position(anchor).is_none() {
                return Err(SyncError::TicketNotInColumn {
                    ticket: anchor,
                    column: to,
                });
            }
        }
        if before == Some(ticket) {
            return Ok(());
        }

        self.columns[from_idx].ticket_ids.remove(src_pos);
        let dest = &mut self.columns[to_idx].ticket_ids;
        let at = before
            .and_then(|anchor| dest.iter().position(|t| *t == anchor))
            .unwrap_or(dest.len());
        dest.insert(at, ticket);

        if let Some(t) = self.tickets.get_mut(&ticket) {
            t.column_id = to;
        }
        Ok(())
    }

    /// Put a ticket at an exact placement. The index is clamped to the column length.
    pub fn place_ticket(&mut self, ticket: TicketId, at: Placement) -> Result<(), SyncError> {
        let from = self.column_of(ticket).ok_or(SyncError::UnknownTicket(ticket))?;
        let from_idx = self.column_index(from).ok_or(SyncError::UnknownColumn(from))?;
        let to_idx = self
            .column_index(at.column)
            .ok_or(SyncError::UnknownColumn(at.column))?;

        if let Some(pos) = self.columns[from_idx].position(ticket) {
            self.columns[from_idx].ticket_ids.remove(pos);
        }
        let dest = &mut self.columns[to_idx].ticket_ids;
        let index = at.index.min(dest.len());
        dest.insert(index, ticket);

        if let Some(t) = self.tickets.get_mut(&ticket) {
            t.column_id = at.column;
        }
        Ok(())
    }

    /// Move the column at `from` to position `to`.
    ///
    /// The existing order values are redistributed over the new sequence, so
    /// they stay pairwise distinct and ascending.
    pub fn reorder_columns(&mut self, from: usize, to: usize) -> Result<(), SyncError> {
        let len = self.columns.len();
        for index in [from, to] {
            if index >= len {
                return Err(SyncError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }

        let mut orders: Vec<i64> = self.columns.iter().map(|c| c.order).collect();
        orders.sort_unstable();

        let column = self.columns.remove(from);
        self.columns.insert(to, column);
        for (column, order) in self.columns.iter_mut().zip(orders) {
            column.order = order;
        }
        Ok(())
    }

    pub fn reorder_ticket_within_column(
        &mut self,
        column: ColumnId,
        from: usize,
        to: usize,
    ) -> Result<(), SyncError> {
        let idx = self
            .column_index(column)
            .ok_or(SyncError::UnknownColumn(column))?;
        let ids = &mut self.columns[idx].ticket_ids;
        let len = ids.len();
        for index in [from, to] {
            if index >= len {
                return Err(SyncError::IndexOutOfRange { index, len });
            }
        }

        let ticket = ids.remove(from);
        ids.insert(to, ticket);
        Ok(())
    }

    /// Add a ticket returned by the remote store, appending it to its column.
    ///
    /// A ticket that is already present gets its fields refreshed and is moved
    /// if its column changed.
    pub fn insert_ticket(&mut self, ticket: Ticket) -> Result<(), SyncError> {
        let to_idx = self
            .column_index(ticket.column_id)
            .ok_or(SyncError::UnknownColumn(ticket.column_id))?;

        match self.column_of(ticket.id) {
            Some(current) if current == ticket.column_id => {}
            Some(current) => {
                if let Some(from_idx) = self.column_index(current) {
                    self.columns[from_idx].ticket_ids.retain(|t| *t != ticket.id);
                }
                self.columns[to_idx].ticket_ids.push(ticket.id);
            }
            None => self.columns[to_idx].ticket_ids.push(ticket.id),
        }

        self.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    /// Tickets whose column membership `board` disagrees with, including
    /// tickets that only one side knows about.
    pub fn membership_diff(&self, board: &Board) -> HashSet<TicketId> {
        let mut seen = HashSet::new();
        let mut changed = HashSet::new();

        for column in &board.columns {
            for ticket in &column.tickets {
                seen.insert(ticket.id);
                if self.column_of(ticket.id) != Some(column.id) {
                    changed.insert(ticket.id);
                }
            }
        }
        changed.extend(self.tickets.keys().filter(|id| !seen.contains(*id)));
        changed
    }

    /// Check the structural invariants: every ticket is listed exactly once,
    /// by the column its `column_id` names, and column orders strictly ascend.
    pub fn is_consistent(&self) -> bool {
        let mut listed = HashSet::new();
        for column in &self.columns {
            for id in &column.ticket_ids {
                if !listed.insert(*id) {
                    return false;
                }
                match self.tickets.get(id) {
                    Some(t) if t.column_id == column.id => {}
                    _ => return false,
                }
            }
        }
        listed.len() == self.tickets.len()
            && self.columns.windows(2).all(|w| w[0].order < w[1].order)
    }
}
