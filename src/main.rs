use anyhow::{Context, Result};
use corkboard_core::Config;
use corkboard_services::BoardId;
use corkboard_sync::{BoardSession, SessionEvent};
use tokio::sync::mpsc;

fn print_board(session: &BoardSession) {
    let Some(board) = session.board() else {
        return;
    };
    println!("{} (revision {})", board.name(), board.revision());
    for column in board.columns() {
        println!("  {:<20} {} ticket(s)", column.name, column.ticket_ids().len());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    corkboard_core::init()?;

    let board_arg = std::env::args()
        .nth(1)
        .context("usage: corkboard <board-id>")?;
    let board_id = BoardId(
        uuid::Uuid::parse_str(&board_arg).with_context(|| format!("Invalid board id {}", board_arg))?,
    );

    let (config, _) = Config::load_validated()?;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = BoardSession::open(&config, board_id, events_tx)?;

    tracing::info!("Watching board {}", board_id);

    loop {
        tokio::select! {
            Some(msg) = session.recv() => session.handle(msg),
            Some(event) = events.recv() => match event {
                SessionEvent::BoardChanged => print_board(&session),
                SessionEvent::Error { message, .. } => eprintln!("error: {}", message),
                SessionEvent::AuthExpired => {
                    eprintln!("Session expired, sign in again");
                    break;
                }
                SessionEvent::BoardClosed => {
                    println!("Board was deleted");
                    break;
                }
                SessionEvent::TicketInvalidated(ticket) => {
                    tracing::info!("Ticket {} changed remotely", ticket);
                }
                SessionEvent::Channel(status) => tracing::debug!("Live updates: {:?}", status),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    tracing::info!("Corkboard stopped");
    Ok(())
}
