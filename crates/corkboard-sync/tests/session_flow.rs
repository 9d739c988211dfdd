//! End-to-end tests for BoardSession against a wiremock backend.

use std::time::Duration;

use corkboard_services::{BoardClient, BoardId, ColumnId, CreateTicketRequest, Priority, TicketId};
use corkboard_sync::{
    BoardSession, ChannelEvent, DragOutcome, DragSubject, HitTest, Point, PushEvent,
    SessionEvent, SyncMessage,
};
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOARD: &str = "9a1f6a8e-4a0c-4c1e-8d51-3b0b5f7f2a10";
const TODO: &str = "2f5c1d62-0c7e-4b57-a0c3-8b3b5d0a1e01";
const DOING: &str = "2f5c1d62-0c7e-4b57-a0c3-8b3b5d0a1e02";
const DONE: &str = "2f5c1d62-0c7e-4b57-a0c3-8b3b5d0a1e03";
const T1: &str = "7d4e2a10-5b6c-4f3e-9a8b-1c2d3e4f5a60";

fn board_id() -> BoardId {
    BoardId(BOARD.parse().unwrap())
}

fn col(id: &str) -> ColumnId {
    ColumnId(id.parse().unwrap())
}

fn t1() -> TicketId {
    TicketId(T1.parse().unwrap())
}

fn ticket_json(id: &str, column: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": "Write release notes",
        "priority": "medium",
        "board_id": BOARD,
        "column_id": column,
        "created_at": "2026-03-02T12:00:00",
        "updated_at": "2026-03-02T12:00:00"
    })
}

/// Board with T1 in `t1_column`
fn board_json(t1_column: &str, updated_at: &str) -> serde_json::Value {
    let column = |id: &str, name: &str, order: i64| {
        let tickets = if id == t1_column {
            vec![ticket_json(T1, id)]
        } else {
            vec![]
        };
        serde_json::json!({
            "id": id, "board_id": BOARD, "name": name, "order": order, "tickets": tickets
        })
    };
    serde_json::json!({
        "id": BOARD,
        "name": "Release",
        "owner_id": "0b0e8f3e-6a2d-4c1f-9e8a-7f6d5c4b3a21",
        "created_at": "2026-03-01T08:00:00",
        "updated_at": updated_at,
        "columns": [column(TODO, "Todo", 0), column(DOING, "Doing", 1), column(DONE, "Done", 2)]
    })
}

async fn mount_board(server: &MockServer, t1_column: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/boards/{}", BOARD)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(board_json(t1_column, "2026-03-02T12:00:00")),
        )
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Handle inbox messages until `done` holds.
async fn pump_until(session: &mut BoardSession, done: impl Fn(&BoardSession) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(session) {
            session.step().await;
        }
    })
    .await
    .expect("session did not settle in time");
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn loaded_session(
    server: &MockServer,
) -> (BoardSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = BoardClient::new(&server.uri(), Some("secret".into())).unwrap();
    let mut session = BoardSession::new(client, board_id(), 3.0, None, tx);
    pump_until(&mut session, |s| s.board().is_some()).await;
    (session, rx)
}

fn drag_t1_to(session: &mut BoardSession, column: &str) -> DragOutcome {
    let hit = Some(HitTest::column(col(column)));
    session.pointer_down(DragSubject::Ticket(t1()), Point::new(0.0, 0.0));
    session.pointer_move(Point::new(40.0, 5.0), hit);
    session.pointer_up(hit)
}

#[tokio::test]
async fn test_initial_load() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    let (session, mut events) = loaded_session(&server).await;

    let board = session.board().unwrap();
    assert_eq!(board.name(), "Release");
    assert_eq!(board.columns().len(), 3);
    assert_eq!(board.column_of(t1()), Some(col(TODO)));

    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::BoardChanged));
}

#[tokio::test]
async fn test_drag_to_doing_issues_exactly_one_move() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    Mock::given(method("PUT"))
        .and(path(format!("/tickets/{}", T1)))
        .and(body_json(serde_json::json!({ "status_column_id": DOING })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ticket_json(T1, DOING)))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, _events) = loaded_session(&server).await;

    let outcome = drag_t1_to(&mut session, DOING);
    assert!(matches!(outcome, DragOutcome::MoveTicket { .. }));

    let board = session.board().unwrap();
    assert_eq!(board.column_of(t1()), Some(col(DOING)));
    assert!(!board.column(col(TODO)).unwrap().ticket_ids().contains(&t1()));

    pump_until(&mut session, |s| !s.reconciler().has_pending()).await;
    assert_eq!(session.board().unwrap().column_of(t1()), Some(col(DOING)));
}

#[tokio::test]
async fn test_failed_move_reverts_and_reports_once() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    Mock::given(method("PUT"))
        .and(path(format!("/tickets/{}", T1)))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, mut events) = loaded_session(&server).await;
    drain(&mut events);

    drag_t1_to(&mut session, DOING);
    pump_until(&mut session, |s| !s.reconciler().has_pending()).await;

    let board = session.board().unwrap();
    assert_eq!(board.column_of(t1()), Some(col(TODO)));
    assert!(board.is_consistent());

    let errors = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn test_push_echo_during_move_defers_refetch() {
    let server = MockServer::start().await;
    // First load shows T1 in Todo, later loads reflect the confirmed move
    mount_board(&server, TODO, 1).await;
    mount_board(&server, DOING, 1).await;

    Mock::given(method("PUT"))
        .and(path(format!("/tickets/{}", T1)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ticket_json(T1, DOING))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, _events) = loaded_session(&server).await;
    drag_t1_to(&mut session, DOING);

    let echo = PushEvent::TicketUpdated {
        board_id: Some(board_id()),
        ticket_id: Some(t1()),
    };
    session.handle(SyncMessage::Channel(ChannelEvent::Event(echo.clone())));
    session.handle(SyncMessage::Channel(ChannelEvent::Event(echo)));

    assert!(!session.reconciler().fetch_in_flight());
    assert_eq!(session.board().unwrap().column_of(t1()), Some(col(DOING)));

    pump_until(&mut session, |s| !s.reconciler().has_pending()).await;
    assert!(session.reconciler().fetch_in_flight());

    pump_until(&mut session, |s| !s.reconciler().fetch_in_flight()).await;
    assert_eq!(session.board().unwrap().column_of(t1()), Some(col(DOING)));

    let requests = server.received_requests().await.unwrap();
    let gets = requests.iter().filter(|r| r.method.as_str() == "GET").count();
    assert_eq!(gets, 2);
}

#[tokio::test]
async fn test_cancel_restores_board() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    let (mut session, _events) = loaded_session(&server).await;
    let before = session.board().unwrap().clone();

    session.pointer_down(DragSubject::Ticket(t1()), Point::new(0.0, 0.0));
    session.pointer_move(Point::new(40.0, 0.0), Some(HitTest::column(col(DONE))));
    assert_ne!(session.board().unwrap(), &before);

    session.cancel_drag();
    assert_eq!(session.board().unwrap(), &before);
    assert!(server.received_requests().await.unwrap().len() == 1);
}

#[tokio::test]
async fn test_comment_event_is_forwarded() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    let (mut session, mut events) = loaded_session(&server).await;
    drain(&mut events);

    session.handle(SyncMessage::Channel(ChannelEvent::Event(
        PushEvent::CommentCreated { ticket_id: t1() },
    )));

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::TicketInvalidated(t1())]
    );
}

#[tokio::test]
async fn test_board_deleted_closes_session() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    let (mut session, mut events) = loaded_session(&server).await;
    drain(&mut events);

    session.handle(SyncMessage::Channel(ChannelEvent::Event(
        PushEvent::BoardDeleted {
            board_id: Some(board_id()),
        },
    )));

    assert!(session.board().is_none());
    assert!(session.is_closed());
    assert!(drain(&mut events).contains(&SessionEvent::BoardClosed));
}

#[tokio::test]
async fn test_create_ticket_appends_to_column() {
    let server = MockServer::start().await;
    mount_board(&server, TODO, 1).await;

    let created = "7d4e2a10-5b6c-4f3e-9a8b-1c2d3e4f5a61";
    Mock::given(method("POST"))
        .and(path("/tickets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ticket_json(created, DONE)))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, _events) = loaded_session(&server).await;
    session.create_ticket(CreateTicketRequest {
        title: "Write release notes".into(),
        description: None,
        priority: Priority::Medium,
        board_id: BoardId::new_v4(),
        status_column_id: col(DONE),
        assignee_id: None,
    });

    let id = TicketId(created.parse().unwrap());
    pump_until(&mut session, |s| {
        s.board().is_some_and(|b| b.ticket(id).is_some())
    })
    .await;

    let board = session.board().unwrap();
    assert_eq!(board.column(col(DONE)).unwrap().ticket_ids(), &[id]);
    assert!(board.is_consistent());
}
