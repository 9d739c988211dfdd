//! Push channel: one long-lived websocket per open board view.
//!
//! The connection runs in its own task. Frames are decoded into
//! [`PushEvent`]s and handed, in arrival order, to a single subscriber.
//! Abnormal closes schedule one reconnect after a fixed delay; a normal
//! closure (1000) or a teardown does not.

use std::sync::Arc;
use std::time::Duration;

use corkboard_services::BoardId;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PushError;
use crate::events::PushEvent;

/// Close code for a deliberate shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code the backend uses when it rejects the credential
pub const POLICY_VIOLATION: u16 = 1008;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state as seen by the view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No credential, never connected
    Disabled,
    Connecting,
    Open,
    Closed {
        code: Option<u16>,
        reconnecting: bool,
    },
    /// Torn down by the owner
    Stopped,
}

/// Everything the channel reports to its subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Event(PushEvent),
}

#[derive(Debug)]
enum Control {
    ReconnectNow,
}

/// Fixed-delay reconnect bookkeeping.
#[derive(Debug)]
pub(crate) struct Reconnect {
    delay: Duration,
    scheduled: bool,
    stopped: bool,
}

impl Reconnect {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: false,
            stopped: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Connection established; any pending attempt is void.
    pub(crate) fn opened(&mut self) {
        self.scheduled = false;
    }

    /// Connection lost. Returns the delay if a reconnect should be scheduled.
    pub(crate) fn closed(&mut self, code: Option<u16>) -> Option<Duration> {
        if self.stopped || code == Some(NORMAL_CLOSURE) || self.scheduled {
            return None;
        }
        self.scheduled = true;
        Some(self.delay)
    }

    pub(crate) fn fired(&mut self) {
        self.scheduled = false;
    }

    /// Manual reconnect requested. Returns true if it pre-empted a timer.
    pub(crate) fn manual(&mut self) -> bool {
        std::mem::replace(&mut self.scheduled, false)
    }

    pub(crate) fn stop(&mut self) {
        self.stopped = true;
        self.scheduled = false;
    }
}

/// Handle to a running push channel. Dropping it tears the connection down.
#[derive(Debug)]
pub struct PushChannel {
    board_id: BoardId,
    status: Arc<Mutex<ChannelStatus>>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// `{base}/ws/{board_id}?token={token}`
    pub fn endpoint(base: &Url, board_id: BoardId, token: &str) -> Result<Url, PushError> {
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(PushError::InvalidUrl(format!(
                "unsupported scheme {}",
                base.scheme()
            )));
        }

        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| PushError::InvalidUrl(base.to_string()))?
            .pop_if_empty()
            .push("ws")
            .push(&board_id.to_string());
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }

    /// Start the channel for `board_id`.
    ///
    /// Fails with [`PushError::MissingCredential`] when there is no usable
    /// token; the caller should then treat the channel as closed.
    pub fn open<F>(
        base: &Url,
        board_id: BoardId,
        token: Option<&str>,
        reconnect_delay: Duration,
        sink: F,
    ) -> Result<Self, PushError>
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(PushError::MissingCredential)?;
        let url = Self::endpoint(base, board_id, token)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PushError::NoRuntime)?;

        let status = Arc::new(Mutex::new(ChannelStatus::Connecting));
        let (control, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = runtime.spawn(run(
            url,
            board_id,
            Reconnect::new(reconnect_delay),
            status.clone(),
            control_rx,
            cancel.clone(),
            sink,
        ));

        Ok(Self {
            board_id,
            status,
            control,
            cancel,
            task: Some(task),
        })
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.lock()
    }

    /// Connect now, cancelling any pending reconnect timer.
    pub fn reconnect_now(&self) {
        if self.control.send(Control::ReconnectNow).is_err() {
            tracing::debug!("Push channel task already finished");
        }
    }

    /// Close with the normal closure code and wait for the task to end.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Push channel task failed: {}", e);
            }
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn close_normally(ws: &mut WsStream) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "view closed".into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        tracing::debug!("Error sending close frame: {}", e);
    }
}

async fn run<F>(
    url: Url,
    board_id: BoardId,
    mut reconnect: Reconnect,
    status: Arc<Mutex<ChannelStatus>>,
    mut control: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
    sink: F,
) where
    F: Fn(ChannelEvent) + Send + Sync + 'static,
{
    let report = |next: ChannelStatus| {
        *status.lock() = next;
        sink(ChannelEvent::Status(next));
    };

    'outer: loop {
        report(ChannelStatus::Connecting);
        tracing::debug!(board = %board_id, "Push channel connecting");

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let code = match connected {
            Ok((mut ws, _)) => {
                reconnect.opened();
                report(ChannelStatus::Open);
                tracing::info!(board = %board_id, "Push channel open");

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            close_normally(&mut ws).await;
                            break 'outer;
                        }
                        ctl = control.recv() => match ctl {
                            Some(Control::ReconnectNow) => {
                                tracing::debug!("Push channel already open");
                            }
                            None => {
                                close_normally(&mut ws).await;
                                break 'outer;
                            }
                        },
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => match PushEvent::parse(&text) {
                                Ok(event) => sink(ChannelEvent::Event(event)),
                                Err(e) => {
                                    tracing::warn!(board = %board_id, "Dropping malformed push payload: {}", e);
                                }
                            },
                            Some(Ok(Message::Close(frame))) => {
                                break frame.map(|f| u16::from(f.code));
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(board = %board_id, "Push channel error: {}", e);
                                break None;
                            }
                            None => break None,
                        }
                    }
                }
            }
            Err(WsError::Http(response)) => {
                let http = response.status().as_u16();
                tracing::warn!(board = %board_id, "Push channel handshake rejected ({})", http);
                if http == 401 || http == 403 {
                    Some(POLICY_VIOLATION)
                } else {
                    None
                }
            }
            Err(e) => {
                tracing::warn!(board = %board_id, "Push channel connect failed: {}", e);
                None
            }
        };

        match reconnect.closed(code) {
            Some(delay) => {
                report(ChannelStatus::Closed {
                    code,
                    reconnecting: true,
                });
                tracing::info!(
                    board = %board_id,
                    "Push channel closed ({:?}), reconnecting in {:?}",
                    code,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => reconnect.fired(),
                    ctl = control.recv() => match ctl {
                        Some(Control::ReconnectNow) => {
                            reconnect.manual();
                            tracing::debug!("Reconnect timer cancelled by manual reconnect");
                        }
                        None => break,
                    },
                }
            }
            None => {
                report(ChannelStatus::Closed {
                    code,
                    reconnecting: false,
                });
                tracing::info!(board = %board_id, "Push channel closed normally");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    ctl = control.recv() => match ctl {
                        Some(Control::ReconnectNow) => {
                            reconnect.manual();
                        }
                        None => break,
                    },
                }
            }
        }
    }

    reconnect.stop();
    report(ChannelStatus::Stopped);
    tracing::debug!(board = %board_id, "Push channel stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_abnormal_close_schedules_exactly_one_reconnect() {
        let mut reconnect = Reconnect::new(Duration::from_millis(3000));

        assert_eq!(reconnect.closed(Some(1006)), Some(Duration::from_millis(3000)));
        assert!(reconnect.is_scheduled());
        assert_eq!(reconnect.closed(None), None);

        reconnect.fired();
        assert!(!reconnect.is_scheduled());
    }

    #[test]
    fn test_normal_closure_does_not_reconnect() {
        let mut reconnect = Reconnect::new(Duration::from_millis(3000));
        assert_eq!(reconnect.closed(Some(NORMAL_CLOSURE)), None);
        assert!(!reconnect.is_scheduled());
    }

    #[test]
    fn test_policy_violation_is_abnormal() {
        let mut reconnect = Reconnect::new(Duration::from_millis(50));
        assert!(reconnect.closed(Some(POLICY_VIOLATION)).is_some());
    }

    #[test]
    fn test_open_and_manual_reconnect_clear_timer() {
        let mut reconnect = Reconnect::new(Duration::from_millis(3000));

        reconnect.closed(None);
        reconnect.opened();
        assert!(!reconnect.is_scheduled());

        reconnect.closed(None);
        assert!(reconnect.manual());
        assert!(!reconnect.manual());
    }

    #[test]
    fn test_stopped_never_reconnects() {
        let mut reconnect = Reconnect::new(Duration::from_millis(3000));
        reconnect.stop();
        assert_eq!(reconnect.closed(Some(1006)), None);
    }

    #[test]
    fn test_endpoint() {
        let base = Url::parse("ws://localhost:8000/api/v1").unwrap();
        let board = BoardId("9a1f6a8e-4a0c-4c1e-8d51-3b0b5f7f2a10".parse().unwrap());

        let url = PushChannel::endpoint(&base, board, "abc").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/v1/ws/9a1f6a8e-4a0c-4c1e-8d51-3b0b5f7f2a10?token=abc"
        );

        let trailing = Url::parse("wss://example.com/api/v1/").unwrap();
        let url = PushChannel::endpoint(&trailing, board, "abc").unwrap();
        assert_eq!(url.path(), "/api/v1/ws/9a1f6a8e-4a0c-4c1e-8d51-3b0b5f7f2a10");
    }

    #[test]
    fn test_endpoint_rejects_http() {
        let base = Url::parse("http://localhost:8000/api/v1").unwrap();
        assert!(matches!(
            PushChannel::endpoint(&base, BoardId::new_v4(), "abc"),
            Err(PushError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_no_credential_stays_closed() {
        let base = Url::parse("ws://127.0.0.1:9").unwrap();

        for token in [None, Some(""), Some("   ")] {
            let result =
                PushChannel::open(&base, BoardId::new_v4(), token, Duration::from_secs(3), |_| {});
            assert!(matches!(result, Err(PushError::MissingCredential)));
        }
    }
}
