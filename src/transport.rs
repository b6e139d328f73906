//! WebSocket session to the agent.
//!
//! Owns the connection lifecycle and nothing else: inbound frames become
//! parsed JSON values, outbound values become text frames, and every state
//! transition is reported exactly once through [`Session::next_event`].

use std::{collections::VecDeque, fmt, time::Duration};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::{error::BridgeError, protocol::preview};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Opened,
    /// An inbound payload, or the reason it could not be parsed.
    Message(Result<Value, BridgeError>),
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

pub struct Session {
    state: SessionState,
    endpoint: Option<String>,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
    queued: VecDeque<SessionEvent>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            endpoint: None,
            writer: None,
            reader: None,
            queued: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub async fn open(
        &mut self,
        endpoint: &str,
        connect_timeout: Duration,
    ) -> Result<(), BridgeError> {
        if self.state != SessionState::Connecting {
            return Err(BridgeError::Connection(format!(
                "session is {}, cannot open again",
                self.state
            )));
        }
        self.endpoint = Some(endpoint.to_string());
        tracing::info!(endpoint = %endpoint, "connecting to agent");

        let connected = match timeout(connect_timeout, connect_async(endpoint)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(error)) => Err(format!("failed to connect to {endpoint}: {error}")),
            Err(_) => Err(format!(
                "timed out after {}ms connecting to {endpoint}",
                connect_timeout.as_millis()
            )),
        };

        match connected {
            Ok(ws) => {
                let (writer, reader) = ws.split();
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.transition(SessionState::Open, SessionEvent::Opened);
                tracing::info!(endpoint = %endpoint, "agent connection open");
                Ok(())
            }
            Err(message) => {
                tracing::error!(endpoint = %endpoint, error = %message, "agent connection failed");
                self.transition(SessionState::Failed, SessionEvent::Failed(message.clone()));
                Err(BridgeError::Connection(message))
            }
        }
    }

    pub async fn send(&mut self, message: &Value) -> Result<(), BridgeError> {
        if self.state != SessionState::Open {
            return Err(BridgeError::Connection(format!(
                "cannot send while session is {}",
                self.state
            )));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(BridgeError::Connection("session has no writer".to_string()));
        };

        let text = serde_json::to_string(message)
            .map_err(|error| BridgeError::Protocol(format!("failed to encode message: {error}")))?;

        if let Err(error) = writer.send(Message::Text(text.into())).await {
            let message = format!("send failed: {error}");
            tracing::error!(error = %error, "agent connection lost while sending");
            self.fail(message.clone());
            return Err(BridgeError::Connection(message));
        }

        Ok(())
    }

    /// Next lifecycle event or inbound message. Returns `None` once the
    /// session has ended and its final event has been delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            if self.state != SessionState::Open {
                return None;
            }
            let reader = self.reader.as_mut()?;

            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(SessionEvent::Message(parse_payload(text.as_str())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let parsed = match std::str::from_utf8(&bytes) {
                        Ok(text) => parse_payload(text),
                        Err(_) => Err(BridgeError::Protocol(
                            "binary frame is not valid UTF-8".to_string(),
                        )),
                    };
                    return Some(SessionEvent::Message(parsed));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => {
                            (Some(u16::from(frame.code)), frame.reason.as_str().to_string())
                        }
                        None => (None, String::new()),
                    };
                    tracing::info!(code = ?code, reason = %reason, "agent closed the connection");
                    // Pushes out the close reply tungstenite queued on read.
                    if let Some(writer) = self.writer.as_mut() {
                        let _ = writer.flush().await;
                    }
                    self.release();
                    self.transition(SessionState::Closed, SessionEvent::Closed { code, reason });
                }
                // tungstenite answers pings itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(error)) => {
                    tracing::error!(error = %error, "agent connection error");
                    self.fail(error.to_string());
                }
                None => {
                    tracing::info!("agent connection ended");
                    self.release();
                    self.transition(
                        SessionState::Closed,
                        SessionEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        },
                    );
                }
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), BridgeError> {
        if self.state != SessionState::Open {
            return Ok(());
        }
        let result = match self.writer.as_mut() {
            Some(writer) => {
                let frame = CloseFrame {
                    code: 1000.into(),
                    reason: "bridge closing".into(),
                };
                writer.send(Message::Close(Some(frame))).await.map_err(BridgeError::from)
            }
            None => Ok(()),
        };
        self.release();
        self.transition(
            SessionState::Closed,
            SessionEvent::Closed {
                code: Some(1000),
                reason: "bridge closing".to_string(),
            },
        );
        result
    }

    fn fail(&mut self, message: String) {
        self.release();
        self.transition(SessionState::Failed, SessionEvent::Failed(message));
    }

    fn release(&mut self) {
        self.writer = None;
        self.reader = None;
    }

    /// Applies a lifecycle transition and queues its event. Transitions out of
    /// a terminal state are ignored, so each event is emitted at most once.
    fn transition(&mut self, next: SessionState, event: SessionEvent) -> bool {
        let allowed = matches!(
            (self.state, next),
            (SessionState::Connecting, SessionState::Open)
                | (SessionState::Connecting, SessionState::Failed)
                | (SessionState::Open, SessionState::Closed)
                | (SessionState::Open, SessionState::Failed)
        );
        if !allowed {
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "session state changed");
        self.state = next;
        self.queued.push_back(event);
        true
    }
}

fn parse_payload(text: &str) -> Result<Value, BridgeError> {
    serde_json::from_str::<Value>(text).map_err(|error| {
        BridgeError::Protocol(format!(
            "invalid JSON from agent: {error} | payload={}",
            preview(text)
        ))
    })
}
