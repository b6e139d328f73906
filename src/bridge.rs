use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::{
    context::BridgeContext,
    dispatcher::{Dispatched, Dispatcher},
    error::BridgeError,
    tracker::{OutboundTracker, PendingPrompt, ResolvedPrompt},
    transport::{Session, SessionEvent, SessionState},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Notifications for the local status surface. Nothing here is ever sent
/// to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Status(SessionState),
    ConnectionError(String),
    PromptSent { id: String },
    PromptResolved(ResolvedPrompt),
    PromptExpired(PendingPrompt),
    ProtocolError(String),
}

enum Command {
    Prompt {
        text: String,
        reply: oneshot::Sender<Result<String, BridgeError>>,
    },
    Discard {
        id: String,
        reply: oneshot::Sender<Option<PendingPrompt>>,
    },
    Close,
}

/// Cloneable entry point for the embedding application.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl BridgeHandle {
    /// Sends a prompt to the agent and returns its correlation id. The agent's
    /// answer arrives later as [`BridgeEvent::PromptResolved`].
    pub async fn send_prompt(&self, text: impl Into<String>) -> Result<String, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Prompt {
                text: text.into(),
                reply,
            })
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)?
    }

    pub async fn discard(
        &self,
        id: impl Into<String>,
    ) -> Result<Option<PendingPrompt>, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Discard {
                id: id.into(),
                reply,
            })
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)
    }

    pub fn close(&self) -> Result<(), BridgeError> {
        self.commands
            .send(Command::Close)
            .map_err(|_| BridgeError::Stopped)
    }
}

/// Single-task event loop tying the session, dispatcher and tracker together.
///
/// One inbound message is dispatched and answered before the next one is
/// read, and local commands are handled between messages, so the adapter is
/// never mutated concurrently and the tracker needs no lock.
pub struct Bridge {
    session: Session,
    dispatcher: Dispatcher,
    tracker: OutboundTracker,
    prompt_timeout: Option<Duration>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl Bridge {
    pub async fn connect(
        ctx: BridgeContext,
    ) -> Result<(Self, BridgeHandle, mpsc::UnboundedReceiver<BridgeEvent>), BridgeError> {
        let config = ctx.config();
        let mut session = Session::new();
        session
            .open(&config.agent_url, config.connect_timeout)
            .await?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let bridge = Self {
            session,
            dispatcher: Dispatcher::new(&ctx),
            tracker: OutboundTracker::new(&ctx),
            prompt_timeout: config.prompt_timeout,
            commands: commands_rx,
            events: events_tx,
        };
        let handle = BridgeHandle {
            commands: commands_tx,
        };

        Ok((bridge, handle, events_rx))
    }

    pub async fn run(mut self) -> Result<(), BridgeError> {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut accepting_commands = true;

        loop {
            tokio::select! {
                event = self.session.next_event() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle_session_event(event).await;
                }
                command = self.commands.recv(), if accepting_commands => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::debug!("all bridge handles dropped");
                            accepting_commands = false;
                        }
                    }
                }
                _ = sweep.tick(), if self.prompt_timeout.is_some() => {
                    self.expire_stale_prompts();
                }
            }
        }

        let abandoned = self.tracker.pending_count();
        if abandoned > 0 {
            tracing::warn!(pending = abandoned, "session ended with unanswered prompts");
        }
        tracing::info!(state = %self.session.state(), "bridge stopped");
        Ok(())
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => self.emit(BridgeEvent::Status(SessionState::Open)),
            SessionEvent::Message(Ok(message)) => {
                match self.dispatcher.dispatch(message, &mut self.tracker) {
                    Dispatched::Reply(reply) => {
                        // A lost connection is reported by the session's own
                        // Failed event.
                        if let Err(error) = self.session.send(&reply).await {
                            tracing::error!(error = %error, "failed to send reply");
                        }
                    }
                    Dispatched::Resolved(resolved) => {
                        self.emit(BridgeEvent::PromptResolved(resolved));
                    }
                    Dispatched::Nothing => {}
                }
            }
            SessionEvent::Message(Err(error)) => {
                tracing::warn!(error = %error, "dropping inbound payload");
                self.emit(BridgeEvent::ProtocolError(error.to_string()));
            }
            SessionEvent::Closed { code, reason } => {
                tracing::info!(code = ?code, reason = %reason, "session closed");
                self.emit(BridgeEvent::Status(SessionState::Closed));
            }
            SessionEvent::Failed(message) => {
                self.emit(BridgeEvent::ConnectionError(message));
                self.emit(BridgeEvent::Status(SessionState::Failed));
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Prompt { text, reply } => {
                let result = self.tracker.send(&mut self.session, text).await;
                match &result {
                    Ok(id) => self.emit(BridgeEvent::PromptSent { id: id.clone() }),
                    Err(error) => tracing::error!(error = %error, "failed to send prompt"),
                }
                let _ = reply.send(result);
            }
            Command::Discard { id, reply } => {
                let discarded = self.tracker.discard(&id);
                if discarded.is_some() {
                    tracing::debug!(id = %id, "prompt discarded");
                }
                let _ = reply.send(discarded);
            }
            Command::Close => {
                if let Err(error) = self.session.close().await {
                    tracing::warn!(error = %error, "close frame not delivered");
                }
            }
        }
    }

    fn expire_stale_prompts(&mut self) {
        let Some(max_age) = self.prompt_timeout else {
            return;
        };
        for expired in self.tracker.discard_older_than(max_age, Utc::now()) {
            tracing::warn!(
                id = %expired.id,
                timeout_ms = max_age.as_millis() as u64,
                "prompt expired without an answer"
            );
            self.emit(BridgeEvent::PromptExpired(expired));
        }
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }
}
