use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    adapter::ResourceAdapter,
    context::BridgeContext,
    error::BridgeError,
    protocol::{AgentOutcome, OutboundPrompt},
    transport::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptState {
    Pending,
    Resolved,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPrompt {
    pub id: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub state: PromptState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPrompt {
    pub request: PendingPrompt,
    pub outcome: AgentOutcome,
    pub resolved_at: DateTime<Utc>,
}

/// Correlates prompts sent to the agent with the replies that come back.
///
/// Ids come from a counter that only ever moves forward, so an id is never
/// handed out twice while the tracker lives.
pub struct OutboundTracker {
    adapter: Arc<dyn ResourceAdapter>,
    next_id: u64,
    pending: HashMap<String, PendingPrompt>,
}

impl OutboundTracker {
    pub fn new(ctx: &BridgeContext) -> Self {
        Self {
            adapter: ctx.adapter().clone(),
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Records a new pending prompt and builds the message for the agent,
    /// including a fresh snapshot of the resource's fields.
    pub fn begin(&mut self, prompt: impl Into<String>) -> OutboundPrompt {
        let id = self.next_id.to_string();
        self.next_id += 1;

        let prompt = prompt.into();
        self.pending.insert(
            id.clone(),
            PendingPrompt {
                id: id.clone(),
                prompt: prompt.clone(),
                created_at: Utc::now(),
                state: PromptState::Pending,
            },
        );

        let location = self.adapter.location();
        OutboundPrompt {
            message: prompt,
            message_id: id,
            page_url: location.url,
            page_title: location.title,
            form_fields: self.adapter.describe(),
        }
    }

    /// Sends a prompt and returns its correlation id without waiting for the
    /// agent's answer.
    pub async fn send(
        &mut self,
        session: &mut Session,
        prompt: impl Into<String>,
    ) -> Result<String, BridgeError> {
        let message = self.begin(prompt);
        let id = message.message_id.clone();

        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(error) => {
                self.pending.remove(&id);
                return Err(BridgeError::Protocol(format!(
                    "failed to encode prompt {id}: {error}"
                )));
            }
        };

        if let Err(error) = session.send(&payload).await {
            self.pending.remove(&id);
            return Err(error);
        }

        tracing::debug!(id = %id, fields = message.form_fields.len(), "prompt sent");
        Ok(id)
    }

    /// Unknown and already resolved ids are ignored.
    pub fn resolve(&mut self, id: &str, outcome: AgentOutcome) -> Option<ResolvedPrompt> {
        let Some(mut request) = self.pending.remove(id) else {
            tracing::debug!(id = %id, "response for unknown or settled prompt");
            return None;
        };
        request.state = PromptState::Resolved;
        Some(ResolvedPrompt {
            request,
            outcome,
            resolved_at: Utc::now(),
        })
    }

    pub fn discard(&mut self, id: &str) -> Option<PendingPrompt> {
        let mut request = self.pending.remove(id)?;
        request.state = PromptState::Discarded;
        Some(request)
    }

    /// Discards every prompt created more than `max_age` before `now`.
    pub fn discard_older_than(
        &mut self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<PendingPrompt> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Vec::new();
        };
        let cutoff = now - max_age;
        let stale = self
            .pending
            .values()
            .filter(|request| request.created_at < cutoff)
            .map(|request| request.id.clone())
            .collect::<Vec<_>>();

        let mut expired = stale
            .iter()
            .filter_map(|id| self.discard(id))
            .collect::<Vec<_>>();
        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        expired
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
