//! Scripted model for deterministic tests.
//!
//! Responses are served from a FIFO queue first. When the queue is empty the
//! optional responder closure is consulted, which lets concurrent callers get
//! answers keyed on their prompt instead of on arrival order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use scribe_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

use crate::count_tokens;

type Responder = Box<dyn Fn(&RecordedCall) -> Result<String, ModelError> + Send + Sync>;

/// One call observed by a [`ScriptedModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Concatenated system prompt, if any.
    pub system: Option<String>,
    /// Last user turn.
    pub user: String,
    /// Requested temperature.
    pub temperature: Option<f32>,
    /// Requested token cap.
    pub max_tokens: Option<u32>,
}

/// A model that replays scripted responses and records every call.
pub struct ScriptedModel {
    id: String,
    queue: Mutex<VecDeque<Result<String, ModelError>>>,
    responder: Option<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("id", &self.id)
            .field("queued", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .field("has_responder", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptedModel {
    /// Creates an empty script.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            calls: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queues a successful response.
    #[must_use]
    pub fn then_respond(self, content: impl Into<String>) -> Self {
        self.lock_queue().push_back(Ok(content.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_fail(self, error: ModelError) -> Self {
        self.lock_queue().push_back(Err(error));
        self
    }

    /// Answers calls with `responder` once the queue is drained.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Sleeps this long before answering each call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns a copy of every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, ModelError>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, call: &RecordedCall) -> Result<String, ModelError> {
        if let Some(queued) = self.lock_queue().pop_front() {
            return queued;
        }
        match &self.responder {
            Some(responder) => responder(call),
            None => Err(ModelError::Other(format!("script for {} exhausted", self.id))),
        }
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.generate_chat_completion(&[ChatMessage::user(prompt)], parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let system: Vec<&str> =
            messages.iter().filter(|m| m.role == "system").map(|m| m.content.as_str()).collect();
        let call = RecordedCall {
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            user: messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default(),
            temperature: parameters.as_ref().and_then(|p| p.temperature),
            max_tokens: parameters.as_ref().and_then(|p| p.max_tokens),
        };
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.next_reply(&call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        debug!(model_id = %self.id, ok = reply.is_ok(), "ScriptedModel answered");

        let content = reply?;
        let prompt_tokens = count_tokens(&call.user);
        let completion_tokens = count_tokens(&content);
        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}
