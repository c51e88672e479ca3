//! Bounded log of inter-agent messages.
//!
//! The log is for observability only; nothing reads it to make decisions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum A2AMessageType {
    /// Work handed to a worker.
    Task,
    /// Work handed back.
    Result,
    /// A question between agents.
    Query,
    /// A reviewer's verdict.
    Critique,
    /// Agents sharing intermediate output.
    Collaborate,
    /// Lifecycle notices and trace events.
    Status,
}

impl A2AMessageType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Result => "result",
            Self::Query => "query",
            Self::Critique => "critique",
            Self::Collaborate => "collaborate",
            Self::Status => "status",
        }
    }
}

/// One observability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2AMessage {
    /// Unique id.
    pub id: String,
    /// Sender id.
    pub from: String,
    /// Recipient id.
    pub to: String,
    /// When it was logged.
    pub timestamp: DateTime<Utc>,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: A2AMessageType,
    /// Free-form body.
    pub payload: serde_json::Value,
    /// Orchestration session it belongs to.
    pub session_id: String,
}

impl A2AMessage {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: A2AMessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            timestamp: Utc::now(),
            kind,
            payload,
            session_id: session_id.into(),
        }
    }
}

/// FIFO log that evicts its oldest entry past `capacity`.
#[derive(Debug, Clone)]
pub(crate) struct MessageLog {
    entries: VecDeque<A2AMessage>,
    capacity: usize,
    evicted: u64,
}

impl MessageLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity.min(1024)), capacity: capacity.max(1), evicted: 0 }
    }

    pub(crate) fn push(&mut self, message: A2AMessage) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(message);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) const fn evicted(&self) -> u64 {
        self.evicted
    }

    pub(crate) fn recent(&self, n: usize) -> Vec<A2AMessage> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub(crate) fn for_session(&self, session_id: &str) -> Vec<A2AMessage> {
        self.entries.iter().filter(|m| m.session_id == session_id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(session: &str, n: u32) -> A2AMessage {
        A2AMessage::new(session, "coordinator", "all", A2AMessageType::Status, serde_json::json!({ "n": n }))
    }

    #[test]
    fn test_log_evicts_oldest_past_capacity() {
        let mut log = MessageLog::new(3);
        for n in 0..5 {
            log.push(status("s", n));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted(), 2);
        let kept: Vec<u64> = log.recent(10).iter().filter_map(|m| m.payload["n"].as_u64()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_filter_by_session() {
        let mut log = MessageLog::new(10);
        log.push(status("a", 1));
        log.push(status("b", 2));
        log.push(status("a", 3));

        assert_eq!(log.for_session("a").len(), 2);
        assert_eq!(log.recent(1)[0].session_id, "a");
    }

    #[test]
    fn test_type_wire_names() {
        assert_eq!(A2AMessageType::Critique.as_str(), "critique");
        let json = serde_json::to_value(status("s", 0)).unwrap();
        assert_eq!(json["type"], "status");
    }
}
