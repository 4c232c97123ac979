//! Audit hook for state changes made by the engine

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Actor name used for work the engine does on its own
pub const SYSTEM_ACTOR: &str = "system";

/// One state change worth keeping in the audit trail
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub owner_id: Uuid,
    pub actor: String,
    pub action: &'static str,
    pub username: Option<String>,
    pub status: Option<String>,
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(owner_id: Uuid, actor: impl Into<String>, action: &'static str) -> Self {
        Self {
            owner_id,
            actor: actor.into(),
            action,
            username: None,
            status: None,
            detail: Value::Null,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Receives audit entries. Implementations must not fail the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Sink that only writes entries to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, entry: AuditEntry) {
        info!(
            owner_id = %entry.owner_id,
            actor = %entry.actor,
            username = entry.username.as_deref().unwrap_or("-"),
            "audit: {}",
            entry.action
        );
    }
}
