use std::path::{Path, PathBuf};

use async_trait::async_trait;
use billing_engine::{AuditEntry, AuditSink};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::warn;

use super::{AuditEvent, AuditListQuery};

/// Append-only JSONL audit log with an in-memory index
pub struct AuditStore {
    events_path: PathBuf,
    events: RwLock<Vec<AuditEvent>>,
}

fn trim_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

impl AuditStore {
    pub async fn new(root_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&root_dir).await?;
        let events_path = root_dir.join("events.jsonl");

        if fs::metadata(&events_path).await.is_err() {
            fs::File::create(&events_path).await?;
        }

        let events = Self::load_events(&events_path).await?;
        Ok(Self {
            events_path,
            events: RwLock::new(events),
        })
    }

    async fn load_events(path: &Path) -> std::io::Result<Vec<AuditEvent>> {
        let file = fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    "Ignoring malformed audit event in {}: {}",
                    path.display(),
                    err
                ),
            }
        }

        Ok(events)
    }

    pub async fn append(&self, event: AuditEvent) -> Result<(), String> {
        let mut encoded = serde_json::to_string(&event)
            .map_err(|err| format!("Failed to encode audit event: {}", err))?;
        encoded.push('\n');

        // Hold the index lock across the write so lines land in index order
        let mut events = self.events.write().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .map_err(|err| format!("Failed to open audit log: {}", err))?;
        file.write_all(encoded.as_bytes())
            .await
            .map_err(|err| format!("Failed to write audit log: {}", err))?;
        file.flush()
            .await
            .map_err(|err| format!("Failed to flush audit log: {}", err))?;

        events.push(event);
        Ok(())
    }

    /// Newest first, with a flag telling whether more events match
    pub async fn list_paginated(&self, query: &AuditListQuery) -> (Vec<AuditEvent>, bool) {
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(100).clamp(1, 1000);
        let action_filter = trim_to_none(query.action.as_deref()).map(|value| value.to_lowercase());
        let username_filter = trim_to_none(query.username.as_deref());

        let events = self.events.read().await;
        let mut matched = 0usize;
        let mut page = Vec::with_capacity(limit.min(events.len()));

        for event in events.iter().rev() {
            if query.owner_id.is_some_and(|owner_id| event.owner_id != owner_id) {
                continue;
            }
            if let Some(action) = action_filter.as_deref() {
                if !event.action.to_lowercase().contains(action) {
                    continue;
                }
            }
            if let Some(username) = username_filter.as_deref() {
                if event.username.as_deref() != Some(username) {
                    continue;
                }
            }

            if matched >= offset && page.len() < limit {
                page.push(event.clone());
            }
            matched += 1;
        }

        let has_more = matched > offset + page.len();
        (page, has_more)
    }
}

#[async_trait]
impl AuditSink for AuditStore {
    async fn record(&self, entry: AuditEntry) {
        let action = entry.action;
        if let Err(err) = self.append(AuditEvent::from(entry)).await {
            warn!("Dropping audit event {}: {}", action, err);
        }
    }
}
