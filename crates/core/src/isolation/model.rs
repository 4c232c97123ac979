//! Suspension and restore-job model definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The profile a customer had before the device was switched to the suspended profile.
///
/// Written before the device is touched so a restore never depends on the
/// device comment alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionRecord {
    pub owner_id: Uuid,
    pub username: String,
    pub original_profile: String,
    pub suspended_at: DateTime<Utc>,
}

impl SuspensionRecord {
    pub fn new(owner_id: Uuid, username: impl Into<String>, original_profile: impl Into<String>) -> Self {
        Self {
            owner_id,
            username: username.into(),
            original_profile: original_profile.into(),
            suspended_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreJobStatus {
    Pending,
    Done,
    /// Gave up after the maximum number of attempts
    Dead,
}

impl Default for RestoreJobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Durable work item asking the restorer to reactivate a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub status: RestoreJobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

impl RestoreJob {
    pub fn new(owner_id: Uuid, username: impl Into<String>, payment_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            username: username.into(),
            payment_id,
            status: RestoreJobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RestoreJobStatus::Pending && self.next_attempt_at <= now
    }

    pub fn mark_done(&mut self) {
        self.attempts += 1;
        self.status = RestoreJobStatus::Done;
        self.last_error = None;
    }

    /// Record a failed attempt, backing off exponentially or giving up
    pub fn mark_failed(&mut self, error: impl Into<String>, max_attempts: u32, base_delay: Duration) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        if self.attempts >= max_attempts {
            self.status = RestoreJobStatus::Dead;
            return;
        }
        let factor = 2_i32.saturating_pow(self.attempts.saturating_sub(1).min(16));
        self.next_attempt_at = Utc::now() + base_delay * factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_due() {
        let job = RestoreJob::new(Uuid::new_v4(), "alice", None);
        assert!(job.is_due(Utc::now() + Duration::seconds(1)));
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_failed_job_backs_off_then_dies() {
        let mut job = RestoreJob::new(Uuid::new_v4(), "alice", None);

        job.mark_failed("timeout", 3, Duration::seconds(30));
        assert_eq!(job.status, RestoreJobStatus::Pending);
        assert!(!job.is_due(Utc::now()));
        assert_eq!(job.last_error.as_deref(), Some("timeout"));

        job.mark_failed("timeout", 3, Duration::seconds(30));
        job.mark_failed("timeout", 3, Duration::seconds(30));
        assert_eq!(job.status, RestoreJobStatus::Dead);
        assert_eq!(job.attempts, 3);
    }

    #[test]
    fn test_done_job_is_not_due() {
        let mut job = RestoreJob::new(Uuid::new_v4(), "alice", None);
        job.mark_done();
        assert!(!job.is_due(Utc::now() + Duration::hours(1)));
    }
}
