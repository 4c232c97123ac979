//! Daily isolation run

use std::time::Duration;

use billing_engine::audit::SYSTEM_ACTOR;
use billing_engine::{AuditEntry, AuditSink, EnforceRequest, OwnerReport};
use chrono::{Local, NaiveDateTime, NaiveTime};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;

/// Time left until the next `hour:00` local time, never zero
pub fn until_next_run(now: NaiveDateTime, hour: u32) -> Duration {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let mut next = now.date().and_time(at);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// Run the enforcer once a day at the configured hour
pub fn start_isolation_scheduler(state: AppState) {
    let hour = state.config().schedule_hour;
    info!("Isolation scheduler runs daily at {:02}:00", hour);

    tokio::spawn(async move {
        loop {
            let wait = until_next_run(Local::now().naive_local(), hour);
            tokio::time::sleep(wait).await;
            run_scheduled(&state).await;
        }
    });
}

async fn run_scheduled(state: &AppState) {
    let today = Local::now().date_naive();
    match state
        .engine()
        .enforcer
        .enforce(EnforceRequest::default(), today)
        .await
    {
        Ok(report) => {
            for owner in &report {
                let (isolated, failed) = match owner {
                    OwnerReport::Processed {
                        isolated_count,
                        failures,
                        ..
                    } => (*isolated_count, failures.len()),
                    OwnerReport::AllPaid { .. } => (0, 0),
                    OwnerReport::Failed { .. } => (0, 1),
                };
                state
                    .audit_store()
                    .record(
                        AuditEntry::new(owner.owner_id(), SYSTEM_ACTOR, "isolation.scheduled")
                            .with_status(if failed == 0 { "completed" } else { "partial" })
                            .with_detail(json!({
                                "date": today.to_string(),
                                "isolated": isolated,
                                "failed": failed,
                            })),
                    )
                    .await;
            }
            info!(date = %today, owners = report.len(), "Scheduled isolation finished");
        }
        Err(err) => {
            error!(date = %today, error = %err, "Scheduled isolation failed");
            state
                .audit_store()
                .record(
                    AuditEntry::new(Uuid::nil(), SYSTEM_ACTOR, "isolation.scheduled")
                        .with_status("failed")
                        .with_detail(json!({ "error": err.to_string() })),
                )
                .await;
        }
    }
}
