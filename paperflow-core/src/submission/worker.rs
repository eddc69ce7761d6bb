//! Background retry worker.
//!
//! A single fixed-interval task scans the submission queue for due
//! entries and re-enters the orchestrator. The step-1 CAS makes the
//! worker safe to run alongside interactive submissions: whoever loses
//! the conditional update simply observes `AlreadyInFlight`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{Orchestrator, MAX_RETRIES};
use crate::error::CoreError;
use crate::model::{QueueEntry, QueueStatus};

pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);
const CLAIM_BATCH: i64 = 20;

/// Spawn the retry scanner. Runs until the process exits.
pub fn spawn(orchestrator: Orchestrator) -> JoinHandle<()> {
    spawn_with_interval(orchestrator, SCAN_INTERVAL)
}

pub fn spawn_with_interval(orchestrator: Orchestrator, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = run_once(&orchestrator).await {
                warn!(error = %err, "retry scan failed");
            }
        }
    })
}

/// One scan pass; factored out so the admin kick endpoint can reuse it.
pub async fn run_once(orchestrator: &Orchestrator) -> crate::error::Result<usize> {
    let due = orchestrator.queue().claim_due(MAX_RETRIES, CLAIM_BATCH).await?;
    if due.is_empty() {
        return Ok(0);
    }

    info!(count = due.len(), "processing due submission retries");
    let mut processed = 0;
    for entry in due {
        retry_entry(orchestrator, entry).await;
        processed += 1;
    }
    Ok(processed)
}

async fn retry_entry(orchestrator: &Orchestrator, entry: QueueEntry) {
    // The retry rides the original student session; once that is gone or
    // expired there is nobody to submit as.
    let session = match orchestrator.sessions().get_active(&entry.session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(
                artifact_id = %entry.artifact_id,
                "retry abandoned: student session expired"
            );
            mark(orchestrator, &entry, QueueStatus::Abandoned, Some("session expired")).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "retry deferred: session lookup failed");
            mark(orchestrator, &entry, QueueStatus::Queued, None).await;
            return;
        }
    };

    match orchestrator.submit(entry.artifact_id, &session).await {
        Ok(outcome) => {
            info!(
                artifact_id = %outcome.artifact_id,
                submission_id = %outcome.submission_id,
                "queued retry succeeded"
            );
            mark(orchestrator, &entry, QueueStatus::Done, None).await;
        }
        Err(CoreError::AlreadyInFlight) => {
            // An interactive submission got there first; check back on
            // the next scan.
            mark(orchestrator, &entry, QueueStatus::Queued, None).await;
        }
        Err(CoreError::Conflict(_)) | Err(CoreError::NotFound(_)) => {
            // Submitted elsewhere, superseded, or purged: nothing left to
            // retry.
            mark(orchestrator, &entry, QueueStatus::Done, None).await;
        }
        Err(err) => {
            // A fresh queue row with the incremented attempt count was
            // already inserted by the failure path; this one is spent.
            mark(orchestrator, &entry, QueueStatus::Done, Some(&err.to_string())).await;
        }
    }
}

async fn mark(
    orchestrator: &Orchestrator,
    entry: &QueueEntry,
    status: QueueStatus,
    error: Option<&str>,
) {
    if let Err(err) = orchestrator.queue().mark(entry.id, status, error).await {
        warn!(queue_id = %entry.id, error = %err, "failed to update queue entry");
    }
}
