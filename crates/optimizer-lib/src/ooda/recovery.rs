//! Crash recovery for actions a previous run left unfinished
//!
//! Pending actions can only move to in-progress or skipped, so every path
//! that gives up on an action skips it while pending and fails it once
//! started.

use super::{ActOutcome, Controller, RecoveryReport};
use crate::config::RecoveryPolicy;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::ledger::RECOVERED_MESSAGE;
use crate::models::{Action, ActionStatus};
use chrono::Utc;
use tracing::{info, warn};

impl Controller {
    /// Resolve every pending or in-progress action in the ledger
    ///
    /// Resources that cannot be read for a transient reason are left as they
    /// are and counted as deferred, so the next start tries again.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let shared = &self.shared;
        let settings = &shared.settings;
        let deadline = Deadline::with_token(settings.cycle_deadline, self.shutdown.child_token());

        let unfinished = deadline
            .run(settings.ledger_timeout, shared.ledger.list_pending())
            .await?;
        let mut report = RecoveryReport {
            examined: unfinished.len(),
            ..Default::default()
        };
        if unfinished.is_empty() {
            return Ok(report);
        }
        info!(
            actions = unfinished.len(),
            dry_run = settings.dry_run,
            policy = ?settings.recovery_policy,
            "Recovering unfinished actions"
        );

        for action in unfinished {
            if settings.dry_run || settings.recovery_policy == RecoveryPolicy::MarkFailed {
                self.give_up(&action, RECOVERED_MESSAGE, &mut report).await?;
                continue;
            }

            let snapshot = deadline
                .run(
                    settings.adapter_timeout,
                    shared.adapter.get_resource(&action.resource_id, &deadline),
                )
                .await;
            let snapshot = match snapshot {
                Ok(snapshot) => snapshot,
                Err(e @ Error::NotFound(_)) => {
                    self.give_up(&action, &e.to_string(), &mut report).await?;
                    continue;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(action_id = %action.id, error = %e, "Resource unreadable, deferring recovery");
                    report.deferred += 1;
                    continue;
                }
            };

            if action.status == ActionStatus::Pending {
                deadline
                    .run(
                        settings.ledger_timeout,
                        shared.ledger.mark_started(&action.id, Utc::now()),
                    )
                    .await?;
            }
            match shared.apply_started(&action, &snapshot, &deadline).await {
                ActOutcome::Applied(_) => {
                    report.reapplied += 1;
                    shared.logger.log_recovery(&action, "reapplied");
                }
                ActOutcome::Failed(message) => {
                    report.failed += 1;
                    shared.logger.log_recovery(&action, &message);
                }
                ActOutcome::Skipped => report.skipped += 1,
                ActOutcome::Unrecorded(_) => report.deferred += 1,
                ActOutcome::Interrupted => return Err(Error::Cancelled),
            }
        }

        info!(
            reapplied = report.reapplied,
            failed = report.failed,
            skipped = report.skipped,
            deferred = report.deferred,
            "Recovery finished"
        );
        Ok(report)
    }

    /// Close an action without applying it
    async fn give_up(&self, action: &Action, message: &str, report: &mut RecoveryReport) -> Result<()> {
        let shared = &self.shared;
        let timeout = shared.settings.ledger_timeout;
        let now = Utc::now();
        let closing = match action.status {
            ActionStatus::Pending => {
                report.skipped += 1;
                shared.ledger.mark_skipped(&action.id, now, Some(message))
            }
            _ => {
                report.failed += 1;
                shared.ledger.mark_failed(&action.id, now, message)
            }
        };
        tokio::time::timeout(timeout, closing)
            .await
            .unwrap_or(Err(Error::Timeout(timeout)))?;
        shared.logger.log_recovery(action, message);
        Ok(())
    }
}
