//! Periodic sync scheduling
//!
//! One task per account sleeps for the account's [`SyncFrequency`] period and
//! then runs a pass. The period is re-read from the ledger every cycle, so a
//! frequency change applies from the next cycle on. Stopping the scheduler
//! cancels in-flight passes at their next operation boundary.
//!
//! [`SyncFrequency`]: core_runtime::config::SyncFrequency

use crate::{Result, ServiceError, SyncService};
use core_ledger::AccountId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often a manual account is checked for a changed frequency
const MANUAL_RECHECK: Duration = Duration::from_secs(300);

pub(crate) struct Scheduler {
    token: CancellationToken,
    tasks: HashMap<AccountId, JoinHandle<()>>,
}

impl SyncService {
    /// Start periodic passes for every account
    ///
    /// Calling it while the scheduler already runs is a no-op.
    pub async fn start_scheduler(&self) -> Result<()> {
        if !self.config().features.enable_scheduler {
            return Err(ServiceError::InvalidOperation(
                "the scheduler is disabled by configuration".to_string(),
            ));
        }
        let accounts = self.accounts().await?;

        let mut scheduler = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_some() {
            return Ok(());
        }
        let mut running = Scheduler {
            token: CancellationToken::new(),
            tasks: HashMap::new(),
        };
        for account in &accounts {
            self.spawn_schedule(&mut running, account.id);
        }
        *scheduler = Some(running);

        info!(accounts = accounts.len(), "Scheduler started");
        Ok(())
    }

    /// Stop all scheduled tasks and wait for them to finish
    pub async fn stop_scheduler(&self) {
        let scheduler = {
            let mut guard = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(scheduler) = scheduler else {
            return;
        };

        scheduler.token.cancel();
        for (account_id, task) in scheduler.tasks {
            if let Err(e) = task.await {
                warn!(account_id = %account_id, error = %e, "Scheduled task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub(crate) fn schedule_if_running(&self, account_id: AccountId) {
        let mut scheduler = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = scheduler.as_mut() {
            if !running.tasks.contains_key(&account_id) {
                self.spawn_schedule(running, account_id);
            }
        }
    }

    pub(crate) fn unschedule(&self, account_id: &AccountId) {
        let mut scheduler = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = scheduler.as_mut().and_then(|s| s.tasks.remove(account_id)) {
            task.abort();
        }
    }

    fn spawn_schedule(&self, scheduler: &mut Scheduler, account_id: AccountId) {
        let service = self.clone();
        let token = scheduler.token.child_token();
        let task = tokio::spawn(async move { service.run_schedule(account_id, token).await });
        scheduler.tasks.insert(account_id, task);
    }

    async fn run_schedule(self, account_id: AccountId, token: CancellationToken) {
        loop {
            let period = match self.ledger().find_account(&account_id).await {
                Ok(Some(account)) => account.sync_frequency.interval(),
                Ok(None) => {
                    debug!(account_id = %account_id, "Account gone; schedule ends");
                    return;
                }
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Could not read account schedule");
                    None
                }
            };

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(period.unwrap_or(MANUAL_RECHECK)) => {}
            }
            if period.is_none() {
                continue;
            }

            match self.sync_account_with_token(account_id, token.child_token()).await {
                Ok(log) => debug!(
                    account_id = %account_id,
                    state = %log.state,
                    operations = log.operations(),
                    "Scheduled sync finished"
                ),
                Err(e) if Self::is_sync_in_progress(&e) => {
                    debug!(account_id = %account_id, "Skipping scheduled sync; pass already running")
                }
                Err(e) => warn!(account_id = %account_id, error = %e, "Scheduled sync failed"),
            }
        }
    }
}
