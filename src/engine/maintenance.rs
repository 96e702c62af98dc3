use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::domain::{GuaranteedRules, NotificationEvent};
use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::notify::Notifier;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_loans: usize,
    pub reset_allocations: u64,
}

/// Periodic loan expiry and credit reset
#[derive(Clone)]
pub struct Maintenance {
    ledger: Arc<dyn LedgerStore>,
    notifier: Notifier,
    rules: GuaranteedRules,
}

impl Maintenance {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Notifier, rules: GuaranteedRules) -> Self {
        Self {
            ledger,
            notifier,
            rules,
        }
    }

    /// Run one sweep as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for loan_id in self.ledger.due_loans(now).await? {
            let Some(expired) = self.ledger.expire_loan(loan_id, now).await? else {
                continue;
            };
            report.expired_loans += 1;
            info!(
                loan_id,
                expired_bids = expired.plan.expired_bids.len(),
                "loan expired"
            );
            if let Some(leader) = expired.plan.leader {
                self.notifier
                    .notify_officers([(leader, NotificationEvent::LoanExpired { loan_id })])
                    .await;
            }
            self.notifier.publish_bid_update(&expired.loan);
        }

        report.reset_allocations = self.ledger.reset_due_allocations(&self.rules, now).await?;
        if report.reset_allocations > 0 {
            info!(count = report.reset_allocations, "guaranteed credits reset");
        }
        Ok(report)
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run(self, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "maintenance sweep started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!("maintenance sweep failed: {}", e);
                    }
                }
                result = shutdown_rx.recv() => {
                    if let Err(broadcast::error::RecvError::Lagged(_)) = result {
                        warn!("maintenance shutdown channel lagged");
                    }
                    info!("maintenance sweep stopped");
                    break;
                }
            }
        }
    }
}
