use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{routing_score, Borrower, Loan, LoanStatus, NewBorrower, NewLoan, NotificationEvent};
use crate::error::{MarketError, Result};
use crate::ledger::LedgerStore;
use crate::notify::Notifier;

/// Structured payload produced by document extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanIntake {
    pub borrower: NewBorrower,
    /// `borrower_id` is ignored and replaced by the created borrower
    pub loan: NewLoan,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedLoan {
    pub borrower: Borrower,
    pub loan: Loan,
}

#[derive(Clone)]
pub struct IntakeEngine {
    ledger: Arc<dyn LedgerStore>,
    notifier: Notifier,
    default_max_bids: i32,
}

impl IntakeEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Notifier, default_max_bids: i32) -> Self {
        Self {
            ledger,
            notifier,
            default_max_bids,
        }
    }

    /// Create the borrower and loan, score the loan and announce it to active officers.
    pub async fn create_loan(&self, intake: LoanIntake) -> Result<CreatedLoan> {
        let LoanIntake {
            borrower,
            loan: mut terms,
        } = intake;
        terms.validate().map_err(MarketError::Validation)?;
        if borrower.email.trim().is_empty() {
            return Err(MarketError::Validation(
                "borrower email is required".to_string(),
            ));
        }

        let now = Utc::now();
        let max_bids = *terms.max_bids.get_or_insert(self.default_max_bids);
        let preview = terms.clone().into_loan(0, max_bids, now);
        terms.routing_score = Some(routing_score(&preview));

        let (borrower, loan) = self
            .ledger
            .insert_borrower_with_loan(borrower, terms)
            .await?;
        info!(
            loan_id = loan.id,
            borrower_id = borrower.id,
            amount = %loan.amount,
            lead_type = %loan.lead_type,
            "loan created from intake"
        );

        if loan.status == LoanStatus::Available {
            let officers = self.ledger.active_officers().await?;
            let event = NotificationEvent::NewLoan {
                loan_id: loan.id,
                amount: loan.amount,
                location: loan.location.clone(),
            };
            let deliveries: Vec<_> = officers
                .into_iter()
                .map(|o| (o.id, event.clone()))
                .collect();
            self.notifier.notify_officers(deliveries).await;
        }

        Ok(CreatedLoan { borrower, loan })
    }
}
