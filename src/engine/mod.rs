//! Marketplace engines
//!
//! Engines run one ledger transaction per operation and call the notifier
//! explicitly once the transaction has committed.

pub mod allocation;
pub mod bidding;
pub mod intake;
pub mod maintenance;

pub use allocation::{AllocationEngine, GuaranteedDashboard};
pub use bidding::{BiddingEngine, CompetitiveLoan};
pub use intake::{CreatedLoan, IntakeEngine, LoanIntake};
pub use maintenance::{Maintenance, SweepReport};

use crate::domain::{OfficerId, OfficerProfile};
use crate::error::{MarketError, Result};
use crate::ledger::LedgerStore;

/// Load an officer that is allowed to act in the marketplace.
pub(crate) async fn active_officer(
    ledger: &dyn LedgerStore,
    officer_id: OfficerId,
) -> Result<OfficerProfile> {
    let officer = ledger
        .officer(officer_id)
        .await?
        .ok_or_else(|| MarketError::NotAuthorized(format!("officer {officer_id} is unknown")))?;
    if !officer.is_active {
        return Err(MarketError::NotAuthorized(
            "officer account is not active".to_string(),
        ));
    }
    Ok(officer)
}
