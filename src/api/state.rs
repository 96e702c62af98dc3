use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::MarketplaceConfig;
use crate::engine::{AllocationEngine, BiddingEngine, IntakeEngine, Maintenance};
use crate::identity::IdentityProvider;
use crate::ledger::LedgerStore;
use crate::notify::Notifier;
use crate::realtime::Gateway;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Transactional store behind every engine
    pub ledger: Arc<dyn LedgerStore>,

    /// Real-time connection registry
    pub gateway: Arc<Gateway>,

    pub notifier: Notifier,

    /// Bearer token resolution
    pub identities: Arc<dyn IdentityProvider>,

    pub bidding: BiddingEngine,
    pub allocation: AllocationEngine,
    pub intake: IntakeEngine,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the engines around one ledger and one gateway.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        identities: Arc<dyn IdentityProvider>,
        marketplace: &MarketplaceConfig,
    ) -> Self {
        let gateway = Arc::new(Gateway::new());
        let notifier = Notifier::new(ledger.clone(), gateway.clone());
        let bidding = BiddingEngine::new(ledger.clone(), notifier.clone());
        let allocation = AllocationEngine::new(
            ledger.clone(),
            notifier.clone(),
            marketplace.guaranteed_rules(),
            marketplace.recommendation_limit,
        );
        let intake = IntakeEngine::new(ledger.clone(), notifier.clone(), marketplace.default_max_bids);

        Self {
            ledger,
            gateway,
            notifier,
            identities,
            bidding,
            allocation,
            intake,
            start_time: Utc::now(),
        }
    }

    /// Background sweep sharing this state's ledger and notifier
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.ledger.clone(),
            self.notifier.clone(),
            self.allocation.rules().clone(),
        )
    }
}
