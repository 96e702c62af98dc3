pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod notify;
pub mod realtime;

pub use config::AppConfig;
pub use engine::{AllocationEngine, BiddingEngine, IntakeEngine, Maintenance};
pub use error::{MarketError, Result};
pub use identity::{HmacIdentityProvider, Identity, IdentityProvider, Role};
pub use ledger::{LedgerStore, MemoryLedger, PostgresLedger};
pub use notify::Notifier;
pub use realtime::Gateway;
