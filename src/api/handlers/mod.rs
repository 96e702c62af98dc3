pub mod bids;
pub mod loans;
pub mod notifications;
pub mod officers;
pub mod system;

pub use bids::*;
pub use loans::*;
pub use notifications::*;
pub use officers::*;
pub use system::*;
