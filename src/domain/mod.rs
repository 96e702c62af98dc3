pub mod allocation;
pub mod auction;
pub mod bid;
pub mod loan;
pub mod notification;
pub mod officer;
pub mod routing;

pub use allocation::*;
pub use auction::*;
pub use bid::*;
pub use loan::*;
pub use notification::*;
pub use officer::*;
pub use routing::*;

pub type LoanId = i64;
pub type BidId = i64;
pub type BorrowerId = i64;
pub type OfficerId = i64;
pub type UserId = i64;
pub type NotificationId = i64;
