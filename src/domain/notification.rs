use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BidId, LoanId, NotificationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Outbid,
    BidWon,
    BidLost,
    LoanExpired,
    NewLoan,
    LoanAssigned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbid => "OUTBID",
            Self::BidWon => "BID_WON",
            Self::BidLost => "BID_LOST",
            Self::LoanExpired => "LOAN_EXPIRED",
            Self::NewLoan => "NEW_LOAN",
            Self::LoanAssigned => "LOAN_ASSIGNED",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for NotificationKind {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OUTBID" => Ok(Self::Outbid),
            "BID_WON" => Ok(Self::BidWon),
            "BID_LOST" => Ok(Self::BidLost),
            "LOAN_EXPIRED" => Ok(Self::LoanExpired),
            "NEW_LOAN" => Ok(Self::NewLoan),
            "LOAN_ASSIGNED" => Ok(Self::LoanAssigned),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// Something a user should hear about, with the values its template needs
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Outbid { loan_id: LoanId, new_rate: Decimal },
    BidWon { loan_id: LoanId, bid_id: BidId, rate: Decimal },
    BidLost { loan_id: LoanId },
    LoanExpired { loan_id: LoanId },
    NewLoan { loan_id: LoanId, amount: Decimal, location: String },
    LoanAssigned { loan_id: LoanId },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Outbid { .. } => NotificationKind::Outbid,
            Self::BidWon { .. } => NotificationKind::BidWon,
            Self::BidLost { .. } => NotificationKind::BidLost,
            Self::LoanExpired { .. } => NotificationKind::LoanExpired,
            Self::NewLoan { .. } => NotificationKind::NewLoan,
            Self::LoanAssigned { .. } => NotificationKind::LoanAssigned,
        }
    }

    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::Outbid { loan_id, .. }
            | Self::BidWon { loan_id, .. }
            | Self::BidLost { loan_id }
            | Self::LoanExpired { loan_id }
            | Self::NewLoan { loan_id, .. }
            | Self::LoanAssigned { loan_id } => *loan_id,
        }
    }

    pub fn bid_id(&self) -> Option<BidId> {
        match self {
            Self::BidWon { bid_id, .. } => Some(*bid_id),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Outbid { .. } => "You have been outbid!",
            Self::BidWon { .. } => "Your bid won!",
            Self::BidLost { .. } => "Bid not selected",
            Self::LoanExpired { .. } => "Loan expired",
            Self::NewLoan { .. } => "New loan available",
            Self::LoanAssigned { .. } => "Guaranteed loan assigned",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Outbid { loan_id, new_rate } => format!(
                "Your bid on loan #{loan_id} has been outbid. The new lowest APR is {new_rate}%. \
                 Place a new bid to stay competitive!"
            ),
            Self::BidWon { loan_id, rate, .. } => {
                format!("Your bid of {rate}% on loan #{loan_id} was accepted.")
            }
            Self::BidLost { loan_id } => {
                format!("Loan #{loan_id} was awarded to another loan officer.")
            }
            Self::LoanExpired { loan_id } => {
                format!("Loan #{loan_id} expired before a bid was accepted.")
            }
            Self::NewLoan {
                loan_id,
                amount,
                location,
            } => format!("Loan #{loan_id} for ${amount} in {location} is open for bids."),
            Self::LoanAssigned { loan_id } => {
                format!("Loan #{loan_id} was added to your guaranteed pool.")
            }
        }
    }
}

/// Persisted notification row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub loan_id: Option<LoanId>,
    pub bid_id: Option<BidId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub loan_id: Option<LoanId>,
    pub bid_id: Option<BidId>,
}

impl NewNotification {
    pub fn render(user_id: UserId, event: &NotificationEvent) -> Self {
        Self {
            user_id,
            kind: event.kind(),
            title: event.title().to_string(),
            message: event.message(),
            loan_id: Some(event.loan_id()),
            bid_id: event.bid_id(),
        }
    }

    pub fn into_notification(self, id: NotificationId, now: DateTime<Utc>) -> Notification {
        Notification {
            id,
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            loan_id: self.loan_id,
            bid_id: self.bid_id,
            is_read: false,
            created_at: now,
        }
    }
}

/// Delivery channels a user has opted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationPreferences {
    pub via_dashboard: bool,
    pub via_email: bool,
    pub via_sms: bool,
}

impl Default for CommunicationPreferences {
    fn default() -> Self {
        Self {
            via_dashboard: true,
            via_email: true,
            via_sms: true,
        }
    }
}

/// Partial update; absent fields keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub via_dashboard: Option<bool>,
    #[serde(default)]
    pub via_email: Option<bool>,
    #[serde(default)]
    pub via_sms: Option<bool>,
}

impl CommunicationPreferences {
    pub fn apply(&mut self, update: PreferencesUpdate) {
        if let Some(v) = update.via_dashboard {
            self.via_dashboard = v;
        }
        if let Some(v) = update.via_email {
            self.via_email = v;
        }
        if let Some(v) = update.via_sms {
            self.via_sms = v;
        }
    }
}
