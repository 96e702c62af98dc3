//! Notification dispatcher
//!
//! Persists notifications and pushes them to the recipient's live sessions
//! when the recipient has dashboard delivery enabled.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::domain::{
    CommunicationPreferences, Loan, NewNotification, Notification, NotificationEvent,
    NotificationId, OfficerId, PreferencesUpdate, UserId,
};
use crate::error::{MarketError, Result};
use crate::ledger::LedgerStore;
use crate::realtime::{Gateway, ServerMessage, Topic};

/// A user's notifications, newest first
#[derive(Debug, Clone, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

#[derive(Clone)]
pub struct Notifier {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<Gateway>,
}

impl Notifier {
    pub fn new(ledger: Arc<dyn LedgerStore>, gateway: Arc<Gateway>) -> Self {
        Self { ledger, gateway }
    }

    /// Persist a notification for `recipient`, then push it if they want pushes.
    ///
    /// A push with no live session is not an error.
    pub async fn notify(&self, recipient: UserId, event: &NotificationEvent) -> Result<Notification> {
        let notification = self
            .ledger
            .insert_notification(NewNotification::render(recipient, event))
            .await?;

        let prefs = self.ledger.preferences(recipient).await?;
        if prefs.via_dashboard {
            let delivered = self.gateway.publish(
                Topic::User(recipient),
                &ServerMessage::Notification {
                    notification: notification.clone(),
                },
            );
            if delivered == 0 {
                debug!(
                    user_id = recipient,
                    kind = %notification.kind,
                    "notification stored, recipient offline"
                );
            }
        }
        Ok(notification)
    }

    /// Notify the user behind an officer profile.
    pub async fn notify_officer(
        &self,
        officer_id: OfficerId,
        event: &NotificationEvent,
    ) -> Result<Notification> {
        let officer = self
            .ledger
            .officer(officer_id)
            .await?
            .ok_or_else(|| MarketError::not_found("officer", officer_id))?;
        self.notify(officer.user_id, event).await
    }

    /// Post-commit fan-out: failures are logged, never returned.
    pub async fn notify_officers(&self, deliveries: impl IntoIterator<Item = (OfficerId, NotificationEvent)>) {
        for (officer_id, event) in deliveries {
            if let Err(e) = self.notify_officer(officer_id, &event).await {
                error!(officer_id, kind = %event.kind(), "failed to notify officer: {}", e);
            }
        }
    }

    pub fn publish_bid_update(&self, loan: &Loan) {
        self.gateway.publish(
            Topic::BidUpdates,
            &ServerMessage::BidUpdate {
                loan_id: loan.id,
                new_lowest_rate: loan.lowest_bid_rate,
                current_bid_count: loan.current_bid_count,
                current_leader: loan.current_leader,
            },
        );
    }

    pub fn publish_loan_closed(&self, loan: &Loan) {
        if let Some(winning_bid) = loan.winning_bid {
            self.gateway.publish(
                Topic::BidUpdates,
                &ServerMessage::LoanClosed {
                    loan_id: loan.id,
                    winning_bid,
                },
            );
        }
    }

    pub async fn list(&self, user_id: UserId) -> Result<NotificationList> {
        let notifications = self.ledger.notifications_for(user_id).await?;
        let unread_count = notifications.iter().filter(|n| !n.is_read).count();
        Ok(NotificationList {
            notifications,
            unread_count,
        })
    }

    /// Only the recipient can mark a notification read.
    pub async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<()> {
        if self.ledger.mark_read(user_id, id).await? {
            Ok(())
        } else {
            Err(MarketError::not_found("notification", id))
        }
    }

    pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let changed = self.ledger.mark_all_read(user_id).await?;
        info!(user_id, changed, "marked all notifications read");
        Ok(changed)
    }

    pub async fn preferences(&self, user_id: UserId) -> Result<CommunicationPreferences> {
        self.ledger.preferences(user_id).await
    }

    pub async fn update_preferences(
        &self,
        user_id: UserId,
        update: PreferencesUpdate,
    ) -> Result<CommunicationPreferences> {
        let mut prefs = self.ledger.preferences(user_id).await?;
        prefs.apply(update);
        self.ledger.save_preferences(user_id, &prefs).await?;
        Ok(prefs)
    }
}
