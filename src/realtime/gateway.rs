use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{BidId, LoanId, Notification, NotificationId, OfficerId, UserId};

pub type ConnectionId = u64;

/// Subscription topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every bid-state change on every loan
    BidUpdates,
    /// Notifications for one user
    User(UserId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BidUpdates => write!(f, "bids"),
            Self::User(id) => write!(f, "notifications_{id}"),
        }
    }
}

/// Messages pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthenticationSuccessful {
        message: String,
    },
    AuthenticationFailed {
        message: String,
    },
    SubscriptionSuccessful {
        message: String,
    },
    Error {
        message: String,
    },
    BidUpdate {
        loan_id: LoanId,
        new_lowest_rate: Option<Decimal>,
        current_bid_count: i32,
        current_leader: Option<OfficerId>,
    },
    LoanClosed {
        loan_id: LoanId,
        winning_bid: BidId,
    },
    Notification {
        notification: Notification,
    },
    MarkReadResponse {
        success: bool,
        notification_id: NotificationId,
    },
    MarkAllReadResponse {
        success: bool,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Messages accepted from clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        #[serde(default)]
        token: Option<String>,
    },
    SubscribeBids,
    MarkRead {
        notification_id: NotificationId,
    },
    MarkAllRead,
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerMessage>,
    topics: HashSet<Topic>,
}

/// Registry of live connections and their subscriptions
///
/// Each connection owns one unbounded channel, so delivery to a single
/// connection is FIFO. Nothing orders deliveries across connections.
#[derive(Default)]
pub struct Gateway {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
    topics: DashMap<Topic, HashSet<ConnectionId>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an anonymous, unsubscribed connection.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                sender,
                topics: HashSet::new(),
            },
        );
        (id, receiver)
    }

    /// Returns false for an unknown connection.
    ///
    /// The connection entry stays locked until the topic index is updated.
    /// Lock order is connection, then topic.
    pub fn subscribe(&self, connection: ConnectionId, topic: Topic) -> bool {
        let Some(mut conn) = self.connections.get_mut(&connection) else {
            return false;
        };
        conn.topics.insert(topic);
        self.topics.entry(topic).or_default().insert(connection);
        true
    }

    /// Drop a connection and every subscription it held.
    pub fn unregister(&self, connection: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&connection) else {
            return;
        };
        for topic in conn.topics {
            if let Some(mut members) = self.topics.get_mut(&topic) {
                members.remove(&connection);
            }
            self.topics.remove_if(&topic, |_, members| members.is_empty());
        }
    }

    /// Send directly to one connection.
    pub fn send_to(&self, connection: ConnectionId, message: ServerMessage) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    /// Fan a message out to every subscriber of `topic`; returns how many got it.
    pub fn publish(&self, topic: Topic, message: &ServerMessage) -> usize {
        let members: Vec<ConnectionId> = match self.topics.get(&topic) {
            Some(members) => members.iter().copied().collect(),
            None => Vec::new(),
        };
        let delivered = members
            .into_iter()
            .filter(|id| self.send_to(*id, message.clone()))
            .count();
        if delivered == 0 {
            debug!(%topic, "no live subscribers");
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|m| m.len()).unwrap_or(0)
    }
}
