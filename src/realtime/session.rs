use std::sync::Arc;

use tracing::{info, warn};

use super::{ClientMessage, ConnectionId, Gateway, ServerMessage, Topic};
use crate::identity::{token_fingerprint, Identity, IdentityProvider};
use crate::notify::Notifier;

/// Which socket endpoint a session was opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Bids,
    Notifications,
}

/// Whether the socket stays open after handling a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Per-connection protocol state
///
/// Sessions start anonymous. Replies go through the gateway so they share
/// the connection's FIFO with pushed events.
pub struct ClientSession {
    channel: Channel,
    connection: ConnectionId,
    identity: Option<Identity>,
    gateway: Arc<Gateway>,
    identities: Arc<dyn IdentityProvider>,
    notifier: Notifier,
}

impl ClientSession {
    pub fn new(
        channel: Channel,
        connection: ConnectionId,
        gateway: Arc<Gateway>,
        identities: Arc<dyn IdentityProvider>,
        notifier: Notifier,
    ) -> Self {
        Self {
            channel,
            connection,
            identity: None,
            gateway,
            identities,
            notifier,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    fn reply(&self, message: ServerMessage) {
        self.gateway.send_to(self.connection, message);
    }

    /// Handle one text frame from the client.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(_) => {
                self.reply(ServerMessage::error("Invalid message format"));
                if self.channel == Channel::Notifications && self.identity.is_none() {
                    return Flow::Close;
                }
                Flow::Continue
            }
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Authenticate { token } => self.authenticate(token).await,
            other => match self.identity {
                None => self.reject_unauthenticated(),
                Some(identity) => self.handle_authenticated(identity, other).await,
            },
        }
    }

    async fn authenticate(&mut self, token: Option<String>) -> Flow {
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let resolved = match token.as_deref() {
            Some(token) => match self.identities.resolve(token).await {
                Ok(identity) => Ok(identity),
                Err(e) => {
                    warn!(
                        connection = self.connection,
                        token_fp = %token_fingerprint(token),
                        "websocket authentication failed: {}", e
                    );
                    Err("Invalid token")
                }
            },
            None => Err("No token provided"),
        };

        let identity = match resolved {
            Ok(identity) => identity,
            Err(message) => {
                self.reply(ServerMessage::AuthenticationFailed {
                    message: message.to_string(),
                });
                return match self.channel {
                    Channel::Bids => Flow::Continue,
                    Channel::Notifications => Flow::Close,
                };
            }
        };

        let topic = match self.channel {
            Channel::Bids => Topic::BidUpdates,
            Channel::Notifications => Topic::User(identity.user_id),
        };
        self.gateway.subscribe(self.connection, topic);
        self.identity = Some(identity);
        info!(
            connection = self.connection,
            user_id = identity.user_id,
            %topic,
            "websocket session authenticated"
        );
        self.reply(ServerMessage::AuthenticationSuccessful {
            message: "Successfully authenticated".to_string(),
        });
        Flow::Continue
    }

    fn reject_unauthenticated(&self) -> Flow {
        match self.channel {
            Channel::Bids => {
                self.reply(ServerMessage::error("Authentication required"));
                Flow::Continue
            }
            Channel::Notifications => {
                self.reply(ServerMessage::error("Not authenticated"));
                Flow::Close
            }
        }
    }

    async fn handle_authenticated(&self, identity: Identity, message: ClientMessage) -> Flow {
        match (self.channel, message) {
            (Channel::Bids, ClientMessage::SubscribeBids) => {
                self.reply(ServerMessage::SubscriptionSuccessful {
                    message: "Successfully subscribed to bid updates".to_string(),
                });
            }
            (Channel::Notifications, ClientMessage::MarkRead { notification_id }) => {
                let success = self
                    .notifier
                    .mark_read(identity.user_id, notification_id)
                    .await
                    .is_ok();
                self.reply(ServerMessage::MarkReadResponse {
                    success,
                    notification_id,
                });
            }
            (Channel::Notifications, ClientMessage::MarkAllRead) => {
                let success = self.notifier.mark_all_read(identity.user_id).await.is_ok();
                self.reply(ServerMessage::MarkAllReadResponse { success });
            }
            (_, other) => {
                self.reply(ServerMessage::error(format!(
                    "Unsupported message on this channel: {}",
                    message_name(&other)
                )));
            }
        }
        Flow::Continue
    }
}

fn message_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Authenticate { .. } => "authenticate",
        ClientMessage::SubscribeBids => "subscribe_bids",
        ClientMessage::MarkRead { .. } => "mark_read",
        ClientMessage::MarkAllRead => "mark_all_read",
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.gateway.unregister(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;
    use crate::identity::{MockIdentityProvider, Role};
    use crate::ledger::{LedgerStore, MemoryLedger};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn provider() -> Arc<dyn IdentityProvider> {
        let mut mock = MockIdentityProvider::new();
        mock.expect_resolve().returning(|token| match token {
            "good" => Ok(Identity {
                user_id: 11,
                role: Role::LoanOfficer,
            }),
            _ => Err(MarketError::Auth("invalid token".into())),
        });
        Arc::new(mock)
    }

    fn session(channel: Channel) -> (ClientSession, Arc<Gateway>, UnboundedReceiver<ServerMessage>) {
        let gateway = Arc::new(Gateway::new());
        let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
        let notifier = Notifier::new(ledger, gateway.clone());
        let (conn, rx) = gateway.register();
        let session = ClientSession::new(channel, conn, gateway.clone(), provider(), notifier);
        (session, gateway, rx)
    }

    fn next(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
        rx.try_recv().expect("a reply")
    }

    #[tokio::test]
    async fn bids_channel_survives_failed_auth() {
        let (mut s, gateway, mut rx) = session(Channel::Bids);

        assert_eq!(s.handle(ClientMessage::SubscribeBids).await, Flow::Continue);
        assert!(matches!(next(&mut rx), ServerMessage::Error { .. }));

        let flow = s
            .handle(ClientMessage::Authenticate {
                token: Some("bad".into()),
            })
            .await;
        assert_eq!(flow, Flow::Continue);
        assert!(matches!(
            next(&mut rx),
            ServerMessage::AuthenticationFailed { .. }
        ));
        assert_eq!(gateway.subscriber_count(Topic::BidUpdates), 0);

        s.handle(ClientMessage::Authenticate {
            token: Some("good".into()),
        })
        .await;
        assert!(matches!(
            next(&mut rx),
            ServerMessage::AuthenticationSuccessful { .. }
        ));
        assert_eq!(gateway.subscriber_count(Topic::BidUpdates), 1);

        s.handle(ClientMessage::SubscribeBids).await;
        assert!(matches!(
            next(&mut rx),
            ServerMessage::SubscriptionSuccessful { .. }
        ));
    }

    #[tokio::test]
    async fn notifications_channel_closes_on_failed_auth() {
        let (mut s, _gateway, mut rx) = session(Channel::Notifications);
        let flow = s
            .handle(ClientMessage::Authenticate { token: None })
            .await;
        assert_eq!(flow, Flow::Close);
        assert!(matches!(
            next(&mut rx),
            ServerMessage::AuthenticationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn notifications_channel_closes_on_early_message() {
        let (mut s, _gateway, mut rx) = session(Channel::Notifications);
        assert_eq!(s.handle(ClientMessage::MarkAllRead).await, Flow::Close);
        assert!(matches!(next(&mut rx), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn authenticated_notification_session_subscribes_to_user_topic() {
        let (mut s, gateway, mut rx) = session(Channel::Notifications);
        s.handle(ClientMessage::Authenticate {
            token: Some("good".into()),
        })
        .await;
        next(&mut rx);
        assert_eq!(gateway.subscriber_count(Topic::User(11)), 1);

        s.handle(ClientMessage::MarkRead { notification_id: 99 }).await;
        assert_eq!(
            next(&mut rx),
            ServerMessage::MarkReadResponse {
                success: false,
                notification_id: 99
            }
        );

        drop(s);
        assert_eq!(gateway.subscriber_count(Topic::User(11)), 0);
    }
}
