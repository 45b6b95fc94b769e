use crate::db::ChatStore;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::metrics;
use crate::models::{Conversation, Message, NewMessage, Role};
use crate::services::notification_sender::{ConversationContext, NotificationSender};
use crate::websocket::{ConnectionRegistry, InboundMessage, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

/// Authenticated identity behind an inbound connection
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub user_id: Uuid,
    pub role: Role,
    pub display_name: Option<String>,
}

impl Sender {
    /// Name shown to the recipient of an offline notification
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => match self.role {
                Role::Customer => "A customer".to_string(),
                Role::Seller => "A seller".to_string(),
                Role::Admin => "Marketplace support".to_string(),
            },
        }
    }
}

/// Where a routed message ended up after it was persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed to the recipient's live connection
    Delivered,
    /// Recipient offline; notification handed off in the background
    Notified,
}

/// Resolves conversations, persists messages and delivers them
pub struct ConversationRouter {
    store: Arc<dyn ChatStore>,
    registry: ConnectionRegistry,
    notifier: Arc<dyn NotificationSender>,
}

impl ConversationRouter {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: ConnectionRegistry,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    /// Route one inbound frame; failures go back to the sender as an `error`
    /// frame and never close the connection.
    pub async fn handle_inbound(&self, sender: &Sender, inbound: InboundMessage) {
        if let Err(e) = self.route_message(sender, inbound).await {
            match e.kind() {
                ErrorKind::Client => {
                    metrics::record_message("rejected");
                    tracing::debug!(user_id = %sender.user_id, error = %e, "message rejected");
                }
                _ => {
                    metrics::record_message("failed");
                    tracing::error!(user_id = %sender.user_id, error = %e, "failed to route message");
                }
            }
            self.registry
                .send_to(sender.user_id, &ServerFrame::error(e.client_message()))
                .await;
        }
    }

    /// Persist, then echo to the sender and push or notify the recipient
    pub async fn route_message(
        &self,
        sender: &Sender,
        inbound: InboundMessage,
    ) -> AppResult<(Message, Delivery)> {
        let content = match inbound.content {
            Some(content) if !content.trim().is_empty() => content,
            Some(_) => return Err(AppError::BadRequest("content must not be empty".into())),
            None => return Err(AppError::BadRequest("content is required".into())),
        };

        if sender.role == Role::Admin {
            return Err(AppError::Forbidden(
                "admins cannot take part in buyer/seller conversations".into(),
            ));
        }

        let conversation_id = inbound
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let (conversation, receiver_id) = match conversation_id {
            Some(raw) => self.existing_conversation(sender, raw).await?,
            None => {
                let raw = inbound
                    .recipient_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| AppError::BadRequest("recipientId is required".into()))?;
                let recipient_id = parse_id(raw, "recipientId")?;
                let (customer_id, seller_id) = conversation_pair(sender, recipient_id)?;
                let conversation = self.store.upsert_conversation(customer_id, seller_id).await?;
                (conversation, recipient_id)
            }
        };

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: sender.user_id,
                receiver_id,
                content,
                images: inbound.images.filter(|images| !images.is_empty()),
            })
            .await?;

        let frame = ServerFrame::Message(message.clone());
        self.registry.send_to(sender.user_id, &frame).await;

        if self.registry.send_to(receiver_id, &frame).await {
            metrics::record_message("delivered");
            tracing::debug!(
                message_id = %message.id,
                receiver_id = %receiver_id,
                "message delivered to live connection"
            );
            return Ok((message, Delivery::Delivered));
        }

        metrics::record_message("offline");
        self.notify_offline(
            receiver_id,
            ConversationContext {
                conversation_id: conversation.id,
                sender_name: sender.display_name(),
                sender_role: sender.role,
            },
        );
        Ok((message, Delivery::Notified))
    }

    async fn existing_conversation(
        &self,
        sender: &Sender,
        raw_id: &str,
    ) -> AppResult<(Conversation, Uuid)> {
        let id = parse_id(raw_id, "conversationId")?;
        let conversation = self
            .store
            .find_conversation(id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;

        let side_matches = match sender.role {
            Role::Customer => conversation.customer_id == sender.user_id,
            Role::Seller => conversation.seller_id == sender.user_id,
            Role::Admin => false,
        };
        let receiver_id = conversation
            .counterparty(sender.user_id)
            .filter(|_| side_matches)
            .ok_or_else(|| {
                AppError::Forbidden("you are not a party to this conversation".into())
            })?;

        Ok((conversation, receiver_id))
    }

    fn notify_offline(&self, recipient_id: Uuid, context: ConversationContext) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let conversation_id = context.conversation_id;
            if let Err(e) = notifier.notify(recipient_id, context).await {
                tracing::warn!(
                    recipient_id = %recipient_id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "offline notification failed"
                );
            }
        });
    }
}

/// Per-connection FIFO in front of the router
///
/// Frames from one socket are routed one at a time, in arrival order, so a
/// later message can never be persisted or delivered before an earlier one.
/// The worker ends when the last clone of the queue is dropped.
#[derive(Clone)]
pub struct InboundQueue {
    tx: UnboundedSender<InboundMessage>,
}

impl InboundQueue {
    pub fn spawn(router: Arc<ConversationRouter>, sender: Sender) -> Self {
        let (tx, mut rx) = unbounded_channel::<InboundMessage>();
        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                router.handle_inbound(&sender, inbound).await;
            }
            tracing::debug!(user_id = %sender.user_id, "inbound queue drained");
        });
        Self { tx }
    }

    /// Returns `false` once the worker is gone
    pub fn push(&self, inbound: InboundMessage) -> bool {
        self.tx.send(inbound).is_ok()
    }
}

fn parse_id(raw: &str, field: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("{field} is not a valid id")))
}

/// `(customer_id, seller_id)` for a new conversation between sender and recipient
pub fn conversation_pair(sender: &Sender, recipient_id: Uuid) -> AppResult<(Uuid, Uuid)> {
    if recipient_id == sender.user_id {
        return Err(AppError::BadRequest("cannot send a message to yourself".into()));
    }
    match sender.role {
        Role::Customer => Ok((sender.user_id, recipient_id)),
        Role::Seller => Ok((recipient_id, sender.user_id)),
        Role::Admin => Err(AppError::Forbidden(
            "admins cannot take part in buyer/seller conversations".into(),
        )),
    }
}
