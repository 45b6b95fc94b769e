use crate::config::SmtpConfig;
use crate::db::UserDirectory;
use crate::error::{AppError, AppResult};
use crate::models::Role;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use uuid::Uuid;

/// What the offline recipient is told about the new message
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub conversation_id: Uuid,
    pub sender_name: String,
    pub sender_role: Role,
}

impl ConversationContext {
    pub fn subject(&self) -> String {
        format!("New message from {}", self.sender_name)
    }

    /// Plain-text body, greeting the recipient by name when one is known
    pub fn body(&self, recipient_name: Option<&str>) -> String {
        let greeting = match recipient_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("Hi {name},"),
            None => "Hi,".to_string(),
        };
        format!(
            "{greeting}\n\n{} ({}) sent you a message.\n\nOpen conversation {} to reply.",
            self.sender_name,
            self.sender_role.as_str().to_lowercase(),
            self.conversation_id
        )
    }
}

/// Out-of-band notification for recipients without a live connection
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, recipient_id: Uuid, context: ConversationContext) -> AppResult<()>;
}

/// SMTP notifier. Without a configured host it only logs what it would send.
pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    directory: Arc<dyn UserDirectory>,
}

impl EmailNotifier {
    pub fn new(cfg: &SmtpConfig, directory: Arc<dyn UserDirectory>) -> AppResult<Self> {
        let from = cfg
            .from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("invalid SMTP_FROM address: {e}")))?;

        let transport = match cfg.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => {
                let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| AppError::Config(format!("SMTP transport: {e}")))?
                    .port(cfg.port);

                let builder = match (&cfg.username, &cfg.password) {
                    (Some(username), Some(password)) => {
                        builder.credentials(Credentials::new(username.clone(), password.clone()))
                    }
                    _ => builder,
                };
                Some(builder.build())
            }
            _ => {
                tracing::warn!("SMTP host not configured; notifications are logged only");
                None
            }
        };

        Ok(Self {
            transport,
            from,
            directory,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl NotificationSender for EmailNotifier {
    async fn notify(&self, recipient_id: Uuid, context: ConversationContext) -> AppResult<()> {
        let Some(transport) = &self.transport else {
            tracing::info!(
                recipient_id = %recipient_id,
                conversation_id = %context.conversation_id,
                sender = %context.sender_name,
                "no SMTP transport; skipping offline notification"
            );
            return Ok(());
        };

        let contact = self
            .directory
            .contact(recipient_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {recipient_id}")))?;

        let to = contact
            .email
            .parse::<Mailbox>()
            .map_err(|e| AppError::Notification(format!("invalid recipient address: {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(context.subject())
            .header(header::ContentType::TEXT_PLAIN)
            .body(context.body(contact.display_name.as_deref()))
            .map_err(|e| AppError::Notification(format!("failed to build email: {e}")))?;

        transport
            .send(email)
            .await
            .map_err(|e| AppError::Notification(format!("failed to send email: {e}")))?;

        tracing::info!(
            recipient_id = %recipient_id,
            conversation_id = %context.conversation_id,
            "offline notification sent"
        );
        Ok(())
    }
}
