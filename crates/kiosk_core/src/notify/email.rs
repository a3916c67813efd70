//! SMTP delivery for the `email` channel.
//!
//! # Responsibility
//! - Turn notifications into multipart (plain + HTML) mails and hand them to
//!   a lettre transport.
//!
//! # Invariants
//! - A recipient that is not a mailbox fails with `InvalidRecipient` before
//!   any network traffic.
//! - The SMTP password never reaches the log.

use crate::config::EmailConfig;
use crate::notify::channel::{Channel, ChannelSetupError, DeliveryError, DeliveryResult};
use crate::notify::message::{self, RenderedMessage, DEFAULT_SUBJECT};
use crate::schedule::summary::MonthlySummary;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info};
use rust_decimal::Decimal;
use std::fmt::Display;

pub const EMAIL_CHANNEL: &str = "email";

/// Mail channel over any lettre transport; SMTP with STARTTLS in production.
pub struct EmailChannel<T = SmtpTransport> {
    transport: T,
    sender: Mailbox,
}

impl EmailChannel<SmtpTransport> {
    /// Builds the STARTTLS relay described by `config`. Does not connect.
    pub fn from_config(config: &EmailConfig) -> Result<Self, ChannelSetupError> {
        let credentials = Credentials::new(config.login.clone(), config.password.clone());
        let transport = SmtpTransport::starttls_relay(&config.smtp_server)
            .map_err(|err| ChannelSetupError::new(EMAIL_CHANNEL, err.to_string()))?
            .port(config.smtp_port)
            .credentials(credentials)
            .timeout(Some(config.timeout()))
            .build();

        info!(
            "event=channel_setup module=notify status=ok channel={EMAIL_CHANNEL} server={} port={}",
            config.smtp_server, config.smtp_port
        );
        Self::with_transport(transport, config.sender())
    }
}

impl<T> EmailChannel<T>
where
    T: Transport,
    T::Error: Display,
{
    pub fn with_transport(transport: T, sender: &str) -> Result<Self, ChannelSetupError> {
        let sender = sender.parse::<Mailbox>().map_err(|err| {
            ChannelSetupError::new(EMAIL_CHANNEL, format!("invalid sender `{sender}`: {err}"))
        })?;
        Ok(Self { transport, sender })
    }

    /// Assembles the mail without sending it.
    pub fn compose(&self, recipient: &str, content: &RenderedMessage) -> Result<Message, DeliveryError> {
        self.builder(recipient, &content.subject)?
            .multipart(MultiPart::alternative_plain_html(
                content.text.clone(),
                content.html.clone(),
            ))
            .map_err(|err| DeliveryError::Transport(format!("failed to build mail: {err}")))
    }

    fn builder(
        &self,
        recipient: &str,
        subject: &str,
    ) -> Result<lettre::message::MessageBuilder, DeliveryError> {
        let to = recipient
            .trim()
            .parse::<Mailbox>()
            .map_err(|_| DeliveryError::InvalidRecipient(recipient.to_string()))?;
        Ok(Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject))
    }

    fn send(&self, mail: &Message, kind: &str) -> DeliveryResult {
        self.transport
            .send(mail)
            .map_err(|err| DeliveryError::Transport(format!("smtp: {err}")))?;
        debug!("event=channel_deliver module=notify status=ok channel={EMAIL_CHANNEL} kind={kind}");
        Ok(())
    }

    fn deliver(&self, recipient: &str, content: RenderedMessage, kind: &str) -> DeliveryResult {
        let mail = self.compose(recipient, &content)?;
        self.send(&mail, kind)
    }
}

impl<T> Channel for EmailChannel<T>
where
    T: Transport + Send + Sync,
    T::Error: Display,
{
    fn channel_type(&self) -> &str {
        EMAIL_CHANNEL
    }

    fn send_message(&self, recipient: &str, body: &str, subject: Option<&str>) -> DeliveryResult {
        let mail = self
            .builder(recipient, subject.unwrap_or(DEFAULT_SUBJECT))?
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|err| DeliveryError::Transport(format!("failed to build mail: {err}")))?;
        self.send(&mail, "send_message")
    }

    fn notify_low_balance(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
    ) -> DeliveryResult {
        self.deliver(recipient, message::low_balance(balance, language), "low_balance")
    }

    fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
    ) -> DeliveryResult {
        self.deliver(
            recipient,
            message::low_stock(product_name, available_quantity, language),
            "low_stock",
        )
    }

    fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        language: &str,
    ) -> DeliveryResult {
        self.deliver(
            recipient,
            message::monthly_summary(summary, language),
            "monthly_summary",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::EmailChannel;
    use crate::config::EmailConfig;
    use crate::notify::channel::{Channel, DeliveryError};
    use crate::notify::message;
    use lettre::transport::stub::StubTransport;
    use rust_decimal_macros::dec;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_server: "smtp.example.org".to_string(),
            login: "kiosk@example.org".to_string(),
            password: "hunter2".to_string(),
            ..EmailConfig::default()
        }
    }

    #[test]
    fn smtp_channel_builds_without_connecting() {
        let channel = EmailChannel::from_config(&config()).expect("relay settings are valid");
        assert_eq!(channel.channel_type(), "email");
    }

    #[test]
    fn sender_must_be_a_mailbox() {
        let mut config = config();
        config.from_address = Some("not a mailbox".to_string());
        let err = EmailChannel::from_config(&config).err().expect("sender rejected");
        assert!(err.to_string().contains("invalid sender"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let channel =
            EmailChannel::with_transport(StubTransport::new_error(), "kiosk@example.org")
                .expect("channel");

        let result = channel.notify_low_balance("ada at example", dec!(1), "en");

        assert!(matches!(result, Err(DeliveryError::InvalidRecipient(handle)) if handle == "ada at example"));
    }

    #[test]
    fn transport_failure_is_reported() {
        let channel =
            EmailChannel::with_transport(StubTransport::new_error(), "kiosk@example.org")
                .expect("channel");

        let result = channel.notify_low_stock("ada@example.org", "Mate", 2, "en");

        assert!(matches!(result, Err(DeliveryError::Transport(_))));
    }

    #[test]
    fn accepted_mail_is_a_successful_delivery() {
        let channel = EmailChannel::with_transport(StubTransport::new_ok(), "Kiosk <kiosk@example.org>")
            .expect("channel");

        channel
            .send_message("ada@example.org", "hello", None)
            .expect("stub accepts");
        channel
            .notify_low_balance("ada@example.org", dec!(2.5), "de")
            .expect("stub accepts");
    }

    #[test]
    fn composed_mail_carries_both_parts() {
        let channel = EmailChannel::with_transport(StubTransport::new_ok(), "kiosk@example.org")
            .expect("channel");

        let mail = channel
            .compose("ada@example.org", &message::low_balance(dec!(2.5), "en"))
            .expect("mail");
        let raw = String::from_utf8(mail.formatted()).expect("utf-8 mail");

        assert!(raw.contains("To: ada@example.org"));
        assert!(raw.contains("Subject: Low balance"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }
}
