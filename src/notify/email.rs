use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

use super::{ChannelError, ChannelKind, NotificationChannel};

const SMTP_SUBMISSION_PORT: u16 = 587;
const SUBJECT: &str = "Vigil detection alert";

/// Plain-text mail over STARTTLS, authenticated as the sender.
pub struct EmailChannel {
    to: String,
    from: String,
    password: String,
    server: String,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(to: &str, from: &str, password: &str, server: &str, timeout: Duration) -> Self {
        Self {
            to: to.to_string(),
            from: from.to_string(),
            password: password.to_string(),
            server: server.to_string(),
            timeout,
        }
    }

    fn build_message(&self, body: &str) -> Result<Message, ChannelError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|err| ChannelError::Address(format!("{}: {}", self.from, err)))?;
        let to: Mailbox = self
            .to
            .parse()
            .map_err(|err| ChannelError::Address(format!("{}: {}", self.to, err)))?;
        Message::builder()
            .from(from)
            .to(to)
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|err| ChannelError::Smtp(err.to_string()))
    }
}

impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn send(&self, message: &str) -> Result<(), ChannelError> {
        let email = self.build_message(message)?;
        let transport = SmtpTransport::starttls_relay(&self.server)
            .map_err(|err| ChannelError::Smtp(err.to_string()))?
            .port(SMTP_SUBMISSION_PORT)
            .credentials(Credentials::new(self.from.clone(), self.password.clone()))
            .timeout(Some(self.timeout))
            .build();
        transport
            .send(&email)
            .map_err(|err| ChannelError::Smtp(err.to_string()))?;
        Ok(())
    }
}
