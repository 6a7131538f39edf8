use serde_json::json;
use std::time::Duration;

use super::webhook::agent;
use super::{ChannelError, ChannelKind, NotificationChannel};

/// SMS through an operator-supplied HTTP gateway.
///
/// The gateway receives `{"phone","message"}` with the API key as a bearer
/// token. Without a gateway the message is logged for the operator instead.
pub struct SmsChannel {
    phone: String,
    api_key: String,
    gateway: Option<String>,
    agent: ureq::Agent,
}

impl SmsChannel {
    pub fn new(phone: &str, api_key: &str, gateway: Option<&str>, timeout: Duration) -> Self {
        Self {
            phone: phone.to_string(),
            api_key: api_key.to_string(),
            gateway: gateway.map(str::to_string),
            agent: agent(timeout),
        }
    }
}

impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn send(&self, message: &str) -> Result<(), ChannelError> {
        let Some(gateway) = &self.gateway else {
            log::info!(
                "no SMS gateway configured; queued for {}: {}",
                self.phone,
                message
            );
            return Ok(());
        };
        let request = self
            .agent
            .post(gateway)
            .set("Authorization", &format!("Bearer {}", self.api_key));
        match request.send_json(json!({ "phone": self.phone, "message": message })) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => Err(ChannelError::Status {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(err) => Err(ChannelError::Transport(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_gateway_message_is_queued() {
        let channel = SmsChannel::new("13800000000", "key", None, Duration::from_secs(1));
        assert!(channel.send("alert").is_ok());
    }

    #[test]
    fn unreachable_gateway_fails() {
        let channel = SmsChannel::new(
            "13800000000",
            "key",
            Some("http://127.0.0.1:9/sms"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            channel.send("alert"),
            Err(ChannelError::Transport(_))
        ));
    }
}
