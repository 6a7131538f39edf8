//! Chat-bot webhook channels (Feishu and WeCom).

use serde_json::{json, Value};
use std::time::Duration;

use super::{ChannelError, ChannelKind, NotificationChannel};

const MAX_ERROR_BODY: usize = 256;

pub struct FeishuChannel {
    url: String,
    agent: ureq::Agent,
}

impl FeishuChannel {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: agent(timeout),
        }
    }
}

impl NotificationChannel for FeishuChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Feishu
    }

    fn send(&self, message: &str) -> Result<(), ChannelError> {
        let body = post_json(
            &self.agent,
            &self.url,
            &json!({ "msg_type": "text", "content": { "text": message } }),
        )?;
        let reply: Value = serde_json::from_str(&body)
            .map_err(|err| ChannelError::InvalidResponse(err.to_string()))?;
        match reply.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            _ => Err(ChannelError::Rejected(
                reply
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            )),
        }
    }
}

pub struct WeComChannel {
    url: String,
    agent: ureq::Agent,
}

impl WeComChannel {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: agent(timeout),
        }
    }
}

impl NotificationChannel for WeComChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WeCom
    }

    /// Any 200 counts unless the body carries a non-zero `errcode`.
    fn send(&self, message: &str) -> Result<(), ChannelError> {
        let body = post_json(
            &self.agent,
            &self.url,
            &json!({ "msgtype": "text", "text": { "content": message } }),
        )?;
        let Ok(reply) = serde_json::from_str::<Value>(&body) else {
            return Ok(());
        };
        match reply.get("errcode").and_then(Value::as_i64) {
            None | Some(0) => Ok(()),
            Some(code) => Err(ChannelError::Rejected(format!(
                "errcode {}: {}",
                code,
                reply
                    .get("errmsg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
            ))),
        }
    }
}

pub(super) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// POSTs `payload` and returns the body of a 200 response.
pub(super) fn post_json(
    agent: &ureq::Agent,
    url: &str,
    payload: &Value,
) -> Result<String, ChannelError> {
    let response = match agent.post(url).send_json(payload) {
        Ok(response) => response,
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            return Err(ChannelError::Status {
                status,
                body: truncate(body),
            });
        }
        Err(err) => return Err(ChannelError::Transport(err.to_string())),
    };
    let status = response.status();
    let body = response
        .into_string()
        .map_err(|err| ChannelError::InvalidResponse(err.to_string()))?;
    if status != 200 {
        return Err(ChannelError::Status {
            status,
            body: truncate(body),
        });
    }
    Ok(body)
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
