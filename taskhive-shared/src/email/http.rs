/// HTTP client for the email collaborator.
///
/// POSTs `{"email": ..., "team_name": ...}` to `<base_url>/send` with a
/// bounded timeout. Non-2xx responses are failures; the breaker upstream
/// counts them the same as transport errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{EmailError, InviteSender};

#[derive(Debug, Serialize)]
struct InvitePayload<'a> {
    email: &'a str,
    team_name: &'a str,
}

pub struct HttpSender {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl InviteSender for HttpSender {
    async fn send_invite(&self, to_email: &str, team_name: &str) -> Result<(), EmailError> {
        if self.base_url.is_empty() {
            return Err(EmailError::Transport("email base url is empty".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/send", self.base_url))
            .json(&InvitePayload {
                email: to_email,
                team_name,
            })
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmailError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
