//! Resend-compatible email API client.
//!
//! `POST {api_url}` with a bearer key and
//! `{from, to: [..], subject, text, tags: [{name, value}]}`.

use async_trait::async_trait;
use hivelink_core::RetryPolicy;
use hivelink_core::config::EmailConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{EmailMessage, NotificationDispatcher, NotificationError};
use crate::http::build_client;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    tags: Vec<Tag<'a>>,
}

#[derive(Debug, Serialize)]
struct Tag<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_address: String,
    retry: RetryPolicy,
}

impl ResendMailer {
    pub fn new(config: &EmailConfig, api_key: String) -> Result<Self, NotificationError> {
        if config.from_address.trim().is_empty() {
            return Err(NotificationError::Config(
                "email sender address is empty".to_string(),
            ));
        }
        let http = build_client().map_err(|e| NotificationError::Config(e.to_string()))?;
        debug!(api_url = %config.api_url, "Email client initialized");
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            from_address: config.from_address.clone(),
            retry: RetryPolicy::from(&config.retry),
        })
    }

    async fn send_once(&self, message: &EmailMessage) -> Result<Option<String>, NotificationError> {
        let request = SendRequest {
            from: &self.from_address,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.text,
            tags: vec![Tag {
                name: "partial_backup",
                value: if message.partial_backup { "true" } else { "false" },
            }],
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status.as_u16(), "Email API returned error");
            return Err(NotificationError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        // A 2xx without a parseable body still means the message was accepted.
        Ok(response.json::<SendResponse>().await.ok().and_then(|r| r.id))
    }
}

#[async_trait]
impl NotificationDispatcher for ResendMailer {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, NotificationError> {
        let id = self
            .retry
            .run("email.send", move |_| self.send_once(message))
            .await?;
        info!(message_id = ?id, partial_backup = message.partial_backup, "Email accepted");
        Ok(id)
    }
}
