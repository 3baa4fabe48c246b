use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use super::error::NotifyError;
use super::payload::WebhookPayload;
use super::Notifier;

pub const SERVICE_TOKEN_HEADER: &str = "X-Service-Token";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in a `Status` error.
const MAX_ERROR_BODY: usize = 512;

/// Posts payloads as JSON to the owner's callback URL. One request per call,
/// no retry.
pub struct HttpNotifier {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpNotifier {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(token) = &self.token {
            request = request.header(SERVICE_TOKEN_HEADER, token.expose_secret());
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
