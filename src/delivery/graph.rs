//! Microsoft Graph `sendMail` transport.
//!
//! Authenticates with the OAuth 2.0 client credentials grant and submits
//! base64 MIME content to `/users/{id}/sendMail`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url, header::CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    config::GraphSettings,
    delivery::transport::{MailTransport, SendMailRequest},
    error::TransportError,
    outgoing,
};

/// Tokens are renewed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const fn default_expires_in() -> u64 {
    3599
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Where tokens and API calls are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEndpoints {
    pub token_url: String,
    pub graph_base: String,
    pub scope: String,
}

impl GraphEndpoints {
    pub fn from_settings(settings: &GraphSettings) -> Self {
        let environment = settings.environment;

        Self {
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                environment.authority(),
                settings.tenant_id
            ),
            graph_base: environment.graph_base(),
            scope: environment.scope(),
        }
    }

    /// The `sendMail` URL for `mailbox`, which is encoded as one path segment.
    ///
    /// # Errors
    /// If the Graph root is not an absolute URL
    pub fn send_mail_url(&self, mailbox: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.graph_base)
            .map_err(|err| TransportError::Endpoint(format!("{}: {err}", self.graph_base)))?;

        url.path_segments_mut()
            .map_err(|()| TransportError::Endpoint(self.graph_base.clone()))?
            .pop_if_empty()
            .extend(["users", mailbox, "sendMail"]);

        Ok(url)
    }
}

pub struct GraphTransport {
    client: reqwest::Client,
    endpoints: GraphEndpoints,
    client_id: String,
    client_secret: String,
    capture_responses: bool,
    token: Mutex<Option<AccessToken>>,
}

impl GraphTransport {
    /// # Errors
    /// If the HTTP client cannot be constructed
    pub fn new(settings: &GraphSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoints: GraphEndpoints::from_settings(settings),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            capture_responses: settings.http_response_capture,
            token: Mutex::new(None),
        })
    }

    /// Point the transport somewhere other than the national cloud endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: GraphEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    async fn access_token(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref().filter(|token| Instant::now() < token.refresh_at) {
            return Ok(token.value.clone());
        }

        outgoing!(level = DEBUG, "Requesting access token from {}", self.endpoints.token_url);

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.endpoints.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Token(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);

        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }
}

#[async_trait]
impl MailTransport for GraphTransport {
    async fn send_mail(&self, request: SendMailRequest) -> Result<(), TransportError> {
        let token = self.access_token().await?;
        let url = self.endpoints.send_mail_url(&request.mailbox)?;

        outgoing!(level = DEBUG, "POST {url} ({} bytes)", request.payload.len());

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() && !self.capture_responses {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if self.capture_responses {
            tracing::debug!(status = status.as_u16(), "Graph response: {body}");
        }

        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            self.token.lock().await.take();
        }

        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
