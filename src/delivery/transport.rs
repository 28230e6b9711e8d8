use async_trait::async_trait;

use crate::{error::TransportError, message::ParsedMessage};

/// Graph accepts MIME content for `sendMail` as base64 text.
pub const MIME_CONTENT_TYPE: &str = "text/plain";

/// One outbound submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMailRequest {
    /// Object id or user principal name of the sending mailbox
    pub mailbox: String,
    pub content_type: &'static str,
    /// Base64 encoded MIME message
    pub payload: String,
}

impl SendMailRequest {
    pub fn from_message(mailbox: &str, message: &ParsedMessage) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            content_type: MIME_CONTENT_TYPE,
            payload: message.to_base64(),
        }
    }
}

/// Submits messages on behalf of the relay.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// # Errors
    /// [`TransportError::Canceled`] if the request was abandoned, anything else
    /// if it failed
    async fn send_mail(&self, request: SendMailRequest) -> Result<(), TransportError>;
}
