use crate::{address::Mailbox, error::RewriteError, message::ParsedMessage};

/// What [`AddressRewritePolicy::apply`] did to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No override configured, or the message already uses it.
    Unchanged,
    SenderRewritten { previous: Mailbox },
    FromRewritten { previous: Mailbox },
    /// No Sender and not exactly one From; left as submitted.
    Ambiguous { from_count: usize },
}

/// Forces the submitting identity of outgoing messages to a single address.
///
/// Graph only sends as the authenticated mailbox (or one it may send as), so
/// messages claiming some other sender have that sender replaced.
#[derive(Debug, Clone, Default)]
pub struct AddressRewritePolicy {
    from_override: Option<String>,
}

impl AddressRewritePolicy {
    pub const fn new(from_override: Option<String>) -> Self {
        Self { from_override }
    }

    /// # Errors
    /// If the override is not a single valid mail address, in which case the
    /// message is left untouched
    pub fn apply(&self, message: &mut ParsedMessage) -> Result<RewriteOutcome, RewriteError> {
        let Some(raw) = self.from_override.as_deref() else {
            return Ok(RewriteOutcome::Unchanged);
        };

        let replacement =
            Mailbox::parse(raw).map_err(|_| RewriteError::InvalidOverride(raw.to_string()))?;

        if let Some(sender) = message.sender() {
            if sender.same_address(&replacement) {
                return Ok(RewriteOutcome::Unchanged);
            }

            let previous = sender.clone();
            message.set_sender(replacement);
            return Ok(RewriteOutcome::SenderRewritten { previous });
        }

        match message.from() {
            [only] if only.same_address(&replacement) => Ok(RewriteOutcome::Unchanged),
            [only] => {
                let previous = only.clone();
                message.set_from(vec![replacement]);
                Ok(RewriteOutcome::FromRewritten { previous })
            }
            many => Ok(RewriteOutcome::Ambiguous {
                from_count: many.len(),
            }),
        }
    }
}
