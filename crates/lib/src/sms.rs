//! SMS value types exchanged between transport providers and the translator.

/// Errors building an [`Sms`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SmsError {
    #[error("sms body is empty")]
    EmptyBody,
}

/// A single SMS message. Immutable once built; phone numbers are not validated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sms {
    to: String,
    from: String,
    body: String,
}

impl Sms {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, SmsError> {
        let body = body.into();
        if body.is_empty() {
            return Err(SmsError::EmptyBody);
        }
        Ok(Self {
            to: to.into(),
            from: from.into(),
            body,
        })
    }

    /// Phone number the message was (or will be) sent to.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Phone number that sent (or is sending) the message.
    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// What a provider feed learned about the SMS network: a new message, or
/// confirmation that an earlier outbound message reached its recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSms {
    Message(Sms),
    /// `id` is the provider-assigned identifier returned when the message was sent.
    DeliveryReport { id: String },
}
