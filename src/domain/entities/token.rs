//! Bot credential value object.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bot token with masking and zeroization on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BotToken {
    value: String,
}

impl BotToken {
    const MIN_TOKEN_LENGTH: usize = 50;
    const BOT_PREFIX: &'static str = "Bot ";

    /// Creates new token with format validation.
    ///
    /// A leading `Bot ` prefix is accepted and stripped.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let token = Self::new_unchecked(value);

        if token.value.len() < Self::MIN_TOKEN_LENGTH {
            return None;
        }

        if token.value.split('.').count() != 3 {
            return None;
        }

        Some(token)
    }

    /// Creates token without validation.
    #[must_use]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        let mut raw = value.into();
        let trimmed = raw.trim();
        let value = trimmed
            .strip_prefix(Self::BOT_PREFIX)
            .unwrap_or(trimmed)
            .to_string();
        raw.zeroize();
        Self { value }
    }

    /// Raw token, as sent in Identify and Resume payloads.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Value for the HTTP `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{}{}", Self::BOT_PREFIX, self.value)
    }

    /// Returns masked token for display.
    #[must_use]
    pub fn masked(&self) -> String {
        if self.value.len() <= 10 {
            return "*".repeat(self.value.len());
        }

        let visible_prefix = &self.value[..4];
        let visible_suffix = &self.value[self.value.len() - 4..];
        format!("{visible_prefix}...{visible_suffix}")
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotToken")
            .field("value", &self.masked())
            .finish()
    }
}

impl fmt::Display for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}
