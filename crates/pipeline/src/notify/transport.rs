//! Delivery channel transports.
//!
//! A transport sends one notification over one channel. The default
//! transports only log what would be sent; real integrations (push service,
//! email provider, SMS gateway) slot in behind the same trait.

use async_trait::async_trait;
use kct_core::Notification;

/// The delivery channels a notification can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    InApp,
    Desktop,
    Sound,
    Email,
    Sms,
}

impl ChannelKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Desktop => "desktop",
            Self::Sound => "sound",
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{channel} delivery failed: {reason}")]
pub struct TransportError {
    pub channel: ChannelKind,
    pub reason: String,
}

impl TransportError {
    #[must_use]
    pub fn new(channel: ChannelKind, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}

/// One delivery channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel can deliver at all. Desktop returns `false`
    /// until the user has granted permission; such a channel is skipped
    /// silently rather than treated as a failure.
    fn ready(&self) -> bool {
        true
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError>;
}

/// Logs the delivery instead of performing it.
pub struct LogTransport {
    channel: ChannelKind,
}

impl LogTransport {
    #[must_use]
    pub const fn new(channel: ChannelKind) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelTransport for LogTransport {
    fn kind(&self) -> ChannelKind {
        self.channel
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        tracing::info!(
            channel = %self.channel,
            id = %notification.id,
            title = %notification.title,
            "notification would be sent"
        );
        Ok(())
    }
}

/// Desktop channel gated on a permission grant.
pub struct DesktopTransport {
    permission_granted: bool,
}

impl DesktopTransport {
    #[must_use]
    pub const fn new(permission_granted: bool) -> Self {
        Self { permission_granted }
    }
}

#[async_trait]
impl ChannelTransport for DesktopTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Desktop
    }

    fn ready(&self) -> bool {
        self.permission_granted
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        tracing::info!(
            id = %notification.id,
            title = %notification.title,
            "desktop notification would be shown"
        );
        Ok(())
    }
}
