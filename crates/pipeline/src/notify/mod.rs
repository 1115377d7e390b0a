//! Notification delivery channel.
//!
//! Producers hand a notification to [`Notifier::notify`]; it applies quiet
//! hours, records the entry in a bounded persisted log, and fans out to
//! every enabled channel independently. Failed channels retry with
//! exponential backoff and land in a persisted failed-queue when retries are
//! exhausted; [`Notifier::flush_failed`] re-drives that queue on an explicit
//! trigger (startup, CLI).

pub mod clock;
pub mod queue;
pub mod transport;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kct_core::{Notification, NotificationKind, NotificationPreferences, Priority};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::instrument;

pub use clock::{Clock, FixedClock, SystemClock};
pub use queue::{PersistedQueue, QueueError};
pub use transport::{ChannelKind, ChannelTransport, DesktopTransport, LogTransport, TransportError};

/// Answers whether a cart referenced by a reminder is still worth reminding
/// about.
#[async_trait]
pub trait CartProbe: Send + Sync {
    /// `true` if the cart is still non-empty and not checked out.
    async fn still_active(&self, cart_ref: &str) -> bool;
}

/// Probe used when no cart source is wired up; never re-notifies.
pub struct NoCartProbe;

#[async_trait]
impl CartProbe for NoCartProbe {
    async fn still_active(&self, _cart_ref: &str) -> bool {
        false
    }
}

/// Tuning knobs for the delivery channel.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// Directory holding the persisted log, failed queue, and promo codes.
    pub data_dir: PathBuf,
    /// Retention cap of the notification log.
    pub log_cap: usize,
    /// Retention cap of the failed-delivery queue.
    pub failed_cap: usize,
    /// Retention cap of the persisted promo codes.
    pub promo_cap: usize,
    /// Attempts per channel before the delivery lands in the failed queue.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Delay before a cart reminder re-checks the cart.
    pub cart_recheck_delay: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/notifications"),
            log_cap: 50,
            failed_cap: 50,
            promo_cap: 20,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            cart_recheck_delay: Duration::from_secs(10 * 60),
        }
    }
}

/// A delivery that exhausted its retries, queued for a later flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub channel: String,
    pub notification: Notification,
}

/// Outcome of a [`Notifier::flush_failed`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub retried: usize,
    pub delivered: usize,
    pub requeued: usize,
}

/// Marker put on a cart-reminder re-notification so the re-check is
/// scheduled exactly once.
const RECHECK_MARKER: &str = "recheck";

struct Inner {
    clock: Arc<dyn Clock>,
    transports: Vec<Arc<dyn ChannelTransport>>,
    cart_probe: Arc<dyn CartProbe>,
    prefs: Mutex<NotificationPreferences>,
    log: tokio::sync::Mutex<PersistedQueue<Notification>>,
    failed: tokio::sync::Mutex<PersistedQueue<FailedDelivery>>,
    promos: tokio::sync::Mutex<PersistedQueue<String>>,
    deliveries: tokio::sync::Mutex<JoinSet<()>>,
    settings: NotifierSettings,
}

/// The delivery channel. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Load (or create) the persisted queues under `settings.data_dir` and
    /// assemble the channel.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if an existing queue file cannot be read or
    /// decoded.
    pub async fn new(
        settings: NotifierSettings,
        clock: Arc<dyn Clock>,
        transports: Vec<Arc<dyn ChannelTransport>>,
        cart_probe: Arc<dyn CartProbe>,
    ) -> Result<Self, QueueError> {
        let log =
            PersistedQueue::load(settings.data_dir.join("log.json"), settings.log_cap).await?;
        let failed =
            PersistedQueue::load(settings.data_dir.join("failed.json"), settings.failed_cap)
                .await?;
        let promos =
            PersistedQueue::load(settings.data_dir.join("promos.json"), settings.promo_cap)
                .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                clock,
                transports,
                cart_probe,
                prefs: Mutex::new(NotificationPreferences::default()),
                log: tokio::sync::Mutex::new(log),
                failed: tokio::sync::Mutex::new(failed),
                promos: tokio::sync::Mutex::new(promos),
                deliveries: tokio::sync::Mutex::new(JoinSet::new()),
                settings,
            }),
        })
    }

    /// Default wiring: system clock, logging transports for every channel,
    /// no cart probe.
    pub async fn with_defaults(settings: NotifierSettings) -> Result<Self, QueueError> {
        let transports: Vec<Arc<dyn ChannelTransport>> = vec![
            Arc::new(LogTransport::new(ChannelKind::InApp)),
            Arc::new(DesktopTransport::new(false)),
            Arc::new(LogTransport::new(ChannelKind::Sound)),
            Arc::new(LogTransport::new(ChannelKind::Email)),
            Arc::new(LogTransport::new(ChannelKind::Sms)),
        ];
        Self::new(settings, Arc::new(SystemClock), transports, Arc::new(NoCartProbe)).await
    }

    pub fn set_preferences(&self, prefs: NotificationPreferences) {
        *self
            .inner
            .prefs
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = prefs;
    }

    #[must_use]
    pub fn preferences(&self) -> NotificationPreferences {
        self.inner
            .prefs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record and deliver one notification.
    ///
    /// Inside quiet hours the notification is stored already-read and no
    /// channel is touched. Otherwise it is prepended to the log and fanned
    /// out to every enabled, ready channel; each channel retries
    /// independently and an exhausted channel lands in the failed queue.
    /// Returns as soon as the notification is recorded; dispatch and
    /// retries proceed in the background, so a down channel never holds
    /// the caller through its backoff. [`Notifier::drain_deliveries`]
    /// waits them out.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] only when the persisted log cannot be written;
    /// channel failures never surface here.
    #[instrument(skip(self, body, data), fields(kind = ?kind))]
    pub async fn notify(
        &self,
        kind: NotificationKind,
        title: &str,
        body: &str,
        priority: Priority,
        data: serde_json::Value,
    ) -> Result<Notification, QueueError> {
        let now = self.inner.clock.now();
        let prefs = self.preferences();

        let mut notification = Notification::new(kind, title, body, priority, data, now);

        if prefs.quiet_hours.contains(now.time()) {
            notification.read = true;
            tracing::debug!(id = %notification.id, "quiet hours, notification stored read");
            self.inner.log.lock().await.prepend(notification.clone()).await?;
            return Ok(notification);
        }

        self.inner.log.lock().await.prepend(notification.clone()).await?;
        self.apply_side_effects(&notification).await?;
        self.dispatch(&prefs, &notification).await;

        Ok(notification)
    }

    /// Retry everything in the failed queue once, as a batch. Deliveries
    /// that fail again (with full per-attempt backoff) are requeued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue file cannot be read or written.
    #[instrument(skip(self))]
    pub async fn flush_failed(&self) -> Result<FlushReport, QueueError> {
        let entries = self.inner.failed.lock().await.drain().await?;
        let mut report = FlushReport {
            retried: entries.len(),
            ..FlushReport::default()
        };

        for entry in entries {
            let Some(transport) = self
                .inner
                .transports
                .iter()
                .find(|t| t.kind().as_str() == entry.channel)
            else {
                tracing::warn!(channel = %entry.channel, "no transport for failed delivery");
                report.requeued += 1;
                self.inner.failed.lock().await.prepend(entry).await?;
                continue;
            };

            if self
                .deliver_with_retry(Arc::clone(transport), entry.notification.clone())
                .await
            {
                report.delivered += 1;
            } else {
                report.requeued += 1;
            }
        }

        tracing::info!(
            retried = report.retried,
            delivered = report.delivered,
            requeued = report.requeued,
            "failed-queue flush complete"
        );
        Ok(report)
    }

    /// Snapshot of the notification log, newest first.
    pub async fn log_snapshot(&self) -> Vec<Notification> {
        self.inner.log.lock().await.iter().cloned().collect()
    }

    /// Number of deliveries waiting in the failed queue.
    pub async fn failed_len(&self) -> usize {
        self.inner.failed.lock().await.len()
    }

    /// Persisted promo codes, newest first.
    pub async fn promo_codes(&self) -> Vec<String> {
        self.inner.promos.lock().await.iter().cloned().collect()
    }

    async fn apply_side_effects(&self, notification: &Notification) -> Result<(), QueueError> {
        match notification.kind {
            NotificationKind::Promotion => {
                if let Some(code) = notification.data.get("promo_code").and_then(|v| v.as_str())
                {
                    self.inner.promos.lock().await.prepend(code.to_owned()).await?;
                }
            }
            NotificationKind::CartReminder => {
                let already_rechecked = notification
                    .data
                    .get(RECHECK_MARKER)
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if !already_rechecked {
                    self.schedule_cart_recheck(notification.clone());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// One deferred re-check per original reminder; the re-notification
    /// carries a marker so it never schedules another.
    fn schedule_cart_recheck(&self, notification: Notification) {
        let this = self.clone();
        let delay = self.inner.settings.cart_recheck_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(cart_ref) = notification
                .data
                .get("cart_ref")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
            else {
                return;
            };
            if !this.inner.cart_probe.still_active(&cart_ref).await {
                return;
            }
            let mut data = notification.data.clone();
            if let Some(map) = data.as_object_mut() {
                map.insert(RECHECK_MARKER.to_owned(), serde_json::Value::Bool(true));
            }
            if let Err(error) = this
                .notify(
                    NotificationKind::CartReminder,
                    &notification.title,
                    &notification.body,
                    notification.priority,
                    data,
                )
                .await
            {
                tracing::warn!(%error, "cart reminder re-check failed to record");
            }
        });
    }

    /// Wait for every in-flight channel delivery, retries included, to
    /// resolve. Called at shutdown so exhausted deliveries reach the
    /// persisted failed queue; tests use it to observe final state.
    pub async fn drain_deliveries(&self) {
        let mut set = self.inner.deliveries.lock().await;
        while set.join_next().await.is_some() {}
    }

    async fn dispatch(&self, prefs: &NotificationPreferences, notification: &Notification) {
        let mut set = self.inner.deliveries.lock().await;
        // Reap tasks that already finished so the set does not grow forever.
        while set.try_join_next().is_some() {}
        for transport in &self.inner.transports {
            if !channel_enabled(prefs, transport.kind()) {
                continue;
            }
            if !transport.ready() {
                tracing::debug!(channel = %transport.kind(), "channel not ready, skipped");
                continue;
            }
            let this = self.clone();
            let transport = Arc::clone(transport);
            let notification = notification.clone();
            set.spawn(async move {
                this.deliver_with_retry(transport, notification).await;
            });
        }
    }

    /// Returns `true` on delivery; on exhaustion records the failed delivery
    /// and returns `false`.
    async fn deliver_with_retry(
        &self,
        transport: Arc<dyn ChannelTransport>,
        notification: Notification,
    ) -> bool {
        let max_attempts = self.inner.settings.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match transport.deliver(&notification).await {
                Ok(()) => return true,
                Err(error) => {
                    tracing::warn!(
                        %error,
                        channel = %transport.kind(),
                        attempt,
                        max_attempts,
                        "delivery attempt failed"
                    );
                    if attempt < max_attempts {
                        let backoff = self.inner.settings.backoff_base * 2_u32.pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let entry = FailedDelivery {
            channel: transport.kind().as_str().to_owned(),
            notification,
        };
        if let Err(error) = self.inner.failed.lock().await.prepend(entry).await {
            tracing::error!(%error, "could not persist failed delivery");
        }
        false
    }
}

fn channel_enabled(prefs: &NotificationPreferences, channel: ChannelKind) -> bool {
    match channel {
        ChannelKind::InApp => prefs.enable_in_app,
        ChannelKind::Desktop => prefs.enable_desktop,
        ChannelKind::Sound => prefs.enable_sound,
        ChannelKind::Email => prefs.enable_email,
        ChannelKind::Sms => prefs.enable_sms,
    }
}
