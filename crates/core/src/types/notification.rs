//! Notification primitives: the delivery unit, user preferences, and the
//! quiet-hours window logic.
//!
//! These are pure types; the delivery channel that consumes them lives in
//! the pipeline crate.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a notification is about. Drives channel actions and secondary
/// effects (cart reminders re-check the cart, promotions persist their code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    ProductUpdate,
    CartReminder,
    OrderUpdate,
    Promotion,
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A user-facing notification.
///
/// `read` is monotonic: once set it is never cleared by the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Structured payload for the consumer (order number, cart contents,
    /// promo code). Unknown fields are preserved as-is.
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub priority: Priority,
}

impl Notification {
    /// Build an unread notification stamped with the given time.
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            body: body.into(),
            data,
            timestamp: now,
            read: false,
            priority,
        }
    }
}

/// A possibly wrap-around time-of-day window during which notifications are
/// recorded as read instead of being delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    /// Window start, local time-of-day ("22:00").
    pub start: String,
    /// Window end, local time-of-day ("08:00").
    pub end: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".to_owned(),
            end: "08:00".to_owned(),
        }
    }
}

impl QuietHours {
    /// Whether `local` falls inside the window.
    ///
    /// A window whose start is after its end wraps around midnight
    /// (22:00-08:00 covers 23:30 and 03:00). Disabled or unparseable
    /// windows never match.
    #[must_use]
    pub fn contains(&self, local: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            return false;
        };
        if start <= end {
            local >= start && local <= end
        } else {
            local >= start || local <= end
        }
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Per-user delivery preferences consumed by the delivery channel.
///
/// The email/SMS flags gate the corresponding transports the same way the
/// sound/desktop/in-app flags do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub enable_sound: bool,
    pub enable_desktop: bool,
    pub enable_in_app: bool,
    pub enable_email: bool,
    pub enable_sms: bool,
    pub quiet_hours: QuietHours,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enable_sound: true,
            enable_desktop: true,
            enable_in_app: true,
            enable_email: false,
            enable_sms: false,
            quiet_hours: QuietHours::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: &str, end: &str) -> QuietHours {
        QuietHours {
            enabled: true,
            start: start.to_owned(),
            end: end.to_owned(),
        }
    }

    #[test]
    fn test_disabled_never_matches() {
        let qh = QuietHours {
            enabled: false,
            ..window("22:00", "08:00")
        };
        assert!(!qh.contains(at(23, 30)));
    }

    #[test]
    fn test_same_day_window() {
        let qh = window("09:00", "17:00");
        assert!(qh.contains(at(9, 0)));
        assert!(qh.contains(at(12, 30)));
        assert!(qh.contains(at(17, 0)));
        assert!(!qh.contains(at(8, 59)));
        assert!(!qh.contains(at(17, 1)));
    }

    #[test]
    fn test_wraparound_window() {
        let qh = window("22:00", "08:00");
        assert!(qh.contains(at(23, 30)));
        assert!(qh.contains(at(3, 0)));
        assert!(qh.contains(at(22, 0)));
        assert!(qh.contains(at(8, 0)));
        assert!(!qh.contains(at(12, 0)));
        assert!(!qh.contains(at(21, 59)));
    }

    #[test]
    fn test_unparseable_window_never_matches() {
        let qh = window("25:99", "08:00");
        assert!(!qh.contains(at(3, 0)));
    }

    #[test]
    fn test_preferences_serde_field_names() {
        let prefs = NotificationPreferences::default();
        let json = serde_json::to_value(&prefs).unwrap();
        assert!(json.get("enableSound").is_some());
        assert!(json.get("enableDesktop").is_some());
        assert!(json.get("quietHours").is_some());
    }

    #[test]
    fn test_notification_new_is_unread() {
        let n = Notification::new(
            NotificationKind::OrderUpdate,
            "Order Update",
            "Your order shipped",
            Priority::High,
            serde_json::json!({"order_number": "KCT-2024-000123"}),
            Utc::now(),
        );
        assert!(!n.read);
        assert_eq!(n.kind, NotificationKind::OrderUpdate);
    }
}
