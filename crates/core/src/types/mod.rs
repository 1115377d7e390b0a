//! Core types for the KCT order pipeline.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod money;
pub mod notification;
pub mod status;

pub use email::{Email, EmailError};
pub use money::Money;
pub use notification::{
    Notification, NotificationKind, NotificationPreferences, Priority, QuietHours,
};
pub use status::*;
