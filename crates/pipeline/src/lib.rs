//! KCT order pipeline - materialization, sync, and notification delivery.
//!
//! This crate turns payment processor webhook events into canonical orders,
//! reconciles the chat-commerce fast-path store into the canonical store,
//! and delivers order notifications across channels with retry.
//!
//! # Architecture
//!
//! - Axum webhook receiver with HMAC-SHA256 signature verification
//! - `PostgreSQL` canonical and fast-path stores behind trait seams
//! - Background sync service (realtime feed + periodic sweep)
//! - Multi-channel notifier with persisted queues on disk
//!
//! The library surface exists so the CLI and integration tests can drive
//! the same components the binary runs.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod inventory;
pub mod models;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
