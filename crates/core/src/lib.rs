//! KCT Core - Shared types library.
//!
//! This crate provides the domain types used across the order pipeline
//! components:
//! - `pipeline` - Webhook gateway, order materialization, cross-store sync,
//!   and notification delivery
//! - `cli` - Command-line tools for migrations and operator actions
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for emails, money, statuses, and
//!   notification primitives
//! - [`sku`] - Deterministic SKU derivation from line-item metadata
//! - [`order_number`] - Human-readable order number generation

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod order_number;
pub mod sku;
pub mod types;

pub use types::*;
