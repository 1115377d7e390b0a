//! Domain records persisted by the pipeline stores.

pub mod customer;
pub mod fast_path;
pub mod order;

pub use customer::{Customer, NewCustomer};
pub use fast_path::{FastPathItem, FastPathMetadata, FastPathOrder, NewFastPathOrder};
pub use order::{Address, NewOrder, NewOrderLine, Order, OrderLine};
