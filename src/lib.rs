//! Bakehouse Storefront - customer ordering client core
//!
//! Backend library for the customer-facing storefront shell. The UI
//! layer calls into this crate for order tracking, cart maintenance,
//! checkout, cancellation, the payment-appeal flow, and the local
//! notification inbox. All order state lives in the remote document
//! store; this crate projects it for display and reconciles it while
//! an order screen is open.

pub mod api;
pub mod appeal;
pub mod cart;
pub mod db;
pub mod errors;
pub mod logging;
pub mod notifications;
pub mod orders;
pub mod reconcile;
pub mod status;
pub mod storage;

pub use api::StoreClient;
pub use db::DbState;
pub use errors::ClientError;
pub use orders::{Order, OrderDetails};
pub use reconcile::OrderWatcher;
pub use status::DisplayStage;
