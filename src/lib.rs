//! Budget Link
//!
//! Links financial institutions through the Plaid API and derives a monthly budget:
//! - Issues sandbox public tokens for a fixed set of institutions
//! - Exchanges them for durable access tokens
//! - Pulls transactions for a date range across every linked institution
//! - Totals spending per top-level category
//!
//! Each mutating stage replaces its whole collection in the document store on every run.
//!
//! PIPELINE:
//! TOKENS → EXCHANGE → TRANSACTIONS → BUDGET

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod plaid;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::Pipeline;
