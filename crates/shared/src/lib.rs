//! Paylens Shared Types and Utilities
//!
//! Ledger rows, identifiers and errors shared by the billing engine and the export worker.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
