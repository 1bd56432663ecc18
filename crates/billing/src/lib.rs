// Billing crate clippy configuration
#![allow(clippy::type_complexity)] // Nested maps returned by batched lookups
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paylens Billing Module
//!
//! Turns invoice ledger rows into fully resolved invoice and credit-note views.
//!
//! ## Features
//!
//! - **Detail Assembly**: Invoice and credit-note views with gateway, user, payment, refund and discount resolved
//! - **Plan Snapshots**: Reconstruct the plan and addons before and after upgrades, downgrades and renewals
//! - **Batched Preloading**: One fetch per collaborator kind for bulk requests
//! - **Graceful Degradation**: Malformed JSON blobs and failed lookups leave fields empty instead of failing
//! - **Cancellation**: Every entry point honours a cancellation token and a deadline
//! - **Export**: CSV rendering and totals for assembled details

pub mod config;
pub mod detail;
pub mod error;
pub mod export;
pub mod line_item;
pub mod pending_update;
pub mod preload;
pub mod service;
pub mod snapshot;
pub mod store;

// Config
pub use config::DetailConfig;

// Detail
pub use detail::{
    assemble_credit_note_detail, assemble_invoice_detail, CreditNoteDetail, InvoiceDetail,
    InvoiceSummary, INVOICE_AUTO_CHARGE_FLAG,
};

// Error
pub use error::{BillingError, BillingResult};

// Export
pub use export::{export_credit_notes_csv, export_details_csv, summarize_details, ExportSummary};

// Line items
pub use line_item::{parse_lines, InvoiceLineItem, LineKind};

// Pending updates
pub use pending_update::{AddonParam, PendingUpdateDetail};

// Preload
pub use preload::{PreloadBatcher, PreloadBundle, PreloadKeys, PreloadScope};

// Service
pub use service::InvoiceDetailService;

// Snapshot
pub use snapshot::{reconcile, ChargeType, PlanAddonDetail, PlanSnapshot};

// Store
pub use store::{CollaboratorStore, DiscountKey, PgCollaboratorStore, PromoCreditKey};
