//! Invoice detail export
//!
//! Renders assembled details for:
//! - Accounting and reconciliation spreadsheets
//! - Customer billing statements
//! - Audit trails of plan changes

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use paylens_shared::InvoiceStatus;

use crate::detail::{CreditNoteDetail, InvoiceDetail};

const INVOICE_CSV_HEADER: &str = "Invoice ID,Status,Charge Type,Currency,Origin Amount,Discount Amount,Total Amount,Paid At,Plan,Previous Plan,Message\n";
const CREDIT_NOTE_CSV_HEADER: &str =
    "Credit Note ID,Status,Currency,Total Amount,Paid At,Original Invoice,Refund ID,Message\n";

/// Export invoice details to CSV, one row per detail
pub fn export_details_csv(details: &[InvoiceDetail]) -> String {
    let mut csv = String::new();

    csv.push_str(INVOICE_CSV_HEADER);

    for detail in details {
        let plan = detail
            .plan_snapshot
            .plan
            .as_ref()
            .map(|p| p.plan_name.as_str())
            .unwrap_or_default();
        let previous_plan = detail
            .plan_snapshot
            .previous_plan
            .as_ref()
            .map(|p| p.plan_name.as_str())
            .unwrap_or_default();

        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            escape_csv_field(&detail.invoice_id),
            status_label(detail.status),
            detail.plan_snapshot.charge_type.as_str(),
            escape_csv_field(&detail.currency),
            format_minor_units(detail.origin_amount),
            format_minor_units(detail.discount_amount),
            format_minor_units(detail.total_amount),
            format_unix(detail.paid_time),
            escape_csv_field(plan),
            escape_csv_field(previous_plan),
            escape_csv_field(&detail.message),
        ));
    }

    csv
}

/// Export credit notes to CSV, one row per note
pub fn export_credit_notes_csv(notes: &[CreditNoteDetail]) -> String {
    let mut csv = String::new();

    csv.push_str(CREDIT_NOTE_CSV_HEADER);

    for note in notes {
        let original = note
            .original_payment_invoice
            .as_ref()
            .map(|i| i.invoice_id.as_str())
            .unwrap_or_default();

        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            escape_csv_field(&note.invoice_id),
            status_label(note.status),
            escape_csv_field(&note.currency),
            format_minor_units(note.total_amount),
            format_unix(note.paid_time),
            escape_csv_field(original),
            escape_csv_field(&note.refund_id),
            escape_csv_field(&note.message),
        ));
    }

    csv
}

/// Totals over a set of exported invoice details. Amount totals saturate at the i64 bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub record_count: usize,
    pub paid_count: usize,
    pub refunded_count: usize,
    pub plan_change_count: usize,
    pub origin_amount_total: i64,
    pub discount_amount_total: i64,
    pub total_amount_total: i64,
}

pub fn summarize_details(details: &[InvoiceDetail]) -> ExportSummary {
    let mut summary = ExportSummary {
        record_count: details.len(),
        ..Default::default()
    };

    for detail in details {
        if InvoiceStatus::try_from(detail.status).is_ok_and(|s| s.is_settled()) {
            summary.paid_count += 1;
        }
        if detail.refund.is_some() {
            summary.refunded_count += 1;
        }
        if detail.plan_snapshot.charge_type.is_plan_change() {
            summary.plan_change_count += 1;
        }
        summary.origin_amount_total = summary
            .origin_amount_total
            .saturating_add(detail.origin_amount);
        summary.discount_amount_total = summary
            .discount_amount_total
            .saturating_add(detail.discount_amount);
        summary.total_amount_total = summary
            .total_amount_total
            .saturating_add(detail.total_amount);
    }

    summary
}

fn status_label(code: i32) -> String {
    InvoiceStatus::try_from(code)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("unknown({code})"))
}

/// Minor units as a fixed two-decimal amount, without float rounding
fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

fn format_unix(timestamp: i64) -> String {
    if timestamp <= 0 {
        return String::new();
    }
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// Escape a field for CSV output
fn escape_csv_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
