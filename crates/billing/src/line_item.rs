//! Invoice line items

use serde::{Deserialize, Serialize};
use tracing::warn;

use paylens_shared::{Invoice, Plan};

/// One entry of an invoice's `lines` JSON.
///
/// Amounts are minor units. On upgrade and downgrade invoices a negative
/// `amount_excluding_tax` marks a credit for the plan being left.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceLineItem {
    pub currency: String,
    pub origin_amount: i64,
    pub origin_unit_amount_exclude_tax: i64,
    pub discount_amount: i64,
    pub amount: i64,
    pub tax: i64,
    pub amount_excluding_tax: i64,
    pub tax_percentage: i64,
    pub unit_amount_excluding_tax: i64,
    pub name: String,
    pub description: String,
    pub pdf_description: String,
    pub proration: bool,
    pub quantity: i64,
    pub period_end: i64,
    pub period_start: i64,
    pub plan: Option<Plan>,
    pub metric_charge: Option<serde_json::Value>,
}

/// What a line contributes to the plan snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    MainPlan,
    Addon,
    Tax,
    Other,
}

impl InvoiceLineItem {
    pub fn kind(&self) -> LineKind {
        match &self.plan {
            Some(plan) if plan.is_recurring_addon() => LineKind::Addon,
            Some(_) => LineKind::MainPlan,
            None if self.amount_excluding_tax == 0 && self.tax != 0 => LineKind::Tax,
            None => LineKind::Other,
        }
    }

    /// Credit lines on a plan change belong to the plan being left
    pub fn is_credit(&self) -> bool {
        self.amount_excluding_tax < 0
    }
}

/// Parse an invoice's `lines` blob. Currency and tax rate always come from the
/// invoice itself. Malformed input is logged and yields no lines.
pub fn parse_lines(invoice: &Invoice) -> Vec<InvoiceLineItem> {
    match try_parse_lines(invoice) {
        Ok(lines) => lines,
        Err(e) => {
            warn!(
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Failed to parse invoice lines"
            );
            Vec::new()
        }
    }
}

/// Strict variant used for the original-invoice summary, where a broken
/// `lines` blob discards the whole summary.
pub(crate) fn try_parse_lines(invoice: &Invoice) -> Result<Vec<InvoiceLineItem>, serde_json::Error> {
    let raw = match invoice.lines.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Vec::new()),
    };
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    drop_nulls(&mut value);
    if let serde_json::Value::Array(items) = &mut value {
        items.retain(|item| !item.is_null());
    }
    let lines: Option<Vec<InvoiceLineItem>> = serde_json::from_value(value)?;
    Ok(lines
        .unwrap_or_default()
        .into_iter()
        .map(|mut line| {
            line.currency = invoice.currency.clone();
            line.tax_percentage = invoice.tax_percentage;
            line
        })
        .collect())
}

/// Remove `null` object members at any depth, so an explicit null reads the
/// same as an absent field and falls back to the field default.
pub(crate) fn drop_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}
