//! Invoice and credit-note detail assembly
//!
//! Pure functions from an invoice row and a [`PreloadBundle`] to the view
//! objects returned to callers. Nothing here touches a store; the single and
//! bulk paths differ only in how the bundle was filled.

use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

use paylens_shared::{
    CreditTransaction, GatewayId, Invoice, InvoiceStatus, Merchant, MerchantDiscountCode,
    MerchantGateway, MerchantId, Payment, Refund, Subscription, UserAccount, UserId,
};

use crate::config::DetailConfig;
use crate::line_item::{drop_nulls, parse_lines, try_parse_lines, InvoiceLineItem};
use crate::pending_update::PendingUpdateDetail;
use crate::preload::PreloadBundle;
use crate::snapshot::{reconcile, PlanSnapshot};

/// `createFrom` value of invoices charged automatically against a saved method
pub const INVOICE_AUTO_CHARGE_FLAG: &str = "AutoCharge";

pub type Metadata = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// View objects
// =============================================================================

/// Reduced projection of the invoice a refund points back to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: i64,
    pub user_id: UserId,
    pub invoice_id: String,
    pub invoice_name: String,
    pub product_name: String,
    pub discount_code: String,
    pub origin_amount: i64,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub total_amount_excluding_tax: i64,
    pub currency: String,
    pub tax_amount: i64,
    pub tax_percentage: i64,
    pub subscription_amount: i64,
    pub subscription_amount_excluding_tax: i64,
    pub lines: Vec<InvoiceLineItem>,
    pub period_end: i64,
    pub period_start: i64,
    pub finish_time: i64,
    pub proration_date: i64,
    pub send_note: String,
    pub link: String,
    pub payment_link: String,
    pub status: i32,
    pub payment_id: String,
    pub refund_id: String,
    pub subscription_id: String,
    pub biz_type: i32,
    pub crypto_amount: i64,
    pub crypto_currency: String,
    pub send_status: i32,
    pub day_util_due: i64,
    pub trial_end: i64,
    pub billing_cycle_anchor: i64,
    pub create_from: String,
    pub metadata: Metadata,
    pub country_code: String,
    pub vat_number: String,
    pub auto_charge: bool,
    pub promo_credit_discount_amount: i64,
    pub partial_credit_paid_amount: i64,
    pub user_metric_charge_for_invoice: Option<serde_json::Value>,
}

impl InvoiceSummary {
    /// `None` when the invoice's `lines` blob is present but unreadable
    pub fn from_invoice(invoice: &Invoice, config: &DetailConfig) -> Option<Self> {
        let lines = match try_parse_lines(invoice) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Original invoice lines unreadable, dropping summary"
                );
                return None;
            }
        };

        Some(Self {
            id: invoice.id,
            user_id: invoice.user_id,
            invoice_id: invoice.invoice_id.clone(),
            invoice_name: invoice.invoice_name.clone(),
            product_name: invoice.product_name.clone(),
            discount_code: invoice.discount_code.clone(),
            origin_amount: invoice.origin_amount(),
            total_amount: invoice.total_amount,
            discount_amount: invoice.discount_amount,
            total_amount_excluding_tax: invoice.total_amount_excluding_tax,
            currency: invoice.currency.clone(),
            tax_amount: invoice.tax_amount,
            tax_percentage: invoice.tax_percentage,
            subscription_amount: invoice.subscription_amount,
            subscription_amount_excluding_tax: invoice.subscription_amount_excluding_tax,
            lines,
            period_end: invoice.period_end,
            period_start: invoice.period_start,
            finish_time: invoice.finish_time,
            proration_date: invoice.proration_date,
            send_note: invoice.send_note.clone(),
            link: config.invoice_link(&invoice.invoice_id),
            payment_link: invoice.payment_link.clone(),
            status: invoice.status,
            payment_id: invoice.payment_id.clone(),
            refund_id: invoice.refund_id.clone(),
            subscription_id: invoice.subscription_id.clone(),
            biz_type: invoice.biz_type,
            crypto_amount: invoice.crypto_amount,
            crypto_currency: invoice.crypto_currency.clone(),
            send_status: invoice.send_status,
            day_util_due: invoice.day_util_due,
            trial_end: invoice.trial_end,
            billing_cycle_anchor: invoice.billing_cycle_anchor,
            create_from: invoice.create_from.clone(),
            metadata: parse_metadata(invoice),
            country_code: invoice.country_code.clone(),
            vat_number: invoice.vat_number.clone(),
            auto_charge: invoice.create_from == INVOICE_AUTO_CHARGE_FLAG,
            promo_credit_discount_amount: invoice.promo_credit_discount_amount,
            partial_credit_paid_amount: invoice.partial_credit_paid_amount,
            user_metric_charge_for_invoice: parse_metric_charge(invoice),
        })
    }
}

/// Fully resolved invoice view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub subscription_id: String,
    pub invoice_name: String,
    pub product_name: String,
    pub invoice_id: String,
    pub gateway_invoice_id: String,
    pub unique_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gmt_create: Option<OffsetDateTime>,
    pub origin_amount: i64,
    pub total_amount: i64,
    pub discount_code: String,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub subscription_amount: i64,
    pub currency: String,
    pub lines: Vec<InvoiceLineItem>,
    pub gateway_id: GatewayId,
    pub status: i32,
    pub send_status: i32,
    pub send_email: String,
    pub send_pdf: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gmt_modify: Option<OffsetDateTime>,
    pub is_deleted: i32,
    pub link: String,
    pub gateway_status: String,
    pub gateway_payment_id: String,
    pub gateway_user_id: String,
    pub gateway_invoice_pdf: String,
    pub tax_percentage: i64,
    pub send_note: String,
    pub total_amount_excluding_tax: i64,
    pub subscription_amount_excluding_tax: i64,
    pub period_start: i64,
    pub period_end: i64,
    pub payment_id: String,
    pub refund_id: String,
    pub gateway: Option<MerchantGateway>,
    pub merchant: Option<Merchant>,
    pub user_account: Option<UserAccount>,
    pub user_snapshot: Option<UserAccount>,
    pub subscription: Option<Subscription>,
    pub subscription_pending_update: Option<PendingUpdateDetail>,
    pub payment: Option<Payment>,
    pub refund: Option<Refund>,
    pub discount: Option<MerchantDiscountCode>,
    pub crypto_amount: i64,
    pub crypto_currency: String,
    pub day_util_due: i64,
    pub billing_cycle_anchor: i64,
    pub create_from: String,
    pub metadata: Metadata,
    pub country_code: String,
    pub vat_number: String,
    pub finish_time: i64,
    pub create_time: i64,
    pub paid_time: i64,
    pub biz_type: i32,
    pub proration_date: i64,
    pub trial_end: i64,
    pub auto_charge: bool,
    pub original_payment_invoice: Option<InvoiceSummary>,
    pub promo_credit_discount_amount: i64,
    pub promo_credit_transaction: Option<CreditTransaction>,
    pub partial_credit_paid_amount: i64,
    pub message: String,
    pub user_metric_charge_for_invoice: Option<serde_json::Value>,
    pub plan_snapshot: PlanSnapshot,
}

/// Credit-note view of a refund invoice
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditNoteDetail {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub subscription_id: String,
    pub invoice_name: String,
    pub product_name: String,
    pub invoice_id: String,
    pub origin_amount: i64,
    pub total_amount: i64,
    pub discount_code: String,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub subscription_amount: i64,
    pub currency: String,
    pub lines: Vec<InvoiceLineItem>,
    pub gateway_id: GatewayId,
    pub status: i32,
    pub link: String,
    pub tax_percentage: i64,
    pub total_amount_excluding_tax: i64,
    pub subscription_amount_excluding_tax: i64,
    pub period_start: i64,
    pub period_end: i64,
    pub payment_id: String,
    pub refund_id: String,
    pub gateway: Option<MerchantGateway>,
    pub user_snapshot: Option<UserAccount>,
    pub subscription: Option<Subscription>,
    pub payment: Option<Payment>,
    pub refund: Option<Refund>,
    pub discount: Option<MerchantDiscountCode>,
    pub create_from: String,
    pub metadata: Metadata,
    pub country_code: String,
    pub vat_number: String,
    pub finish_time: i64,
    pub create_time: i64,
    pub paid_time: i64,
    pub biz_type: i32,
    pub original_payment_invoice: Option<InvoiceSummary>,
    pub promo_credit_discount_amount: i64,
    pub promo_credit_transaction: Option<CreditTransaction>,
    pub partial_credit_paid_amount: i64,
    pub message: String,
    pub plan_snapshot: PlanSnapshot,
}

// =============================================================================
// Derived fields
// =============================================================================

/// Settlement time for paid or reversed invoices, zero otherwise.
///
/// Precedence: refund time, payment time, last modification, finish time,
/// creation time.
pub fn paid_time(invoice: &Invoice, payment: Option<&Payment>, refund: Option<&Refund>) -> i64 {
    if !invoice.status().is_some_and(|s| s.is_settled()) {
        return 0;
    }
    if let Some(refund) = refund.filter(|r| r.refund_time > 0) {
        return refund.refund_time;
    }
    if let Some(payment) = payment.filter(|p| p.paid_time > 0) {
        return payment.paid_time;
    }
    if let Some(modified) = invoice.gmt_modify {
        return modified.unix_timestamp();
    }
    if invoice.finish_time > 0 {
        return invoice.finish_time;
    }
    invoice.create_time
}

/// Refund comment, with the explanation appended for failed invoices
pub fn message(invoice: &Invoice, refund: Option<&Refund>) -> String {
    let Some(refund) = refund else {
        return String::new();
    };
    if invoice.status() == Some(InvoiceStatus::Failed) {
        format!("{}, {}", refund.refund_comment, refund.refund_comment_explain)
    } else {
        refund.refund_comment.clone()
    }
}

/// Invoice `metaData` as a string-keyed map. Anything else is logged and dropped.
pub fn parse_metadata(invoice: &Invoice) -> Metadata {
    let raw = match invoice.meta_data.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Metadata::new(),
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(serde_json::Value::Null) => Metadata::new(),
        Ok(other) => {
            warn!(
                invoice_id = %invoice.invoice_id,
                kind = json_kind(&other),
                "Invoice metadata is not an object"
            );
            Metadata::new()
        }
        Err(e) => {
            warn!(
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Failed to parse invoice metadata"
            );
            Metadata::new()
        }
    }
}

/// User snapshot stored in the invoice `data` blob, if any
pub fn parse_user_snapshot(invoice: &Invoice) -> Option<UserAccount> {
    let raw = invoice.data.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    let parsed = serde_json::from_str::<serde_json::Value>(raw).and_then(|mut value| {
        drop_nulls(&mut value);
        serde_json::from_value::<Option<UserAccount>>(value)
    });
    match parsed {
        Ok(user) => user,
        Err(e) => {
            warn!(
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Failed to parse user snapshot"
            );
            None
        }
    }
}

/// Any non-empty blob counts, even one that will not parse
fn has_user_snapshot_blob(invoice: &Invoice) -> bool {
    invoice.data.as_deref().is_some_and(|s| !s.is_empty())
}

/// Metered-charge breakdown attached to the invoice, if any
pub fn parse_metric_charge(invoice: &Invoice) -> Option<serde_json::Value> {
    let raw = invoice
        .metric_charge
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Failed to parse metric charge"
            );
            None
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Parts shared by both detail shapes
struct Resolved {
    lines: Vec<InvoiceLineItem>,
    metadata: Metadata,
    payment: Option<Payment>,
    refund: Option<Refund>,
    original_payment_invoice: Option<InvoiceSummary>,
    message: String,
    paid_time: i64,
    pending_update: Option<PendingUpdateDetail>,
    plan_snapshot: PlanSnapshot,
}

fn resolve(invoice: &Invoice, bundle: &PreloadBundle, config: &DetailConfig) -> Resolved {
    let lines = parse_lines(invoice);
    let metadata = parse_metadata(invoice);
    let payment = bundle.payment_for(invoice).cloned();
    let refund = bundle.refund_for(invoice).cloned();

    let original_payment_invoice = refund
        .as_ref()
        .and_then(|_| bundle.original_invoice_for(invoice))
        .and_then(|original| InvoiceSummary::from_invoice(original, config));

    let pending = bundle.pending_update_for(invoice);
    let (pending_update, plan_snapshot) = reconcile(
        &invoice.invoice_name,
        &invoice.create_from,
        &metadata,
        &lines,
        pending.as_ref(),
    );

    Resolved {
        message: message(invoice, refund.as_ref()),
        paid_time: paid_time(invoice, payment.as_ref(), refund.as_ref()),
        lines,
        metadata,
        payment,
        refund,
        original_payment_invoice,
        pending_update,
        plan_snapshot,
    }
}

pub fn assemble_invoice_detail(
    invoice: &Invoice,
    bundle: &PreloadBundle,
    config: &DetailConfig,
) -> InvoiceDetail {
    let parts = resolve(invoice, bundle, config);

    InvoiceDetail {
        id: invoice.id,
        merchant_id: invoice.merchant_id,
        user_id: invoice.user_id,
        subscription_id: invoice.subscription_id.clone(),
        invoice_name: invoice.invoice_name.clone(),
        product_name: invoice.product_name.clone(),
        invoice_id: invoice.invoice_id.clone(),
        gateway_invoice_id: invoice.gateway_invoice_id.clone(),
        unique_id: invoice.unique_id.clone(),
        gmt_create: invoice.gmt_create,
        origin_amount: invoice.origin_amount(),
        total_amount: invoice.total_amount,
        discount_code: invoice.discount_code.clone(),
        discount_amount: invoice.discount_amount,
        tax_amount: invoice.tax_amount,
        subscription_amount: invoice.subscription_amount,
        currency: invoice.currency.clone(),
        lines: parts.lines,
        gateway_id: invoice.gateway_id,
        status: invoice.status,
        send_status: invoice.send_status,
        send_email: invoice.send_email.clone(),
        send_pdf: config.invoice_pdf_link(&invoice.invoice_id),
        gmt_modify: invoice.gmt_modify,
        is_deleted: invoice.is_deleted,
        link: config.invoice_link(&invoice.invoice_id),
        gateway_status: invoice.gateway_status.clone(),
        gateway_payment_id: invoice.gateway_payment_id.clone(),
        gateway_user_id: invoice.gateway_user_id.clone(),
        gateway_invoice_pdf: invoice.gateway_invoice_pdf.clone(),
        tax_percentage: invoice.tax_percentage,
        send_note: invoice.send_note.clone(),
        total_amount_excluding_tax: invoice.total_amount_excluding_tax,
        subscription_amount_excluding_tax: invoice.subscription_amount_excluding_tax,
        period_start: invoice.period_start,
        period_end: invoice.period_end,
        payment_id: invoice.payment_id.clone(),
        refund_id: invoice.refund_id.clone(),
        gateway: bundle.gateway_for(invoice).cloned(),
        merchant: bundle.merchant_for(invoice).cloned(),
        user_account: bundle.user_for(invoice).cloned(),
        user_snapshot: parse_user_snapshot(invoice),
        subscription: bundle.subscription_for(invoice).cloned(),
        subscription_pending_update: parts.pending_update,
        payment: parts.payment,
        refund: parts.refund,
        discount: bundle.discount_for(invoice).cloned(),
        crypto_amount: invoice.crypto_amount,
        crypto_currency: invoice.crypto_currency.clone(),
        day_util_due: invoice.day_util_due,
        billing_cycle_anchor: invoice.billing_cycle_anchor,
        create_from: invoice.create_from.clone(),
        metadata: parts.metadata,
        country_code: invoice.country_code.clone(),
        vat_number: invoice.vat_number.clone(),
        finish_time: invoice.finish_time,
        create_time: invoice.create_time,
        paid_time: parts.paid_time,
        biz_type: invoice.biz_type,
        proration_date: invoice.proration_date,
        trial_end: invoice.trial_end,
        auto_charge: invoice.create_from == INVOICE_AUTO_CHARGE_FLAG,
        original_payment_invoice: parts.original_payment_invoice,
        promo_credit_discount_amount: invoice.promo_credit_discount_amount,
        promo_credit_transaction: bundle.promo_credit_for(invoice).cloned(),
        partial_credit_paid_amount: invoice.partial_credit_paid_amount,
        message: parts.message,
        user_metric_charge_for_invoice: parse_metric_charge(invoice),
        plan_snapshot: parts.plan_snapshot,
    }
}

pub fn assemble_credit_note_detail(
    invoice: &Invoice,
    bundle: &PreloadBundle,
    config: &DetailConfig,
) -> CreditNoteDetail {
    let parts = resolve(invoice, bundle, config);

    // Older credit notes carry no snapshot; fall back to the live account
    let user_snapshot = if has_user_snapshot_blob(invoice) {
        parse_user_snapshot(invoice)
    } else {
        bundle.user_for(invoice).cloned()
    };

    CreditNoteDetail {
        id: invoice.id,
        merchant_id: invoice.merchant_id,
        user_id: invoice.user_id,
        subscription_id: invoice.subscription_id.clone(),
        invoice_name: invoice.invoice_name.clone(),
        product_name: invoice.product_name.clone(),
        invoice_id: invoice.invoice_id.clone(),
        origin_amount: invoice.origin_amount(),
        total_amount: invoice.total_amount,
        discount_code: invoice.discount_code.clone(),
        discount_amount: invoice.discount_amount,
        tax_amount: invoice.tax_amount,
        subscription_amount: invoice.subscription_amount,
        currency: invoice.currency.clone(),
        lines: parts.lines,
        gateway_id: invoice.gateway_id,
        status: invoice.status,
        link: config.invoice_link(&invoice.invoice_id),
        tax_percentage: invoice.tax_percentage,
        total_amount_excluding_tax: invoice.total_amount_excluding_tax,
        subscription_amount_excluding_tax: invoice.subscription_amount_excluding_tax,
        period_start: invoice.period_start,
        period_end: invoice.period_end,
        payment_id: invoice.payment_id.clone(),
        refund_id: invoice.refund_id.clone(),
        gateway: bundle.gateway_for(invoice).cloned(),
        user_snapshot,
        subscription: bundle.subscription_for(invoice).cloned(),
        payment: parts.payment,
        refund: parts.refund,
        discount: bundle.discount_for(invoice).cloned(),
        create_from: invoice.create_from.clone(),
        metadata: parts.metadata,
        country_code: invoice.country_code.clone(),
        vat_number: invoice.vat_number.clone(),
        finish_time: invoice.finish_time,
        create_time: invoice.create_time,
        paid_time: parts.paid_time,
        biz_type: invoice.biz_type,
        original_payment_invoice: parts.original_payment_invoice,
        promo_credit_discount_amount: invoice.promo_credit_discount_amount,
        promo_credit_transaction: bundle.promo_credit_for(invoice).cloned(),
        partial_credit_paid_amount: invoice.partial_credit_paid_amount,
        message: parts.message,
        plan_snapshot: parts.plan_snapshot,
    }
}
