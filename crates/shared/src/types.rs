//! Ledger rows and identifiers used across Paylens

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use time::OffsetDateTime;

use crate::error::PaylensError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Merchant ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MerchantId(pub i64);

impl MerchantId {
    /// Zero is the ledger's "unset" marker
    pub fn is_set(&self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for MerchantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn is_set(&self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment gateway ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct GatewayId(pub i64);

impl GatewayId {
    pub fn is_set(&self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for GatewayId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plan ID wrapper (main plans and addon plans share the id space)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PlanId(pub i64);

impl PlanId {
    pub fn is_set(&self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for PlanId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Invoice lifecycle status as stored in `invoice.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Init,
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Reversed,
}

impl InvoiceStatus {
    pub fn code(&self) -> i32 {
        match self {
            InvoiceStatus::Init => 0,
            InvoiceStatus::Pending => 1,
            InvoiceStatus::Processing => 2,
            InvoiceStatus::Paid => 3,
            InvoiceStatus::Failed => 4,
            InvoiceStatus::Cancelled => 5,
            InvoiceStatus::Reversed => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Init => "init",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Reversed => "reversed",
        }
    }

    /// Whether the invoice reached a state that carries a paid time
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Reversed)
    }
}

impl TryFrom<i32> for InvoiceStatus {
    type Error = PaylensError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(InvoiceStatus::Init),
            1 => Ok(InvoiceStatus::Pending),
            2 => Ok(InvoiceStatus::Processing),
            3 => Ok(InvoiceStatus::Paid),
            4 => Ok(InvoiceStatus::Failed),
            5 => Ok(InvoiceStatus::Cancelled),
            6 => Ok(InvoiceStatus::Reversed),
            _ => Err(PaylensError::Validation(format!(
                "Invalid invoice status code: {}",
                code
            ))),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plan type tag as stored in `plan.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    MainPlan,
    RecurringAddon,
    OnetimeAddon,
}

impl PlanType {
    pub fn code(&self) -> i32 {
        match self {
            PlanType::MainPlan => 1,
            PlanType::RecurringAddon => 2,
            PlanType::OnetimeAddon => 3,
        }
    }
}

impl TryFrom<i32> for PlanType {
    type Error = PaylensError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PlanType::MainPlan),
            2 => Ok(PlanType::RecurringAddon),
            3 => Ok(PlanType::OnetimeAddon),
            _ => Err(PaylensError::Validation(format!(
                "Invalid plan type: {}",
                code
            ))),
        }
    }
}

// =============================================================================
// Invoice
// =============================================================================

/// Invoice ledger row. Immutable once paid; `lines`, `meta_data`, `data` and
/// `metric_charge` are loosely-typed JSON text and may be empty or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Invoice {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub subscription_id: String,
    pub invoice_id: String,
    pub invoice_name: String,
    pub product_name: String,
    pub unique_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gmt_create: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gmt_modify: Option<OffsetDateTime>,
    pub total_amount: i64,
    pub discount_code: String,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub subscription_amount: i64,
    pub currency: String,
    pub lines: Option<String>,
    pub gateway_id: GatewayId,
    pub status: i32,
    pub send_status: i32,
    pub send_email: String,
    pub is_deleted: i32,
    pub gateway_status: String,
    pub gateway_payment_id: String,
    pub gateway_user_id: String,
    pub gateway_invoice_id: String,
    pub gateway_invoice_pdf: String,
    pub tax_percentage: i64,
    pub send_note: String,
    pub total_amount_excluding_tax: i64,
    pub subscription_amount_excluding_tax: i64,
    pub period_start: i64,
    pub period_end: i64,
    pub payment_id: String,
    pub refund_id: String,
    pub crypto_amount: i64,
    pub crypto_currency: String,
    pub day_util_due: i64,
    pub billing_cycle_anchor: i64,
    pub create_from: String,
    pub meta_data: Option<String>,
    pub country_code: String,
    pub vat_number: String,
    pub finish_time: i64,
    pub create_time: i64,
    pub biz_type: i32,
    pub proration_date: i64,
    pub trial_end: i64,
    pub data: Option<String>,
    pub metric_charge: Option<String>,
    pub promo_credit_discount_amount: i64,
    pub partial_credit_paid_amount: i64,
    pub payment_link: String,
}

impl Invoice {
    /// Parsed status, `None` for codes outside the known set
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::try_from(self.status).ok()
    }

    /// Amount before discount and promo credit were applied. Saturates at the i64 bounds.
    pub fn origin_amount(&self) -> i64 {
        self.total_amount
            .saturating_add(self.discount_amount)
            .saturating_add(self.promo_credit_discount_amount)
    }
}

// =============================================================================
// Collaborator Rows
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Payment {
    pub id: i64,
    pub payment_id: String,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub subscription_id: String,
    pub invoice_id: String,
    pub gateway_id: GatewayId,
    pub currency: String,
    pub total_amount: i64,
    pub payment_amount: i64,
    pub refund_amount: i64,
    pub status: i32,
    pub authorize_status: i32,
    pub gateway_payment_id: String,
    pub gateway_payment_type: String,
    pub biz_type: i32,
    pub create_time: i64,
    pub paid_time: i64,
    pub cancel_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Refund {
    pub id: i64,
    pub refund_id: String,
    pub payment_id: String,
    pub invoice_id: String,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub gateway_id: GatewayId,
    pub gateway_refund_id: String,
    pub currency: String,
    pub refund_amount: i64,
    pub status: i32,
    pub refund_comment: String,
    pub refund_comment_explain: String,
    pub refund_time: i64,
    pub create_time: i64,
}

/// Merchant-configured payment gateway. Credentials never leave the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct MerchantGateway {
    #[serde(rename = "gatewayId")]
    pub id: GatewayId,
    pub merchant_id: MerchantId,
    pub name: String,
    pub gateway_name: String,
    pub display_name: String,
    pub description: String,
    pub gateway_logo: String,
    pub gateway_type: i64,
    #[serde(skip_serializing)]
    pub gateway_key: String,
    #[serde(skip_serializing)]
    pub gateway_secret: String,
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    pub create_time: i64,
}

/// User account row. Also the shape of the user snapshot stored in `invoice.data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAccount {
    pub id: UserId,
    pub merchant_id: MerchantId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_name: String,
    pub phone: String,
    pub address: String,
    pub country_code: String,
    pub country_name: String,
    pub vat_number: String,
    pub company_name: String,
    pub external_user_id: String,
    pub status: i32,
    pub create_time: i64,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub id: i64,
    pub subscription_id: String,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub gateway_id: GatewayId,
    pub quantity: i64,
    pub amount: i64,
    pub currency: String,
    pub status: i32,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub cancel_at_period_end: i32,
    pub trial_end: i64,
    pub create_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Merchant {
    pub id: MerchantId,
    pub name: String,
    pub company_name: String,
    pub email: String,
    pub host: String,
    pub home_url: String,
    pub country_code: String,
    pub create_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct MerchantDiscountCode {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub code: String,
    pub name: String,
    pub status: i32,
    pub billing_type: i32,
    pub discount_type: i32,
    pub discount_amount: i64,
    pub discount_percentage: i64,
    pub currency: String,
    pub cycle_limit: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub create_time: i64,
}

/// Credit ledger entry; promo-credit entries are the ones with `account_type == 2`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct CreditTransaction {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub user_id: UserId,
    pub credit_id: i64,
    pub account_type: i32,
    pub currency: String,
    pub invoice_id: String,
    pub transaction_id: String,
    pub transaction_type: i32,
    pub credit_amount_before: i64,
    pub credit_amount_after: i64,
    pub delta_amount: i64,
    pub delta_currency_amount: i64,
    pub name: String,
    pub description: String,
    pub create_time: i64,
}

pub const CREDIT_ACCOUNT_TYPE_PROMO: i32 = 2;

/// Authoritative plan-change request recorded when an upgrade or downgrade
/// invoice is raised. `addon_data` columns hold `[{"quantity":n,"addonPlanId":id}]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionPendingUpdate {
    pub id: i64,
    pub merchant_id: MerchantId,
    pub gateway_id: GatewayId,
    pub user_id: UserId,
    pub pending_update_id: String,
    pub invoice_id: String,
    pub subscription_id: String,
    pub amount: i64,
    pub update_amount: i64,
    pub proration_amount: i64,
    pub currency: String,
    pub update_currency: String,
    pub plan_id: PlanId,
    pub update_plan_id: PlanId,
    pub quantity: i64,
    pub update_quantity: i64,
    pub addon_data: String,
    pub update_addon_data: String,
    pub status: i32,
    pub prorate: i32,
    pub effect_immediate: i32,
    pub effect_time: i64,
    pub note: String,
    pub proration_date: i64,
    pub create_time: i64,
    pub meta_data: String,
}

/// Plan row. Also embedded in invoice line items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    pub id: PlanId,
    pub merchant_id: MerchantId,
    pub plan_name: String,
    pub internal_name: String,
    pub amount: i64,
    pub currency: String,
    pub interval_unit: String,
    pub interval_count: i32,
    pub description: String,
    pub image_url: String,
    pub home_url: String,
    pub tax_percentage: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub plan_type: i32,
    pub status: i32,
    pub binding_addon_ids: String,
    pub publish_status: i32,
    pub external_plan_id: String,
    pub product_id: i64,
    pub disable_auto_charge: i32,
    pub create_time: i64,
}

impl Plan {
    pub fn kind(&self) -> Option<PlanType> {
        PlanType::try_from(self.plan_type).ok()
    }

    pub fn is_recurring_addon(&self) -> bool {
        self.kind() == Some(PlanType::RecurringAddon)
    }
}
