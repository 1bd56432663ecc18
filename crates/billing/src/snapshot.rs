//! Plan snapshot reconciliation
//!
//! Reconstructs which plan and addons an invoice charged for, and on plan
//! changes which ones it moved away from. Three sources are consulted in order
//! of authority:
//!
//! 1. the pending-update record raised with an upgrade or downgrade invoice
//! 2. the sign of each line's tax-excluded amount (credits belong to the old plan)
//! 3. the `IsUpgrade` metadata flag, which only decides the charge type
//!
//! Everything here is pure; no lookups happen during reconciliation.

use serde::Serialize;
use tracing::warn;

use paylens_shared::Plan;

use crate::line_item::{InvoiceLineItem, LineKind};
use crate::pending_update::PendingUpdateDetail;

pub const INVOICE_NAME_CREATE: &str = "SubscriptionCreate";
pub const INVOICE_NAME_RENEW: &str = "SubscriptionRenew";
pub const INVOICE_NAME_CYCLE: &str = "SubscriptionCycle";
pub const INVOICE_NAME_DOWNGRADE: &str = "SubscriptionDowngrade";
pub const INVOICE_NAME_UPDATE: &str = "SubscriptionUpdate";

/// `createFrom` value of invoices raised by automatic renewal
pub const CREATE_FROM_AUTO_RENEW: &str = "AutoRenew";

const METADATA_IS_UPGRADE: &str = "IsUpgrade";

/// Billing event the invoice was raised for. Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "i32")]
pub enum ChargeType {
    #[default]
    OneTime,
    SubscriptionCreate,
    SubscriptionUpgrade,
    SubscriptionDowngrade,
    SubscriptionRenew,
    SubscriptionCycle,
}

impl ChargeType {
    pub fn code(&self) -> i32 {
        match self {
            ChargeType::OneTime => 0,
            ChargeType::SubscriptionCreate => 1,
            ChargeType::SubscriptionUpgrade => 2,
            ChargeType::SubscriptionDowngrade => 3,
            ChargeType::SubscriptionRenew => 4,
            ChargeType::SubscriptionCycle => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::OneTime => "one_time",
            ChargeType::SubscriptionCreate => "subscription_create",
            ChargeType::SubscriptionUpgrade => "subscription_upgrade",
            ChargeType::SubscriptionDowngrade => "subscription_downgrade",
            ChargeType::SubscriptionRenew => "subscription_renew",
            ChargeType::SubscriptionCycle => "subscription_cycle",
        }
    }

    pub fn is_plan_change(&self) -> bool {
        matches!(
            self,
            ChargeType::SubscriptionUpgrade | ChargeType::SubscriptionDowngrade
        )
    }

    /// Classify by exact invoice name. `SubscriptionUpdate` is an upgrade unless
    /// the metadata explicitly says otherwise.
    pub fn classify(
        invoice_name: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        match invoice_name {
            INVOICE_NAME_CREATE => ChargeType::SubscriptionCreate,
            INVOICE_NAME_RENEW => ChargeType::SubscriptionRenew,
            INVOICE_NAME_CYCLE => ChargeType::SubscriptionCycle,
            INVOICE_NAME_DOWNGRADE => ChargeType::SubscriptionDowngrade,
            INVOICE_NAME_UPDATE => {
                if is_upgrade_flag_false(metadata.get(METADATA_IS_UPGRADE)) {
                    ChargeType::SubscriptionDowngrade
                } else {
                    ChargeType::SubscriptionUpgrade
                }
            }
            _ => ChargeType::OneTime,
        }
    }
}

impl From<ChargeType> for i32 {
    fn from(charge_type: ChargeType) -> Self {
        charge_type.code()
    }
}

fn is_upgrade_flag_false(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(flag)) => !flag,
        Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("false"),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAddonDetail {
    pub quantity: i64,
    pub addon_plan: Option<Plan>,
}

/// Plan composition in effect around a billing event. Derived, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshot {
    pub charge_type: ChargeType,
    pub auto_charge: bool,
    pub plan: Option<Plan>,
    pub addons: Vec<PlanAddonDetail>,
    pub previous_plan: Option<Plan>,
    pub previous_addons: Vec<PlanAddonDetail>,
}

/// Which half of the snapshot a line is applied to
#[derive(Clone, Copy)]
enum Side {
    Current,
    Previous,
}

impl PlanSnapshot {
    fn apply_line(&mut self, line: &InvoiceLineItem, side: Side, invoice_name: &str) {
        let Some(plan) = line.plan.as_ref() else {
            return;
        };
        let (slot, addons) = match side {
            Side::Current => (&mut self.plan, &mut self.addons),
            Side::Previous => (&mut self.previous_plan, &mut self.previous_addons),
        };
        match line.kind() {
            LineKind::Addon => addons.push(PlanAddonDetail {
                quantity: line.quantity,
                addon_plan: Some(plan.clone()),
            }),
            LineKind::MainPlan => {
                if let Some(existing) = slot.as_ref() {
                    if existing.id != plan.id {
                        warn!(
                            invoice_name = %invoice_name,
                            replaced_plan_id = %existing.id,
                            plan_id = %plan.id,
                            "Multiple main-plan lines, keeping the last one"
                        );
                    }
                }
                *slot = Some(plan.clone());
            }
            LineKind::Tax | LineKind::Other => {}
        }
    }
}

/// Reconcile the plan snapshot of one invoice.
///
/// Returns the pending update only when it was actually used, i.e. on a plan
/// change where a record exists.
pub fn reconcile(
    invoice_name: &str,
    create_from: &str,
    metadata: &serde_json::Map<String, serde_json::Value>,
    lines: &[InvoiceLineItem],
    pending: Option<&PendingUpdateDetail>,
) -> (Option<PendingUpdateDetail>, PlanSnapshot) {
    let mut snapshot = PlanSnapshot {
        charge_type: ChargeType::classify(invoice_name, metadata),
        auto_charge: create_from == CREATE_FROM_AUTO_RENEW,
        ..Default::default()
    };

    if !snapshot.charge_type.is_plan_change() {
        for line in lines {
            snapshot.apply_line(line, Side::Current, invoice_name);
        }
        return (None, snapshot);
    }

    if let Some(pending) = pending {
        snapshot.plan = pending.update_plan.clone();
        snapshot.addons = pending.update_addons.clone();
        snapshot.previous_plan = pending.plan.clone();
        snapshot.previous_addons = pending.addons.clone();
        return (Some(pending.clone()), snapshot);
    }

    for line in lines {
        let side = if line.is_credit() {
            Side::Previous
        } else {
            Side::Current
        };
        snapshot.apply_line(line, side, invoice_name);
    }
    (None, snapshot)
}
