//! Pending subscription updates with their plans resolved

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use paylens_shared::{Plan, PlanId, SubscriptionPendingUpdate};

use crate::snapshot::PlanAddonDetail;

/// One entry of a pending update's `addon_data` / `update_addon_data` blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddonParam {
    pub quantity: i64,
    pub addon_plan_id: PlanId,
}

/// Parse an addon blob, logging and discarding malformed input
pub fn parse_addon_params(raw: &str, pending_update_id: &str) -> Vec<AddonParam> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Option<Vec<AddonParam>>>(raw) {
        Ok(params) => params.unwrap_or_default(),
        Err(e) => {
            warn!(
                pending_update_id = %pending_update_id,
                error = %e,
                "Failed to parse pending update addon data"
            );
            Vec::new()
        }
    }
}

/// Every plan id a pending update refers to, addon plans included
pub fn referenced_plan_ids(record: &SubscriptionPendingUpdate) -> Vec<PlanId> {
    let mut ids = vec![record.plan_id, record.update_plan_id];
    for raw in [&record.addon_data, &record.update_addon_data] {
        ids.extend(
            parse_addon_params(raw, &record.pending_update_id)
                .into_iter()
                .map(|p| p.addon_plan_id),
        );
    }
    ids.retain(PlanId::is_set);
    ids
}

/// Pending update record plus the plans it moves between
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdateDetail {
    #[serde(flatten)]
    pub record: SubscriptionPendingUpdate,
    pub plan: Option<Plan>,
    pub addons: Vec<PlanAddonDetail>,
    pub update_plan: Option<Plan>,
    pub update_addons: Vec<PlanAddonDetail>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PendingUpdateDetail {
    /// Resolve plan references against an already-fetched plan map
    pub fn resolve(record: &SubscriptionPendingUpdate, plans: &HashMap<PlanId, Plan>) -> Self {
        let plan = plans.get(&record.plan_id).cloned();
        let update_plan = plans.get(&record.update_plan_id).cloned();
        let addons = resolve_addons(&record.addon_data, &record.pending_update_id, plans);
        let update_addons =
            resolve_addons(&record.update_addon_data, &record.pending_update_id, plans);

        Self {
            record: record.clone(),
            plan,
            addons,
            update_plan,
            update_addons,
            metadata: parse_record_metadata(record),
        }
    }
}

fn resolve_addons(
    raw: &str,
    pending_update_id: &str,
    plans: &HashMap<PlanId, Plan>,
) -> Vec<PlanAddonDetail> {
    parse_addon_params(raw, pending_update_id)
        .into_iter()
        .filter_map(|param| match plans.get(&param.addon_plan_id) {
            Some(plan) => Some(PlanAddonDetail {
                quantity: param.quantity,
                addon_plan: Some(plan.clone()),
            }),
            None => {
                debug!(
                    pending_update_id = %pending_update_id,
                    addon_plan_id = %param.addon_plan_id,
                    "Addon plan not found, dropping addon"
                );
                None
            }
        })
        .collect()
}

fn parse_record_metadata(
    record: &SubscriptionPendingUpdate,
) -> serde_json::Map<String, serde_json::Value> {
    let raw = record.meta_data.trim();
    if raw.is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(e) => {
            warn!(
                pending_update_id = %record.pending_update_id,
                error = %e,
                "Failed to parse pending update metadata"
            );
            serde_json::Map::new()
        }
    }
}
