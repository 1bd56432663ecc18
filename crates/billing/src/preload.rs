//! Batched cross-entity preloading
//!
//! Bulk detail assembly never queries per row. The batcher scans the invoices
//! once, collects the distinct foreign keys of every collaborator kind and issues
//! one batched fetch per kind. A failing kind is logged and left empty; the rest
//! of the bundle is still usable.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use tracing::{debug, warn};

use paylens_shared::{
    CreditTransaction, GatewayId, Invoice, Merchant, MerchantDiscountCode, MerchantGateway,
    MerchantId, Payment, Plan, PlanId, Refund, Subscription, SubscriptionPendingUpdate,
    UserAccount, UserId,
};

use crate::error::BillingResult;
use crate::pending_update::{referenced_plan_ids, PendingUpdateDetail};
use crate::store::{CollaboratorStore, DiscountKey, PromoCreditKey};

/// Which detail shape the bundle is being loaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadScope {
    Invoice,
    /// Credit notes carry no merchant, so merchants are not fetched
    CreditNote,
}

/// Request-scoped lookup maps for a batch of invoices
#[derive(Debug, Clone, Default)]
pub struct PreloadBundle {
    pub payments: HashMap<String, Payment>,
    pub refunds: HashMap<String, Refund>,
    pub gateways: HashMap<GatewayId, MerchantGateway>,
    pub users: HashMap<UserId, UserAccount>,
    pub subscriptions: HashMap<String, Subscription>,
    pub merchants: HashMap<MerchantId, Merchant>,
    pub discounts: HashMap<DiscountKey, MerchantDiscountCode>,
    /// Keyed by the invoice id recorded on the refunded payment
    pub original_invoices: HashMap<String, Invoice>,
    pub promo_credit_transactions: HashMap<PromoCreditKey, CreditTransaction>,
    /// Keyed by the invoice the pending update was raised with
    pub pending_updates: HashMap<String, SubscriptionPendingUpdate>,
    pub plans: HashMap<PlanId, Plan>,
}

impl PreloadBundle {
    pub fn payment_for(&self, invoice: &Invoice) -> Option<&Payment> {
        self.payments.get(&invoice.payment_id)
    }

    pub fn refund_for(&self, invoice: &Invoice) -> Option<&Refund> {
        self.refunds.get(&invoice.refund_id)
    }

    pub fn gateway_for(&self, invoice: &Invoice) -> Option<&MerchantGateway> {
        self.gateways.get(&invoice.gateway_id)
    }

    pub fn user_for(&self, invoice: &Invoice) -> Option<&UserAccount> {
        self.users.get(&invoice.user_id)
    }

    pub fn subscription_for(&self, invoice: &Invoice) -> Option<&Subscription> {
        self.subscriptions.get(&invoice.subscription_id)
    }

    pub fn merchant_for(&self, invoice: &Invoice) -> Option<&Merchant> {
        self.merchants.get(&invoice.merchant_id)
    }

    pub fn discount_for(&self, invoice: &Invoice) -> Option<&MerchantDiscountCode> {
        if invoice.discount_code.is_empty() {
            return None;
        }
        self.discounts
            .get(&DiscountKey::new(invoice.merchant_id, invoice.discount_code.clone()))
    }

    /// The invoice the refunded payment originally settled
    pub fn original_invoice_for(&self, invoice: &Invoice) -> Option<&Invoice> {
        let payment = self.payment_for(invoice)?;
        if payment.invoice_id.is_empty() {
            return None;
        }
        self.original_invoices.get(&payment.invoice_id)
    }

    pub fn promo_credit_for(&self, invoice: &Invoice) -> Option<&CreditTransaction> {
        self.promo_credit_transactions
            .get(&PromoCreditKey::new(invoice.user_id, invoice.invoice_id.clone()))
    }

    pub fn pending_update_for(&self, invoice: &Invoice) -> Option<PendingUpdateDetail> {
        self.pending_updates
            .get(&invoice.invoice_id)
            .map(|record| PendingUpdateDetail::resolve(record, &self.plans))
    }
}

/// Distinct foreign keys of a batch, in deterministic order
#[derive(Debug, Default)]
pub struct PreloadKeys {
    pub invoice_ids: BTreeSet<String>,
    pub payment_ids: BTreeSet<String>,
    pub refund_ids: BTreeSet<String>,
    pub gateway_ids: BTreeSet<GatewayId>,
    pub user_ids: BTreeSet<UserId>,
    pub subscription_ids: BTreeSet<String>,
    pub merchant_ids: BTreeSet<MerchantId>,
    pub discounts: BTreeSet<DiscountKey>,
    pub promo_credits: BTreeSet<PromoCreditKey>,
}

impl PreloadKeys {
    pub fn collect(invoices: &[Invoice]) -> Self {
        let mut keys = Self::default();
        for invoice in invoices {
            if !invoice.invoice_id.is_empty() {
                keys.invoice_ids.insert(invoice.invoice_id.clone());
            }
            if !invoice.payment_id.is_empty() {
                keys.payment_ids.insert(invoice.payment_id.clone());
            }
            if !invoice.refund_id.is_empty() {
                keys.refund_ids.insert(invoice.refund_id.clone());
            }
            if invoice.gateway_id.is_set() {
                keys.gateway_ids.insert(invoice.gateway_id);
            }
            if invoice.user_id.is_set() {
                keys.user_ids.insert(invoice.user_id);
            }
            if !invoice.subscription_id.is_empty() {
                keys.subscription_ids.insert(invoice.subscription_id.clone());
            }
            if invoice.merchant_id.is_set() {
                keys.merchant_ids.insert(invoice.merchant_id);
            }
            if !invoice.discount_code.is_empty() {
                keys.discounts.insert(DiscountKey::new(
                    invoice.merchant_id,
                    invoice.discount_code.clone(),
                ));
            }
            if invoice.user_id.is_set() && !invoice.invoice_id.is_empty() {
                keys.promo_credits
                    .insert(PromoCreditKey::new(invoice.user_id, invoice.invoice_id.clone()));
            }
        }
        keys
    }
}

/// Invoice ids of the payments that refund invoices point back to
fn original_invoice_ids(invoices: &[Invoice], payments: &HashMap<String, Payment>) -> Vec<String> {
    invoices
        .iter()
        .filter(|invoice| !invoice.refund_id.is_empty() && !invoice.payment_id.is_empty())
        .filter_map(|invoice| payments.get(&invoice.payment_id))
        .filter(|payment| !payment.invoice_id.is_empty())
        .map(|payment| payment.invoice_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn pending_plan_ids(pending: &HashMap<String, SubscriptionPendingUpdate>) -> Vec<PlanId> {
    pending
        .values()
        .flat_map(referenced_plan_ids)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run one batched fetch. Empty key lists skip the store entirely; a failure
/// degrades to an empty map.
async fn fetch_kind<'k, K, V, F, Fut>(kind: &'static str, keys: &'k [K], fetch: F) -> HashMap<K, V>
where
    F: FnOnce(&'k [K]) -> Fut,
    Fut: Future<Output = BillingResult<HashMap<K, V>>>,
{
    if keys.is_empty() {
        return HashMap::new();
    }
    match fetch(keys).await {
        Ok(found) => {
            debug!(kind, requested = keys.len(), found = found.len(), "Preloaded");
            found
        }
        Err(e) => {
            warn!(kind, requested = keys.len(), error = %e, "Batch fetch failed, continuing without it");
            HashMap::new()
        }
    }
}

/// Single-key lookup with the same degrade-on-failure rule as the batched path
async fn lookup_one<T, Fut>(kind: &'static str, fetch: Fut) -> Option<T>
where
    Fut: Future<Output = BillingResult<Option<T>>>,
{
    match fetch.await {
        Ok(found) => found,
        Err(e) => {
            warn!(kind, error = %e, "Lookup failed, continuing without it");
            None
        }
    }
}

pub struct PreloadBatcher<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> PreloadBatcher<'a, S>
where
    S: CollaboratorStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Load everything a batch of invoices refers to, one fetch per kind
    #[tracing::instrument(skip_all, fields(invoices = invoices.len(), scope = ?scope))]
    pub async fn preload(&self, invoices: &[Invoice], scope: PreloadScope) -> PreloadBundle {
        if invoices.is_empty() {
            return PreloadBundle::default();
        }

        let keys = PreloadKeys::collect(invoices);
        let invoice_ids: Vec<String> = keys.invoice_ids.into_iter().collect();
        let payment_ids: Vec<String> = keys.payment_ids.into_iter().collect();
        let refund_ids: Vec<String> = keys.refund_ids.into_iter().collect();
        let gateway_ids: Vec<GatewayId> = keys.gateway_ids.into_iter().collect();
        let user_ids: Vec<UserId> = keys.user_ids.into_iter().collect();
        let subscription_ids: Vec<String> = keys.subscription_ids.into_iter().collect();
        let merchant_ids: Vec<MerchantId> = match scope {
            PreloadScope::Invoice => keys.merchant_ids.into_iter().collect(),
            PreloadScope::CreditNote => Vec::new(),
        };
        let discount_keys: Vec<DiscountKey> = keys.discounts.into_iter().collect();
        let promo_keys: Vec<PromoCreditKey> = keys.promo_credits.into_iter().collect();

        let store = self.store;
        let (
            payments,
            refunds,
            gateways,
            users,
            subscriptions,
            merchants,
            discounts,
            promo_credit_transactions,
            pending_updates,
        ) = tokio::join!(
            fetch_kind("payment", &payment_ids, |ids| store.get_payments_by_ids(ids)),
            fetch_kind("refund", &refund_ids, |ids| store.get_refunds_by_ids(ids)),
            fetch_kind("gateway", &gateway_ids, |ids| store.get_gateways_by_ids(ids)),
            fetch_kind("user", &user_ids, |ids| store.get_users_by_ids(ids)),
            fetch_kind("subscription", &subscription_ids, |ids| store
                .get_subscriptions_by_ids(ids)),
            fetch_kind("merchant", &merchant_ids, |ids| store.get_merchants_by_ids(ids)),
            fetch_kind("discount", &discount_keys, |keys| store
                .get_discounts_by_codes(keys)),
            fetch_kind("promo_credit", &promo_keys, |keys| store
                .get_promo_credit_transactions_by_keys(keys)),
            fetch_kind("pending_update", &invoice_ids, |ids| store
                .get_pending_updates_by_invoice_ids(ids)),
        );

        // Second order: keys only known after the first round
        let original_ids = original_invoice_ids(invoices, &payments);
        let plan_ids = pending_plan_ids(&pending_updates);
        let (original_invoices, plans) = tokio::join!(
            fetch_kind("original_invoice", &original_ids, |ids| store
                .get_invoices_by_ids(ids)),
            fetch_kind("plan", &plan_ids, |ids| store.get_plans_by_ids(ids)),
        );

        PreloadBundle {
            payments,
            refunds,
            gateways,
            users,
            subscriptions,
            merchants,
            discounts,
            original_invoices,
            promo_credit_transactions,
            pending_updates,
            plans,
        }
    }

    /// Load one invoice's collaborators with single-key lookups.
    ///
    /// Produces the same bundle the batched path would for a one-invoice batch,
    /// so both paths share the assembler.
    #[tracing::instrument(skip_all, fields(invoice_id = %invoice.invoice_id, scope = ?scope))]
    pub async fn load_one(&self, invoice: &Invoice, scope: PreloadScope) -> PreloadBundle {
        let store = self.store;
        let mut bundle = PreloadBundle::default();

        let payment = lookup_one("payment", store.get_payment(&invoice.payment_id)).await;
        if let Some(refund) = lookup_one("refund", store.get_refund(&invoice.refund_id)).await {
            bundle.refunds.insert(refund.refund_id.clone(), refund);
        }
        if let Some(gateway) = lookup_one("gateway", store.get_gateway(invoice.gateway_id)).await {
            bundle.gateways.insert(gateway.id, gateway);
        }
        if let Some(user) = lookup_one("user", store.get_user(invoice.user_id)).await {
            bundle.users.insert(user.id, user);
        }
        if let Some(subscription) = lookup_one(
            "subscription",
            store.get_subscription(&invoice.subscription_id),
        )
        .await
        {
            bundle
                .subscriptions
                .insert(subscription.subscription_id.clone(), subscription);
        }
        if scope == PreloadScope::Invoice {
            if let Some(merchant) =
                lookup_one("merchant", store.get_merchant(invoice.merchant_id)).await
            {
                bundle.merchants.insert(merchant.id, merchant);
            }
        }

        let discount_key = DiscountKey::new(invoice.merchant_id, invoice.discount_code.clone());
        if let Some(discount) = lookup_one("discount", store.get_discount(&discount_key)).await {
            bundle.discounts.insert(discount_key, discount);
        }

        let promo_key = PromoCreditKey::new(invoice.user_id, invoice.invoice_id.clone());
        if let Some(promo) = lookup_one(
            "promo_credit",
            store.get_promo_credit_transaction(&promo_key),
        )
        .await
        {
            bundle.promo_credit_transactions.insert(promo_key, promo);
        }

        if let Some(payment) = payment {
            if !invoice.refund_id.is_empty() && !payment.invoice_id.is_empty() {
                if let Some(original) = lookup_one(
                    "original_invoice",
                    store.get_invoice(&payment.invoice_id),
                )
                .await
                {
                    bundle
                        .original_invoices
                        .insert(original.invoice_id.clone(), original);
                }
            }
            bundle.payments.insert(payment.payment_id.clone(), payment);
        }

        if let Some(pending) =
            lookup_one("pending_update", store.get_pending_update(&invoice.invoice_id)).await
        {
            let plan_ids: Vec<PlanId> = referenced_plan_ids(&pending)
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            bundle.plans =
                fetch_kind("plan", &plan_ids, |ids| store.get_plans_by_ids(ids)).await;
            bundle
                .pending_updates
                .insert(pending.invoice_id.clone(), pending);
        }

        bundle
    }
}
